//! Fixed-point type inference over the symbol graph.
//!
//! Each pass sweeps the inferred symbols in declaration order, computes a
//! candidate type from the symbol's evidence and joins it in at once, so
//! later symbols in the same sweep see it. Types only move up the lattice,
//! so the loop stops at the first pass that changes nothing (or at the
//! configured cap).

pub mod expr;
pub mod index;
pub mod operators;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::parser::ast::{BinOp, Module, NodeId};
use crate::resolve::evidence::{AttrUse, Evidence, Side};
use crate::resolve::scope::{SymbolId, SymbolKind};
use crate::resolve::SymbolTable;
use crate::types::{Head, JoinFacts, Type};
use expr::Member;
use index::ExprIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Function,
    Class,
    Method,
    Field,
    Variable,
}

/// Signature of a name exported by another module.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSymbol {
    pub kind: ExternalKind,
    /// Variable/field type, or return type for callables.
    pub ty: Type,
    /// Parameter types for callables, receiver excluded.
    pub params: Vec<Type>,
}

/// Qualified name to signature, for every module but the current one.
pub type Externals = IndexMap<String, ExternalSymbol>;

#[derive(Debug, Clone, Copy)]
pub struct InferOptions {
    pub max_passes: usize,
}

impl Default for InferOptions {
    fn default() -> Self {
        Self { max_passes: 32 }
    }
}

/// Outcome of one `run` to a fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convergence {
    pub passes: usize,
    pub converged: bool,
}

/// Inference state for one module.
pub struct Engine<'m> {
    pub module: &'m Module,
    pub index: ExprIndex<'m>,
    pub table: SymbolTable,
    pub externals: Externals,
    pub facts: JoinFacts,
    families: Vec<Vec<SymbolId>>,
    options: InferOptions,
    passes: usize,
    capped: bool,
    last_changed: Vec<SymbolId>,
    memo: RefCell<HashMap<NodeId, Type>>,
    op_memo: RefCell<HashMap<(BinOp, Type, Type), Type>>,
}

/// A module's symbols after inference, ready for lowering.
pub struct TypedModule<'m> {
    pub module: &'m Module,
    pub table: SymbolTable,
    pub exprs: HashMap<NodeId, Type>,
    pub externals: Externals,
    pub facts: JoinFacts,
    pub diagnostics: Vec<Diagnostic>,
    pub passes: usize,
}

impl<'m> Engine<'m> {
    pub fn new(module: &'m Module, mut table: SymbolTable, options: InferOptions) -> Self {
        for sym in &mut table.symbols {
            if let Some(Evidence::Annotated(t)) = sym.evidence.iter().find(|e| matches!(e, Evidence::Annotated(_))) {
                sym.ty = t.clone();
            }
        }
        let index = ExprIndex::build(module, &table);
        let families = method_families(&table);
        Self {
            module,
            index,
            table,
            externals: Externals::new(),
            facts: JoinFacts::default(),
            families,
            options,
            passes: 0,
            capped: false,
            last_changed: Vec::new(),
            memo: RefCell::new(HashMap::new()),
            op_memo: RefCell::new(HashMap::new()),
        }
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn set_externals(&mut self, externals: Externals) {
        self.externals = externals;
    }

    /// Add evidence discovered outside the engine. Returns how many entries
    /// were new.
    pub fn add_evidence(&mut self, items: Vec<(SymbolId, Evidence)>) -> usize {
        items.into_iter().filter(|(sym, ev)| self.table.symbol_mut(*sym).add_evidence(ev.clone())).count()
    }

    /// Iterate passes until nothing changes or the pass cap is reached.
    /// The reported count includes the confirming and weak passes.
    pub fn run(&mut self) -> Convergence {
        let start = self.passes;
        loop {
            if self.passes >= self.options.max_passes {
                self.capped = true;
                tracing::warn!(module = %self.table.module, passes = self.passes, "inference pass cap reached");
                return Convergence { passes: self.passes - start, converged: false };
            }
            let changed = self.pass(false);
            if changed.is_empty() {
                // nothing left to learn from strong evidence; try operand
                // and attribute hints for symbols that are still unknown
                let widened = self.pass(true);
                if widened.is_empty() {
                    return Convergence { passes: self.passes - start, converged: true };
                }
            }
        }
    }

    /// One sweep over the inferred symbols in declaration order, then
    /// override families. Returns the symbols whose type changed.
    pub fn pass(&mut self, weak: bool) -> Vec<SymbolId> {
        self.passes += 1;
        self.memo.borrow_mut().clear();
        self.op_memo.borrow_mut().clear();
        let discovered = self.discover_evidence();
        self.add_evidence(discovered);

        let mut facts = JoinFacts::default();
        let mut changed = Vec::new();
        let inferred: Vec<SymbolId> =
            self.table.symbols.iter().filter(|s| s.kind.is_inferred()).map(|s| s.id).collect();
        for id in inferred {
            let t = self.compute(id, weak, &mut facts);
            if !t.is_unknown() && self.raise(id, &t, &mut facts) {
                changed.push(id);
            }
        }

        let mut unified = HashMap::new();
        self.unify_families(&mut unified, &mut facts);
        for (id, t) in unified {
            if self.raise(id, &t, &mut facts) {
                changed.push(id);
            }
        }
        changed.sort();
        changed.dedup();
        self.facts.absorb(facts);
        tracing::debug!(module = %self.table.module, pass = self.passes, weak, changed = changed.len(), "inference pass");
        self.last_changed = changed.clone();
        changed
    }

    /// Join `t` into a symbol's type. True when the type moved; expression
    /// types cached from the old one are dropped.
    fn raise(&mut self, id: SymbolId, t: &Type, facts: &mut JoinFacts) -> bool {
        let old = &self.table.symbol(id).ty;
        let new = old.join_with(t, &self.table, facts);
        if &new == old {
            return false;
        }
        self.table.symbol_mut(id).ty = new;
        self.memo.borrow_mut().clear();
        true
    }

    /// Candidate type for one symbol from its evidence.
    fn compute(&self, id: SymbolId, weak: bool, facts: &mut JoinFacts) -> Type {
        let sym = self.table.symbol(id);
        if let Some(Evidence::Annotated(t)) = sym.evidence.iter().find(|e| matches!(e, Evidence::Annotated(_))) {
            return t.clone();
        }

        if sym.ty.is_unknown() {
            let literal = sym
                .evidence
                .iter()
                .filter(|e| e.is_literal())
                .map(|e| self.evidence_type(id, e))
                .fold(Type::Unknown, |acc, t| acc.join_with(&t, &self.table, facts));
            if literal.specificity() == 3 && !matches!(literal, Type::Union(_)) {
                return literal;
            }
        }

        let mut fold = Type::Unknown;
        for ev in &sym.evidence {
            let t = self.evidence_type(id, ev);
            if !t.is_unknown() {
                fold = fold.join_with(&t, &self.table, facts);
            }
        }
        if !weak || !fold.is_unknown() || !sym.ty.is_unknown() {
            return fold;
        }

        for ev in &sym.evidence {
            if let Evidence::Operand { op, partner, side } = ev {
                let t = self.operand_hint(*op, *partner, *side);
                if !t.is_unknown() {
                    fold = fold.join_with(&t, &self.table, facts);
                }
            }
        }
        if fold.is_unknown() {
            fold = self.duck_type(id);
        }
        fold
    }

    fn evidence_type(&self, sym: SymbolId, ev: &Evidence) -> Type {
        match ev {
            Evidence::Annotated(t) | Evidence::CrossModule(t) => t.clone(),
            Evidence::Literal(n)
            | Evidence::Assigned(n)
            | Evidence::Argument { value: n, .. }
            | Evidence::Default(n)
            | Evidence::Context(n)
            | Evidence::Returned(n) => self.type_of(*n),
            Evidence::Unpacked { value, index } => {
                let t = self.type_of(*value);
                match t.head() {
                    Some(Head::Tuple) => t.arg(*index),
                    Some(_) => t.element_type(),
                    None if t.is_unknown() => Type::Unknown,
                    None => Type::Dynamic,
                }
            }
            Evidence::AugAssigned { op, value } => {
                let current = self.table.symbol(sym).ty.clone();
                self.binary_type(*op, &current, &self.type_of(*value))
            }
            Evidence::Iterated { iterable, index } => {
                let elem = self.type_of(*iterable).element_type();
                match index {
                    None => elem,
                    Some(i) => match elem.head() {
                        Some(Head::Tuple) => elem.arg(*i),
                        _ if elem.is_unknown() => Type::Unknown,
                        _ => Type::Dynamic,
                    },
                }
            }
            Evidence::ElementAdded { key, value } => {
                let current = &self.table.symbol(sym).ty;
                let v = self.type_of(*value);
                match current.head() {
                    Some(Head::List) => Type::list(v),
                    Some(Head::Set) => Type::set(v),
                    Some(Head::Dict) => {
                        let k = key.map_or(Type::Unknown, |k| self.type_of(k));
                        Type::dict(k, v)
                    }
                    _ => Type::Unknown,
                }
            }
            Evidence::ReturnedNone => Type::none(),
            Evidence::Operand { .. }
            | Evidence::AttributeAccess { .. }
            | Evidence::CallSite(_)
            | Evidence::Instantiated(_) => Type::Unknown,
        }
    }

    /// Type suggested by an operator partner. `Unknown` defers.
    fn operand_hint(&self, op: BinOp, partner: NodeId, side: Side) -> Type {
        let p = self.type_of(partner);
        match &p {
            Type::Scalar(k) => operators::scalar_partner(op, *k).unwrap_or(Type::Unknown),
            Type::Nominal(n) => match &n.head {
                Head::Class(class) => {
                    // the partner's own dunder decides what it accepts
                    let dunder = match side {
                        Side::Right => op.dunder(),
                        Side::Left => op.reflected_dunder(),
                    };
                    match self.member(class, dunder) {
                        Member::Local(m) | Member::Downcast { symbol: m, .. } => self.first_param_type(m),
                        _ => Type::Unknown,
                    }
                }
                Head::List if op == BinOp::Add => p.clone(),
                _ => Type::Unknown,
            },
            _ => Type::Unknown,
        }
    }

    fn first_param_type(&self, method: SymbolId) -> Type {
        self.table
            .function(method)
            .and_then(|f| f.value_params().first())
            .map_or(Type::Unknown, |p| self.table.symbol(*p).ty.clone())
    }

    /// If the attributes used on an untyped symbol are all defined within a
    /// single class hierarchy, type it as the topmost class defining them.
    fn duck_type(&self, id: SymbolId) -> Type {
        let attrs: Vec<&str> = self
            .table
            .symbol(id)
            .evidence
            .iter()
            .filter_map(|e| match e {
                Evidence::AttributeAccess { attr, .. } => Some(attr.as_str()),
                _ => None,
            })
            .collect();
        let Some(first) = attrs.first() else { return Type::Unknown };
        let definers: Vec<SymbolId> = self
            .table
            .classes
            .values()
            .filter(|c| c.fields.contains_key(*first) || c.methods.contains_key(*first))
            .map(|c| c.symbol)
            .collect();
        let top: Vec<SymbolId> = definers
            .iter()
            .copied()
            .filter(|d| !definers.iter().any(|e| e != d && self.table.mro(*d).contains(e)))
            .collect();
        let [class] = top.as_slice() else { return Type::Unknown };
        let all_known = attrs.iter().all(|a| {
            self.table.lookup_member(*class, a).is_some()
                || self.table.descendants(*class).iter().any(|d| self.table.lookup_member(*d, a).is_some())
        });
        if all_known { self.table.class_type(*class) } else { Type::Unknown }
    }

    /// Evidence that depends on current types: call arguments reaching
    /// method parameters, attribute stores reaching fields, and container
    /// mutations reaching the container's symbol.
    fn discover_evidence(&self) -> Vec<(SymbolId, Evidence)> {
        let mut out = Vec::new();
        for site in &self.table.attr_sites {
            let Some(receiver) = self.index.get(site.receiver) else { continue };
            match &site.usage {
                AttrUse::Call { call, args } => {
                    for (param, arg) in self.call_params(receiver, &site.attr).into_iter().zip(args) {
                        out.push((param, Evidence::Argument { call: *call, value: *arg }));
                    }
                }
                AttrUse::Store { value } => {
                    if let Some(field) = self.field_of(site.receiver, &site.attr) {
                        out.push((field, Evidence::Assigned(*value)));
                    }
                }
                AttrUse::Load => {}
            }
        }
        for m in &self.table.mutation_sites {
            let Some(sym) = self.receiver_symbol(m.receiver) else { continue };
            let is_container = matches!(self.table.symbol(sym).ty.head(), Some(Head::List | Head::Set | Head::Dict));
            if is_container {
                out.push((sym, Evidence::ElementAdded { key: m.key, value: m.value }));
            }
        }
        out
    }

    /// Parameters that positional arguments of `receiver.attr(...)` bind to.
    fn call_params(&self, receiver: &crate::span::Spanned<crate::parser::ast::Expr>, attr: &str) -> Vec<SymbolId> {
        if self.module_of(receiver).is_some() {
            return Vec::new();
        }
        if let Some(class) = self.class_named(receiver) {
            let Some(m) = self.table.lookup_method(class, attr) else { return Vec::new() };
            return self.table.function(m).map(|f| f.params.clone()).unwrap_or_default();
        }
        let method = if let Some(base) = self.super_class(receiver) {
            self.table.lookup_method(base, attr)
        } else {
            match self.type_of(receiver.node.id).class_name() {
                Some(class) => match self.member(class, attr) {
                    Member::Local(m) | Member::Downcast { symbol: m, .. } => Some(m),
                    _ => None,
                },
                None => None,
            }
        };
        method
            .and_then(|m| self.table.function(m))
            .map(|f| f.value_params().to_vec())
            .unwrap_or_default()
    }

    fn field_of(&self, receiver: NodeId, attr: &str) -> Option<SymbolId> {
        let class = self.type_of(receiver).class_name()?.to_string();
        match self.member(&class, attr) {
            Member::Local(s) | Member::Downcast { symbol: s, .. } if self.table.symbol(s).kind == SymbolKind::Field => Some(s),
            _ => None,
        }
    }

    /// Symbol a container expression denotes: a name or a field access.
    pub fn receiver_symbol(&self, node: NodeId) -> Option<SymbolId> {
        let e = self.index.get(node)?;
        match &e.node.kind {
            crate::parser::ast::ExprKind::Name(_) => {
                let sym = self.table.binding(node)?;
                self.table.symbol(sym).kind.is_inferred().then_some(sym)
            }
            crate::parser::ast::ExprKind::Attribute { value, attr } => self.field_of(value.node.id, &attr.node),
            _ => None,
        }
    }

    /// Methods sharing a name across one class hierarchy agree on their
    /// signature: parameter and return types are joined family-wide.
    fn unify_families(&self, computed: &mut HashMap<SymbolId, Type>, facts: &mut JoinFacts) {
        for family in &self.families {
            let current = |id: &SymbolId, computed: &HashMap<SymbolId, Type>| {
                let old = &self.table.symbol(*id).ty;
                match computed.get(id) {
                    Some(t) => old.join(t, &self.table),
                    None => old.clone(),
                }
            };
            let ret = family
                .iter()
                .fold(Type::Unknown, |acc, m| acc.join_with(&current(m, computed), &self.table, facts));
            if !ret.is_unknown() {
                for m in family {
                    computed.insert(*m, ret.clone());
                }
            }

            let params: Vec<Vec<SymbolId>> = family
                .iter()
                .filter_map(|m| self.table.function(*m).map(|f| f.value_params().to_vec()))
                .collect();
            let arity = params.iter().map(Vec::len).min().unwrap_or(0);
            for i in 0..arity {
                let joined = params
                    .iter()
                    .fold(Type::Unknown, |acc, ps| acc.join_with(&current(&ps[i], computed), &self.table, facts));
                if !joined.is_unknown() {
                    for ps in &params {
                        computed.insert(ps[i], joined.clone());
                    }
                }
            }
        }
    }

    /// Freeze the engine: settle leftovers, report, and snapshot expression
    /// types.
    pub fn finish(mut self) -> TypedModule<'m> {
        let mut diagnostics = Vec::new();
        let recursive = self.recursive_functions();

        if self.capped {
            for id in &self.last_changed {
                let sym = self.table.symbol(*id);
                diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::TypeInferenceDidNotConverge,
                        format!("type of '{}' was still changing after {} passes", sym.name, self.passes),
                        sym.span,
                    )
                    .for_symbol(self.table.qualified_name(*id)),
                );
            }
        }

        let ids: Vec<SymbolId> = self.table.symbols.iter().filter(|s| s.kind.is_inferred()).map(|s| s.id).collect();
        for id in ids {
            let sym = self.table.symbol(id);
            if !sym.ty.is_unknown() {
                continue;
            }
            let is_function = sym.kind.is_callable();
            let has_returns = sym.evidence.iter().any(|e| matches!(e, Evidence::Returned(_)));
            let diag = if is_function && !has_returns {
                self.table.symbol_mut(id).ty = Type::none();
                None
            } else if recursive.contains(&id) {
                Some(Diagnostic::warning(
                    DiagnosticKind::TypeInferenceDidNotConverge,
                    format!("'{}' is only defined through recursive calls; using a dynamic type", sym.name),
                    sym.span,
                ))
            } else if sym.name == "_" || (sym.evidence.is_empty() && sym.kind == SymbolKind::Field) {
                None
            } else {
                Some(Diagnostic::note(
                    DiagnosticKind::NoTypeEvidence,
                    format!("no type evidence for '{}'; using a dynamic type", sym.name),
                    sym.span,
                ))
            };
            if let Some(d) = diag {
                diagnostics.push(d.for_symbol(self.table.qualified_name(id)));
            }
        }

        for sym in &mut self.table.symbols {
            if sym.kind.is_inferred() {
                sym.ty = sym.ty.settle(false);
            }
        }
        self.facts.nullable.extend(self.table.nullable.iter().cloned());

        self.memo.borrow_mut().clear();
        self.op_memo.borrow_mut().clear();
        let exprs = self.index.order.iter().map(|id| (*id, self.type_of(*id).settle(false))).collect();
        tracing::debug!(module = %self.table.module, passes = self.passes, diagnostics = diagnostics.len(), "inference finished");

        TypedModule {
            module: self.module,
            table: self.table,
            exprs,
            externals: self.externals,
            facts: self.facts,
            diagnostics,
            passes: self.passes,
        }
    }

    /// Functions on a call cycle, plus their parameters.
    fn recursive_functions(&self) -> HashSet<SymbolId> {
        let mut edges: HashMap<SymbolId, Vec<SymbolId>> = HashMap::new();
        for sym in &self.table.symbols {
            for ev in &sym.evidence {
                if let Evidence::CallSite(call) = ev
                    && let Some(caller) = self.index.function.get(call)
                {
                    edges.entry(*caller).or_default().push(sym.id);
                }
            }
        }
        let mut out = HashSet::new();
        for start in edges.keys() {
            let mut seen = HashSet::new();
            let mut stack = edges[start].clone();
            while let Some(f) = stack.pop() {
                if f == *start {
                    out.insert(*start);
                    if let Some(info) = self.table.function(*start) {
                        out.extend(info.params.iter().copied());
                    }
                    break;
                }
                if seen.insert(f) {
                    stack.extend(edges.get(&f).into_iter().flatten().copied());
                }
            }
        }
        out
    }
}

/// Same-named methods (constructors and destructors aside) within one
/// connected class hierarchy.
fn method_families(table: &SymbolTable) -> Vec<Vec<SymbolId>> {
    let mut by_root: IndexMap<(SymbolId, String), Vec<SymbolId>> = IndexMap::new();
    for class in table.classes.values() {
        let root = hierarchy_root(table, class.symbol);
        for (name, method) in &class.methods {
            if name == "__init__" || name == "__del__" {
                continue;
            }
            if table.function(*method).is_some_and(|f| f.is_static) {
                continue;
            }
            by_root.entry((root, name.clone())).or_default().push(*method);
        }
    }
    by_root.into_values().filter(|members| members.len() > 1).collect()
}

/// Smallest class id in the connected component of `class`.
pub fn hierarchy_root(table: &SymbolTable, class: SymbolId) -> SymbolId {
    let mut seen = vec![class];
    let mut stack = vec![class];
    while let Some(c) = stack.pop() {
        let mut next: Vec<SymbolId> = table.class(c).map(|i| i.local_bases().collect()).unwrap_or_default();
        next.extend(table.subclasses(c));
        for n in next {
            if !seen.contains(&n) {
                seen.push(n);
                stack.push(n);
            }
        }
    }
    seen.into_iter().min().unwrap_or(class)
}

impl TypedModule<'_> {
    pub fn expr_type(&self, id: NodeId) -> Type {
        self.exprs.get(&id).cloned().unwrap_or(Type::Dynamic)
    }

    pub fn member(&self, qualified: &str, attr: &str) -> Member {
        expr::resolve_member(&self.table, &self.externals, qualified, attr)
    }

    /// Signatures this module offers to importers.
    pub fn exports(&self) -> Externals {
        exports_of(&self.table)
    }
}

/// Qualified names and current types of a module's top-level functions,
/// classes (constructor parameters), methods, fields and variables.
pub fn exports_of(table: &SymbolTable) -> Externals {
    let mut out = Externals::new();
    let params = |f: SymbolId| -> Vec<Type> {
        table
            .function(f)
            .map(|i| i.value_params().iter().map(|p| table.symbol(*p).ty.clone()).collect())
            .unwrap_or_default()
    };
    for (name, id) in &table.scope(table.module_scope()).names {
        let sym = table.symbol(*id);
        let qualified = format!("{}.{name}", table.module);
        match sym.kind {
            SymbolKind::Function => {
                out.insert(qualified, ExternalSymbol { kind: ExternalKind::Function, ty: sym.ty.clone(), params: params(*id) });
            }
            SymbolKind::Variable => {
                out.insert(qualified, ExternalSymbol { kind: ExternalKind::Variable, ty: sym.ty.clone(), params: Vec::new() });
            }
            SymbolKind::Class => {
                let ctor = table.lookup_method(*id, "__init__").map(params).unwrap_or_default();
                out.insert(qualified.clone(), ExternalSymbol { kind: ExternalKind::Class, ty: table.class_type(*id), params: ctor });
                if let Some(info) = table.class(*id) {
                    for (field, f) in &info.fields {
                        out.insert(
                            format!("{qualified}.{field}"),
                            ExternalSymbol { kind: ExternalKind::Field, ty: table.symbol(*f).ty.clone(), params: Vec::new() },
                        );
                    }
                    for (method, m) in &info.methods {
                        out.insert(
                            format!("{qualified}.{method}"),
                            ExternalSymbol { kind: ExternalKind::Method, ty: table.symbol(*m).ty.clone(), params: params(*m) },
                        );
                    }
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use crate::resolve::{resolve, Interfaces};

    fn infer(src: &str) -> (Module, SymbolTable) {
        let module = parse_module(src, "m").unwrap();
        let table = resolve(&module, &Interfaces::new()).unwrap();
        (module, table)
    }

    fn ty_of(engine: &Engine, name: &str) -> Type {
        engine.table.symbols.iter().find(|s| s.name == name).map(|s| s.ty.clone()).unwrap()
    }

    #[test]
    fn literal_assignment_types_immediately() {
        let (module, table) = infer("x = 1\ny = 2.5\ns = 'a'\n");
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.pass(false);
        assert_eq!(ty_of(&engine, "x"), Type::int());
        assert_eq!(ty_of(&engine, "y"), Type::float());
        assert_eq!(ty_of(&engine, "s"), Type::str());
    }

    const BACKWARD: &str = "def a():\n    return b()\ndef b():\n    return c()\ndef c():\n    return 1\n";

    #[test]
    fn source_order_chain_settles_in_one_sweep() {
        let (module, table) = infer("a = 1\nb = a\nc = b\n");
        let mut engine = Engine::new(&module, table, InferOptions::default());
        assert_eq!(engine.pass(false).len(), 3);
        assert_eq!(ty_of(&engine, "c"), Type::int());
        // confirming sweep and weak sweep
        let c = engine.run();
        assert!(c.converged);
        assert_eq!(c.passes, 2);
    }

    #[test]
    fn backward_references_take_a_sweep_per_link() {
        let (module, table) = infer(BACKWARD);
        let mut engine = Engine::new(&module, table, InferOptions::default());
        let c = engine.run();
        assert!(c.converged);
        assert_eq!(c.passes, 5);
        assert_eq!(ty_of(&engine, "a"), Type::int());
    }

    #[test]
    fn call_arguments_reach_parameters_and_returns_flow_back() {
        let (module, table) = infer("def f(a):\n    return a\nr = f(2.0)\n");
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        assert_eq!(ty_of(&engine, "a"), Type::float());
        assert_eq!(ty_of(&engine, "r"), Type::float());
    }

    #[test]
    fn conflicting_evidence_forms_union() {
        let (module, table) = infer("def f(a):\n    return a\nf(1)\nf('s')\n");
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        assert!(matches!(ty_of(&engine, "a"), Type::Union(_)));
    }

    #[test]
    fn empty_list_refined_by_append() {
        let (module, table) = infer("xs = []\nxs.append(1.5)\n");
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        assert_eq!(ty_of(&engine, "xs"), Type::list(Type::float()));
    }

    #[test]
    fn fields_typed_from_constructor_arguments() {
        let (module, table) = infer("class P:\n    def __init__(self, x):\n        self.x = x\np = P(3)\nv = p.x\n");
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        let field = engine.table.symbols.iter().find(|s| s.name == "x" && s.kind == SymbolKind::Field).unwrap();
        assert_eq!(field.ty, Type::int());
        assert_eq!(ty_of(&engine, "v"), Type::int());
    }

    #[test]
    fn method_arguments_flow_through_receiver_type() {
        let src = "class C:\n    def put(self, v):\n        return v\nc = C()\nr = c.put(True)\n";
        let (module, table) = infer(src);
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        assert_eq!(ty_of(&engine, "v"), Type::boolean());
        assert_eq!(ty_of(&engine, "r"), Type::boolean());
    }

    #[test]
    fn operand_partner_types_parameter() {
        let (module, table) = infer("def twice(n):\n    return n * 2\n");
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        assert_eq!(ty_of(&engine, "n"), Type::int());
        assert_eq!(ty_of(&engine, "twice"), Type::int());
    }

    #[test]
    fn mutual_recursion_reports_non_convergence() {
        let (module, table) = infer("def f(x):\n    return g(x)\ndef g(x):\n    return f(x)\n");
        let mut engine = Engine::new(&module, table, InferOptions::default());
        assert!(engine.run().converged);
        let typed = engine.finish();
        assert!(typed.diagnostics.iter().any(|d| d.kind == DiagnosticKind::TypeInferenceDidNotConverge));
        let f = typed.table.symbols.iter().find(|s| s.name == "f").unwrap();
        assert_eq!(f.ty, Type::Dynamic);
    }

    #[test]
    fn pass_cap_is_reported() {
        let (module, table) = infer(BACKWARD);
        let mut engine = Engine::new(&module, table, InferOptions { max_passes: 2 });
        let c = engine.run();
        assert!(!c.converged);
        let typed = engine.finish();
        assert!(typed.diagnostics.iter().any(|d| d.kind == DiagnosticKind::TypeInferenceDidNotConverge));
    }

    #[test]
    fn family_members_share_return_type() {
        let src = "class E:\n    def ev(self):\n        raise NotImplementedError()\nclass S(E):\n    def ev(self):\n        return 1.0\ndef run(e: E):\n    return e.ev()\n";
        let (module, table) = infer(src);
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        let evs: Vec<_> = engine.table.symbols.iter().filter(|s| s.name == "ev").collect();
        assert!(evs.iter().all(|s| s.ty == Type::float()));
        assert_eq!(ty_of(&engine, "run"), Type::float());
    }

    #[test]
    fn sibling_assignments_mark_base_polymorphic() {
        let src = "class B:\n    pass\nclass X(B):\n    pass\nclass Y(B):\n    pass\nv = X()\nv = Y()\n";
        let (module, table) = infer(src);
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        assert_eq!(ty_of(&engine, "v"), Type::class("m.B"));
        assert!(engine.facts.polymorphic.contains("m.B"));
    }

    #[test]
    fn duck_typed_receiver() {
        let src = "class Shape:\n    def area(self):\n        return 1.0\ndef total(s):\n    return s.area()\n";
        let (module, table) = infer(src);
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        assert_eq!(ty_of(&engine, "s"), Type::class("m.Shape"));
        assert_eq!(ty_of(&engine, "total"), Type::float());
    }

    #[test]
    fn exports_describe_signatures() {
        let (module, table) = infer("def f(a):\n    return a\nf(1)\nclass P:\n    def __init__(self, x):\n        self.x = x\n");
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        let typed = engine.finish();
        let exports = typed.exports();
        assert_eq!(exports["m.f"].kind, ExternalKind::Function);
        assert_eq!(exports["m.f"].params, vec![Type::int()]);
        assert_eq!(exports["m.P"].kind, ExternalKind::Class);
        assert!(exports.contains_key("m.P.x"));
    }
}
