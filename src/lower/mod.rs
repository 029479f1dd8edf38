//! Semantic lowering: typed AST to the static IR in [`ir`].
//!
//! Every operator, attribute and call site is resolved against the settled
//! types. Classes get their representation from [`shapes::Shapes`], module
//! constants are placed by [`constants::ConstantGraph`], and
//! structural `__eq__` bodies are rewritten into identity, tag and field
//! order.

mod call;
pub mod constants;
pub mod dispatch;
mod equality;
mod expr;
pub mod ir;
pub mod shapes;
mod stmt;

use std::collections::{HashMap, HashSet};

use crate::diagnostics::{CompileError, Diagnostic, DiagnosticKind};
use crate::infer::expr::Member;
use crate::infer::{ExternalKind, TypedModule};
use crate::parser::ast::{ClassDef, FunctionDef, Stmt};
use crate::resolve::scope::{ScopeId, SymbolId, SymbolKind};
use crate::resolve::{is_main_guard, BaseRef, SymbolTable};
use crate::span::{Span, Spanned};
use crate::types::{ClassHierarchy, Type};
use equality::{EqShape, TagSpec};
use ir::*;
use shapes::Shapes;

#[derive(Debug, Clone)]
pub struct LowerOptions {
    /// Header providing the runtime support library.
    pub runtime_header: String,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self { runtime_header: "kiwi".to_string() }
    }
}

/// A lowered module and the findings made while lowering it.
#[derive(Debug)]
pub struct Lowered {
    pub module: LModule,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn lower_module(typed: &TypedModule<'_>, shapes: &Shapes, options: &LowerOptions) -> Result<Lowered, CompileError> {
    let mut lowerer = Lowerer::new(typed, shapes);
    let module = lowerer.module(options)?;
    tracing::debug!(
        module = %module.name,
        classes = module.classes.len(),
        functions = module.functions.len(),
        dynamic = module.dynamic.used,
        "lowered"
    );
    Ok(Lowered { module, diagnostics: lowerer.diagnostics })
}

/// Per-body lowering state.
#[derive(Debug, Default)]
struct Frame {
    function: Option<SymbolId>,
    class: Option<SymbolId>,
    self_sym: Option<SymbolId>,
    /// Scope whose names are the body's locals.
    scope: Option<ScopeId>,
    declared: HashSet<SymbolId>,
    ret: Option<Type>,
    in_ctor: bool,
    base_inits: Vec<(String, Vec<LExpr>)>,
}

pub(crate) struct Lowerer<'a, 'm> {
    typed: &'a TypedModule<'m>,
    table: &'a SymbolTable,
    shapes: &'a Shapes,
    class_defs: HashMap<SymbolId, &'m ClassDef>,
    diagnostics: Vec<Diagnostic>,
    dynamic: DynamicSurface,
    uses_print: bool,
    frame: Frame,
    temps: usize,
}

impl<'a, 'm> Lowerer<'a, 'm> {
    fn new(typed: &'a TypedModule<'m>, shapes: &'a Shapes) -> Self {
        let module: &'m crate::parser::ast::Module = typed.module;
        let class_defs = module
            .body
            .iter()
            .filter_map(|s| match &s.node {
                Stmt::ClassDef(c) => typed.table.defs.get(&c.name.span).map(|id| (*id, c)),
                _ => None,
            })
            .collect();
        Self {
            typed,
            table: &typed.table,
            shapes,
            class_defs,
            diagnostics: Vec::new(),
            dynamic: DynamicSurface::default(),
            uses_print: false,
            frame: Frame::default(),
            temps: 0,
        }
    }

    fn module(&mut self, options: &LowerOptions) -> Result<LModule, CompileError> {
        let typed = self.typed;
        let module: &'m crate::parser::ast::Module = typed.module;
        let table = self.table;

        let mut classes = Vec::new();
        for class in self.class_order() {
            classes.push(self.class(class)?);
        }

        let mut functions = Vec::new();
        for stmt in &module.body {
            if let Stmt::FunctionDef(f) = &stmt.node {
                let sym = self.def_symbol(&f.name)?;
                let (params, ret, body) = self.function(f, sym, None)?;
                functions.push(LFunction { name: table.qualified_name(sym), params, ret, body });
            }
        }

        let globals = table
            .scope(table.module_scope())
            .names
            .values()
            .filter(|id| table.symbol(**id).kind == SymbolKind::Variable)
            .map(|id| LGlobal {
                name: table.qualified_name(*id),
                ty: self.symbol_type(*id),
                constant: table.constants.contains(id),
            })
            .collect();

        let init = self.initializer()?;
        let entry = self.entry()?;

        let imports: Vec<String> =
            table.imported_modules.iter().filter(|m| m.as_str() != "math").cloned().collect();
        let mut includes = vec![Include::Runtime(options.runtime_header.clone())];
        for header in ["memory", "tuple", "functional", "algorithm", "typeinfo"] {
            includes.push(Include::System(header.to_string()));
        }
        if table.imported_modules.iter().any(|m| m == "math") {
            includes.push(Include::System("cmath".to_string()));
        }
        if self.uses_print {
            includes.push(Include::System("iostream".to_string()));
        }
        includes.extend(imports.iter().map(|m| Include::Local(m.clone())));

        Ok(LModule {
            name: table.module.clone(),
            includes,
            imports,
            hierarchies: self.shapes.hierarchies.clone(),
            classes,
            functions,
            globals,
            init,
            entry,
            dynamic: std::mem::take(&mut self.dynamic),
            uses_print: self.uses_print,
            reprs: self.shapes.external.iter().chain(&self.shapes.repr).map(|(k, v)| (k.clone(), *v)).collect(),
        })
    }

    /// Local classes, bases first, otherwise in source order.
    fn class_order(&self) -> Vec<SymbolId> {
        let mut order: Vec<SymbolId> = Vec::new();
        let mut pending: Vec<SymbolId> = self.table.classes.keys().copied().collect();
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|c| {
                let ready = self.table.class(*c).is_none_or(|i| i.local_bases().all(|b| order.contains(&b)));
                if ready {
                    order.push(*c);
                }
                !ready
            });
            if pending.len() == before {
                order.append(&mut pending);
            }
        }
        order
    }

    /// Top-level statements in source order. A constant is initialised
    /// early only when an earlier constant reads it.
    fn initializer(&mut self) -> Result<Vec<LStmt>, CompileError> {
        let typed = self.typed;
        let module: &'m crate::parser::ast::Module = typed.module;
        let table = self.table;
        self.frame = Frame { scope: Some(table.module_scope()), ..Frame::default() };

        let graph = constants::ConstantGraph::build(module, table, &typed.exprs)?;
        let mut constant_stmts: HashMap<SymbolId, &'m Spanned<Stmt>> = HashMap::new();
        for stmt in &module.body {
            if let Stmt::Assign { target, value: Some(_), .. } = &stmt.node
                && let Some(sym) = table.binding(target.node.id)
                && graph.is_constant(sym)
            {
                constant_stmts.insert(sym, stmt);
            }
        }

        let mut out = Vec::new();
        let mut placed = HashSet::new();
        for stmt in &module.body {
            match &stmt.node {
                Stmt::FunctionDef(_) | Stmt::ClassDef(_) | Stmt::Import { .. } | Stmt::FromImport { .. } => {}
                Stmt::If { condition, else_body, .. } if is_main_guard(condition) => {
                    let lowered = self.block(else_body)?;
                    out.extend(lowered);
                }
                Stmt::Assign { target, .. } => match table.binding(target.node.id) {
                    Some(sym) if constant_stmts.contains_key(&sym) => {
                        self.place_constant(sym, &graph, &constant_stmts, &mut placed, &mut out)?;
                    }
                    _ => self.stmt(stmt, &mut out)?,
                },
                _ => self.stmt(stmt, &mut out)?,
            }
        }
        Ok(out)
    }

    fn place_constant(
        &mut self,
        sym: SymbolId,
        graph: &constants::ConstantGraph,
        stmts: &HashMap<SymbolId, &'m Spanned<Stmt>>,
        placed: &mut HashSet<SymbolId>,
        out: &mut Vec<LStmt>,
    ) -> Result<(), CompileError> {
        if !placed.insert(sym) {
            return Ok(());
        }
        for dep in graph.prerequisites(sym) {
            self.place_constant(dep, graph, stmts, placed, out)?;
        }
        if let Some(stmt) = stmts.get(&sym) {
            tracing::trace!(constant = %self.table.symbol(sym).name, "constant initialised");
            self.stmt(stmt, out)?;
        }
        Ok(())
    }

    fn entry(&mut self) -> Result<Option<Vec<LStmt>>, CompileError> {
        let module: &'m crate::parser::ast::Module = self.typed.module;
        let table = self.table;
        let Some((scope, _)) = table.entry else { return Ok(None) };
        let body = module.body.iter().find_map(|s| match &s.node {
            Stmt::If { condition, then_body, .. } if is_main_guard(condition) => Some(then_body),
            _ => None,
        });
        let Some(body) = body else { return Ok(None) };
        self.frame = Frame { scope: Some(scope), ..Frame::default() };
        let locals: Vec<SymbolId> = table.scope(scope).names.values().copied().collect();
        let mut out = self.hoist(&locals, scope);
        out.extend(self.block(body)?);
        Ok(Some(out))
    }

    /// Lower a function or method body. Returns parameters (receiver
    /// excluded), return type and statements.
    fn function(
        &mut self,
        f: &FunctionDef,
        sym: SymbolId,
        class: Option<SymbolId>,
    ) -> Result<(Vec<LParam>, Type, Vec<LStmt>), CompileError> {
        let table = self.table;
        let Some(info) = table.function(sym) else {
            return Err(CompileError::internal(format!("no function record for '{}'", f.name.node)));
        };
        let skip = usize::from(info.has_self());
        let types = self.param_types(sym);

        self.frame = Frame::default();
        let mut params = Vec::new();
        for (i, p) in f.params.iter().enumerate().skip(skip) {
            let default = match &p.default {
                Some(d) => Some(self.expr(d)?),
                None => None,
            };
            let ty = types.get(i - skip).cloned().unwrap_or(Type::Dynamic);
            params.push(LParam { name: p.name.node.clone(), ty, default });
        }

        let ret = self.norm(&table.symbol(sym).ty);
        self.frame = Frame {
            function: Some(sym),
            class,
            self_sym: info.has_self().then(|| info.params[0]),
            scope: Some(info.scope),
            declared: info.params.iter().copied().collect(),
            ret: Some(ret.clone()),
            in_ctor: f.name.node == "__init__" && class.is_some(),
            base_inits: Vec::new(),
        };
        let mut body = self.hoist(&info.locals, info.scope);
        body.extend(self.block(&f.body)?);
        Ok((params, ret, body))
    }

    /// Declarations at the top of a body for locals that escape the block
    /// of their first assignment.
    fn hoist(&mut self, candidates: &[SymbolId], frame_scope: ScopeId) -> Vec<LStmt> {
        let table = self.table;
        let mut out = Vec::new();
        for sym in candidates {
            let s = table.symbol(*sym);
            if s.kind != SymbolKind::Variable {
                continue;
            }
            let escapes = match s.decl_block {
                None => true,
                Some(d) => d != frame_scope && s.blocks.iter().any(|b| !table.block_within(*b, d)),
            };
            if escapes && self.frame.declared.insert(*sym) {
                out.push(LStmt::Declare { name: s.name.clone(), ty: self.symbol_type(*sym), init: None });
            }
        }
        out
    }

    fn class(&mut self, class: SymbolId) -> Result<LClass, CompileError> {
        let table = self.table;
        let shapes = self.shapes;
        let Some(info) = table.class(class) else {
            return Err(CompileError::internal("class record missing"));
        };
        let Some(def) = self.class_defs.get(&class).copied() else {
            return Err(CompileError::internal(format!("no definition for class '{}'", info.name)));
        };
        let q = info.qualified.clone();
        let repr = shapes.repr_of(&q);

        let bases: Vec<String> = info
            .bases
            .iter()
            .map(|b| match b {
                BaseRef::Local(id) => self.qualified(*id),
                BaseRef::External(key) => key.clone(),
            })
            .collect();

        self.frame = Frame::default();
        let mut fields = Vec::new();
        for (name, f) in &info.fields {
            let default = match self.class_level_value(class, name) {
                Some(v) => Some(self.expr(v)?),
                None => None,
            };
            fields.push(LField { name: name.clone(), ty: self.symbol_type(*f), default });
        }

        let mut ctor = None;
        let mut dtor = None;
        let mut methods = Vec::new();
        for stmt in &def.body {
            let Stmt::FunctionDef(f) = &stmt.node else { continue };
            let m = self.def_symbol(&f.name)?;
            match f.name.node.as_str() {
                "__init__" => {
                    let (params, _, body) = self.function(f, m, Some(class))?;
                    let base_inits = std::mem::take(&mut self.frame.base_inits);
                    ctor = Some(LCtor { params, base_inits, body });
                }
                "__del__" => {
                    let (_, _, body) = self.function(f, m, Some(class))?;
                    dtor = Some(body);
                }
                _ => methods.push(self.method(&q, repr, class, f, m)?),
            }
        }

        let inherit_ctor = match ctor {
            Some(_) => None,
            None => {
                let local = info
                    .local_bases()
                    .find(|b| table.lookup_method(*b, "__init__").is_some())
                    .map(|b| self.qualified(b));
                local.or_else(|| {
                    info.bases.iter().find_map(|b| match b {
                        BaseRef::External(key) => Some(key.clone()),
                        BaseRef::Local(_) => None,
                    })
                })
            }
        };
        let is_abstract = methods.iter().any(|m| m.body.is_none());

        Ok(LClass {
            name: q.clone(),
            repr,
            bases,
            hierarchy: shapes.hierarchy_of(&q).map(|h| h.root.clone()),
            fields,
            ctor,
            inherit_ctor,
            dtor,
            methods,
            is_abstract,
        })
    }

    fn method(
        &mut self,
        q: &str,
        repr: Repr,
        class: SymbolId,
        f: &FunctionDef,
        m: SymbolId,
    ) -> Result<LMethod, CompileError> {
        let table = self.table;
        let shapes = self.shapes;
        let (is_static, is_const) = table.function(m).map_or((false, false), |i| (i.is_static, i.is_const));
        let pure = shapes.pure.contains(&m);

        let canonical = (f.name.node == "__eq__" && repr == Repr::Reference && !pure)
            .then(|| equality::analyze(f))
            .flatten();
        let kind = if canonical.is_some() {
            MethodKind::Equality
        } else if operator_symbol(&f.name.node).is_some() {
            MethodKind::Operator
        } else {
            MethodKind::Regular
        };

        let (params, ret, body) = self.function(f, m, Some(class))?;
        let (ret, body) = match (&canonical, pure) {
            (_, true) => (ret, None),
            (Some(shape), false) => (Type::boolean(), Some(self.equality_body(q, &params, shape))),
            (None, false) => (ret, Some(body)),
        };
        Ok(LMethod {
            name: f.name.node.clone(),
            kind,
            params,
            ret,
            body,
            is_virtual: shapes.virtuals.contains(&m),
            is_override: shapes.overrides.contains(&m),
            is_const,
            is_static,
        })
    }

    /// Identity guard, tag guard, one downcast, then the field conjunction.
    fn equality_body(&mut self, q: &str, params: &[LParam], shape: &EqShape) -> Vec<LStmt> {
        let table = self.table;
        let other = params.first().map_or_else(|| "other".to_string(), |p| p.name.clone());
        let mut out = Vec::new();
        if shape.identity {
            out.push(LStmt::IdentityGuard { other: other.clone() });
        }

        let hierarchy = self.shapes.hierarchy_of(q).cloned();
        let test = match &shape.tags {
            Some(TagSpec::Classes(names)) => Some(TagTest::Classes(self.expand_classes(names))),
            Some(TagSpec::SameAsSelf) => Some(TagTest::SameAsSelf),
            None if !shape.fields.is_empty() => Some(TagTest::SameAsSelf),
            None => None,
        };
        if let (Some(test), Some(h)) = (test, &hierarchy) {
            out.push(LStmt::TagGuard { other: other.clone(), test, root: h.root.clone(), open: h.open });
        }

        if shape.fields.is_empty() {
            out.push(LStmt::Return(Some(LExpr::Bool(true))));
            return out;
        }
        let alias = "__other".to_string();
        out.push(LStmt::Declare {
            name: alias.clone(),
            ty: self.class_type(q),
            init: Some(LExpr::Downcast { value: LExpr::Local(other).boxed(), class: q.to_string() }),
        });

        let class = table.class_by_name(q).map(|c| c.symbol);
        let mut conjunction: Option<LExpr> = None;
        for field in &shape.fields {
            let ty = class
                .and_then(|c| table.lookup_member(c, field))
                .map_or(Type::Dynamic, |f| table.symbol(f).ty.clone());
            let mine = LExpr::Field { object: self.self_ref(q).boxed(), field: field.clone(), repr: Repr::Reference };
            let theirs = LExpr::Field {
                object: LExpr::Local(alias.clone()).boxed(),
                field: field.clone(),
                repr: Repr::Reference,
            };
            let test = self.compare_values(Span::dummy(), crate::parser::ast::CmpOp::Eq, mine, &ty, theirs, &ty);
            conjunction = Some(match conjunction {
                None => test,
                Some(acc) => LExpr::Logical {
                    op: crate::parser::ast::BoolOp::And,
                    left: acc.boxed(),
                    right: test.boxed(),
                },
            });
        }
        out.push(LStmt::Return(conjunction));
        out
    }

    /// Qualified names for classes written in a class test, with every
    /// local subclass added.
    fn expand_classes(&self, names: &[String]) -> Vec<String> {
        let table = self.table;
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let resolved = self.resolve_class_path(name);
            if let Some(info) = table.class_by_name(&resolved) {
                let mut all = vec![info.symbol];
                all.extend(table.descendants(info.symbol));
                for c in all {
                    let q = self.qualified(c);
                    if !out.contains(&q) {
                        out.push(q);
                    }
                }
            } else if !out.contains(&resolved) {
                out.push(resolved);
            }
        }
        out
    }

    /// Qualified class name for a dotted path as written at module level.
    fn resolve_class_path(&self, path: &str) -> String {
        let table = self.table;
        let head = path.split('.').next().unwrap_or(path);
        match table.scope(table.module_scope()).names.get(head).map(|id| table.symbol(*id)) {
            Some(s) if s.kind == SymbolKind::Class && head == path => self.qualified(s.id),
            Some(s) if s.kind == SymbolKind::Imported && head == path => table.qualified_name(s.id),
            Some(s) if s.kind == SymbolKind::Module => match &s.origin {
                Some((module, _)) => format!("{module}{}", &path[head.len()..]),
                None => path.to_string(),
            },
            _ => path.to_string(),
        }
    }

    /// Value of `name = <expr>` at class level, searched through local bases.
    fn class_level_value(&self, class: SymbolId, name: &str) -> Option<&'m Spanned<crate::parser::ast::Expr>> {
        for c in self.table.mro(class) {
            let Some(def) = self.class_defs.get(&c) else { continue };
            for stmt in &def.body {
                if let Stmt::Assign { target, value: Some(v), .. } = &stmt.node
                    && target.node.name() == Some(name)
                {
                    return Some(v);
                }
            }
        }
        None
    }

    // ---- type helpers -----------------------------------------------------

    /// Settle a type for emission: unions and leftovers become `Dynamic`,
    /// class ownership follows the representation decision.
    fn norm(&self, t: &Type) -> Type {
        let shapes = self.shapes;
        t.settle(true).with_ownership(&|c| shapes.ownership(c))
    }

    /// Type of a storage slot; `None` cannot be stored and widens.
    fn slot(&self, t: &Type) -> Type {
        let t = self.norm(t);
        if t.is_none() { Type::Dynamic } else { t }
    }

    fn symbol_type(&self, sym: SymbolId) -> Type {
        self.slot(&self.table.symbol(sym).ty)
    }

    fn raw_type(&self, e: &Spanned<crate::parser::ast::Expr>) -> Type {
        self.typed.expr_type(e.node.id)
    }

    fn type_of(&self, e: &Spanned<crate::parser::ast::Expr>) -> Type {
        self.norm(&self.raw_type(e))
    }

    fn class_type(&self, q: &str) -> Type {
        self.norm(&Type::class(q))
    }

    fn def_symbol(&self, name: &Spanned<String>) -> Result<SymbolId, CompileError> {
        self.table
            .defs
            .get(&name.span)
            .copied()
            .ok_or_else(|| CompileError::internal(format!("no symbol for definition '{}'", name.node)))
    }

    fn qualified(&self, class: SymbolId) -> String {
        match self.table.class(class) {
            Some(info) => info.qualified.clone(),
            None => self.table.qualified_name(class),
        }
    }

    /// Parameter types of a function or method, receiver excluded. An
    /// untyped operand of a reference class's equality operators takes the
    /// hierarchy root type.
    fn param_types(&self, func: SymbolId) -> Vec<Type> {
        let table = self.table;
        let Some(info) = table.function(func) else { return Vec::new() };
        let mut types: Vec<Type> = info.value_params().iter().map(|p| self.symbol_type(*p)).collect();
        let name = table.symbol(func).name.as_str();
        if matches!(name, "__eq__" | "__ne__")
            && let Some(class) = info.class
        {
            let q = self.qualified(class);
            if self.shapes.repr_of(&q) == Repr::Reference
                && let Some(first) = types.first_mut()
                && first.is_dynamic()
            {
                let root = self.shapes.hierarchy_of(&q).map_or(q.clone(), |h| h.root.clone());
                *first = self.class_type(&root);
            }
        }
        types
    }

    fn external_params(&self, key: &str) -> Vec<Type> {
        self.typed.externals.get(key).map(|e| e.params.iter().map(|p| self.slot(p)).collect()).unwrap_or_default()
    }

    fn external_kind(&self, key: &str) -> Option<ExternalKind> {
        self.typed.externals.get(key).map(|e| e.kind)
    }

    /// Parameter types of the method a member resolves to.
    fn member_params(&self, member: &Member) -> Vec<Type> {
        match member {
            Member::Local(m) | Member::Downcast { symbol: m, .. } => self.param_types(*m),
            Member::External(key) => self.external_params(key),
            Member::Ambiguous | Member::Missing => Vec::new(),
        }
    }

    fn self_ref(&self, q: &str) -> LExpr {
        LExpr::SelfRef { class: q.to_string(), repr: self.shapes.repr_of(q) }
    }

    /// Convert between a concrete type and the dynamic placeholder, or
    /// narrow a base handle to a subclass slot.
    fn coerce(&mut self, value: LExpr, from: &Type, to: &Type) -> LExpr {
        if matches!(value, LExpr::Null) {
            return value;
        }
        match (from, to) {
            (Type::Dynamic, Type::Dynamic) => value,
            (f, Type::Dynamic) if !f.is_none() => {
                self.dynamic.used = true;
                LExpr::Box(value.boxed())
            }
            (Type::Dynamic, t) if !t.is_none() => {
                self.dynamic.used = true;
                LExpr::Unbox { value: value.boxed(), to: t.clone() }
            }
            _ => match (from.class_name(), to.class_name()) {
                (Some(a), Some(b)) if a != b && self.table.is_subclass(b, a) => {
                    LExpr::Downcast { value: value.boxed(), class: b.to_string() }
                }
                _ => value,
            },
        }
    }

    fn temp(&mut self, prefix: &str) -> String {
        self.temps += 1;
        format!("__{prefix}{}", self.temps)
    }

    fn warn(&mut self, kind: DiagnosticKind, message: String, span: Span) {
        let mut d = Diagnostic::warning(kind, message, span);
        if let Some(f) = self.frame.function {
            d = d.for_symbol(self.table.qualified_name(f));
        }
        self.diagnostics.push(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::{Engine, InferOptions};
    use crate::parser::parse_module;
    use crate::resolve::{resolve, Interfaces};
    use std::collections::HashSet as Set;

    fn lower(src: &str) -> Lowered {
        let module = Box::leak(Box::new(parse_module(src, "m").unwrap()));
        let table = resolve(module, &Interfaces::new()).unwrap();
        let mut engine = Engine::new(module, table, InferOptions::default());
        for _ in 0..4 {
            engine.run();
            let ev = dispatch::operator_evidence(&engine);
            if engine.add_evidence(ev) == 0 {
                break;
            }
        }
        let typed = engine.finish();
        let shapes = Shapes::decide(&typed.table, &typed.facts, &typed.externals, &HashMap::new(), &Set::new());
        lower_module(&typed, &shapes, &LowerOptions::default()).unwrap()
    }

    #[test]
    fn hoists_locals_used_outside_their_block() {
        let src = "def f(c):\n    if c:\n        y = 1\n    else:\n        y = 2\n    return y\nf(True)\n";
        let l = lower(src);
        let body = &l.module.functions[0].body;
        assert!(matches!(&body[0], LStmt::Declare { name, init: None, .. } if name == "y"));
    }

    #[test]
    fn first_assignment_declares_in_place() {
        let l = lower("def f():\n    x = 1\n    x = 2\n    return x\nf()\n");
        let body = &l.module.functions[0].body;
        assert!(matches!(&body[0], LStmt::Declare { name, init: Some(_), .. } if name == "x"));
        assert!(matches!(&body[1], LStmt::Assign { .. }));
    }

    #[test]
    fn constants_move_only_ahead_of_their_readers() {
        let src = "def g():\n    return A + 1\nprint('start')\nB = g()\nA = 1\nprint(B)\n";
        let l = lower(src);
        let names: Vec<&str> = l
            .module
            .init
            .iter()
            .filter_map(|s| match s {
                LStmt::Assign { target: LPlace::Global(n), .. } => Some(n.as_str()),
                LStmt::Expr(LExpr::Print(_)) => Some("print"),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["print", "m.A", "m.B", "print"]);
        assert!(l.module.uses_print);
    }

    #[test]
    fn main_guard_becomes_entry() {
        let l = lower("def f():\n    return 1\nif __name__ == '__main__':\n    r = f()\n    print(r)\n");
        let entry = l.module.entry.unwrap();
        assert!(matches!(&entry[0], LStmt::Declare { name, .. } if name == "r"));
    }

    #[test]
    fn constructor_lifts_base_initialiser() {
        let src = "class A:\n    def __init__(self, x):\n        self.x = x\nclass B(A):\n    def __init__(self, x, y):\n        A.__init__(self, x)\n        self.y = y\nb = B(1, 2)\n";
        let l = lower(src);
        let b = l.module.classes.iter().find(|c| c.name == "m.B").unwrap();
        let ctor = b.ctor.as_ref().unwrap();
        assert_eq!(ctor.base_inits.len(), 1);
        assert_eq!(ctor.base_inits[0].0, "m.A");
        assert_eq!(ctor.body.len(), 1);
    }

    #[test]
    fn bases_are_ordered_first() {
        let l = lower("class A:\n    pass\nclass B(A):\n    pass\n");
        let names: Vec<&str> = l.module.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["m.A", "m.B"]);
    }
}
