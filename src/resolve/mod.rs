//! Scope tree and symbol table construction.

pub mod builtins;
pub mod evidence;
pub mod scope;
mod walk;

pub(crate) use walk::is_main_guard;

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;

use crate::diagnostics::CompileError;
use crate::parser::ast::{ExprKind, Module, NodeId, Stmt};
use crate::span::Span;
use crate::types::{ClassHierarchy, Type};
use builtins::Builtin;
use evidence::{AttrSite, MutationSite};
use scope::{Scope, ScopeId, ScopeKind, Symbol, SymbolId, SymbolKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseRef {
    Local(SymbolId),
    External(String),
}

/// Per-class structural description.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub symbol: SymbolId,
    pub name: String,
    pub qualified: String,
    pub scope: ScopeId,
    pub bases: Vec<BaseRef>,
    pub fields: IndexMap<String, SymbolId>,
    pub methods: IndexMap<String, SymbolId>,
    pub decorators: Vec<String>,
    pub span: Span,
}

impl ClassInfo {
    pub fn local_bases(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.bases.iter().filter_map(|b| match b {
            BaseRef::Local(id) => Some(*id),
            BaseRef::External(_) => None,
        })
    }

    pub fn has_external_base(&self) -> bool {
        self.bases.iter().any(|b| matches!(b, BaseRef::External(_)))
    }
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub symbol: SymbolId,
    pub scope: ScopeId,
    /// Includes `self` for instance methods.
    pub params: Vec<SymbolId>,
    pub class: Option<SymbolId>,
    pub is_static: bool,
    pub is_const: bool,
    /// Declared abstract or whose body only raises a not-implemented sentinel.
    pub is_abstract: bool,
    /// Body is only `pass`.
    pub is_stub: bool,
    pub locals: Vec<SymbolId>,
}

impl FunctionInfo {
    pub fn has_self(&self) -> bool {
        self.class.is_some() && !self.is_static
    }

    /// Parameters excluding the receiver.
    pub fn value_params(&self) -> &[SymbolId] {
        if self.has_self() && !self.params.is_empty() { &self.params[1..] } else { &self.params }
    }
}

/// A call into another module, recorded so argument evidence can cross the
/// merge barrier.
#[derive(Debug, Clone)]
pub struct ExternalCall {
    pub module: String,
    pub name: String,
    pub call: NodeId,
    pub args: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Function,
    Class,
    Variable,
}

/// Names a module offers to importers, gathered before resolution.
#[derive(Debug, Clone, Default)]
pub struct ModuleInterface {
    pub name: String,
    pub exports: IndexMap<String, ExportKind>,
    /// Qualified class name to qualified base names.
    pub class_bases: IndexMap<String, Vec<String>>,
}

impl ModuleInterface {
    pub fn of(module: &Module) -> Self {
        let mut iface = ModuleInterface { name: module.name.clone(), ..Default::default() };
        let mut imported: HashMap<String, String> = HashMap::new();
        for stmt in &module.body {
            match &stmt.node {
                Stmt::FunctionDef(f) => {
                    iface.exports.insert(f.name.node.clone(), ExportKind::Function);
                }
                Stmt::ClassDef(c) => {
                    iface.exports.insert(c.name.node.clone(), ExportKind::Class);
                }
                Stmt::Assign { target, .. } => {
                    if let ExprKind::Name(n) = &target.node.kind {
                        iface.exports.entry(n.clone()).or_insert(ExportKind::Variable);
                    }
                }
                Stmt::FromImport { module: path, names } => {
                    let from = path.iter().map(|p| p.node.as_str()).collect::<Vec<_>>().join(".");
                    for (name, alias) in names {
                        let bound = alias.as_ref().unwrap_or(name).node.clone();
                        imported.insert(bound, format!("{from}.{}", name.node));
                    }
                }
                _ => {}
            }
        }
        for stmt in &module.body {
            if let Stmt::ClassDef(c) = &stmt.node {
                let qualified = format!("{}.{}", module.name, c.name.node);
                let bases = c
                    .bases
                    .iter()
                    .filter_map(|b| b.node.dotted_path())
                    .filter(|b| b != "object")
                    .map(|b| {
                        if iface.exports.get(&b) == Some(&ExportKind::Class) {
                            format!("{}.{b}", module.name)
                        } else {
                            imported.get(&b).cloned().unwrap_or(b)
                        }
                    })
                    .collect();
                iface.class_bases.insert(qualified, bases);
            }
        }
        iface
    }
}

pub type Interfaces = IndexMap<String, ModuleInterface>;

/// Result of resolution: scope tree, symbols with their evidence, and the
/// binding of every name occurrence.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    pub module: String,
    pub symbols: Vec<Symbol>,
    pub scopes: Vec<Scope>,
    pub bindings: HashMap<NodeId, SymbolId>,
    pub classes: IndexMap<SymbolId, ClassInfo>,
    pub functions: IndexMap<SymbolId, FunctionInfo>,
    /// Name span of each `def`/`class` to its symbol.
    pub defs: HashMap<Span, SymbolId>,
    pub attr_sites: Vec<AttrSite>,
    pub mutation_sites: Vec<MutationSite>,
    pub external_calls: Vec<ExternalCall>,
    /// Module-level names bound exactly once at top level, in declaration
    /// order.
    pub constants: Vec<SymbolId>,
    /// Scope and statement span of the `__main__` block.
    pub entry: Option<(ScopeId, Span)>,
    /// Classes named in `Optional[...]` annotations.
    pub nullable: BTreeSet<String>,
    /// Qualified class name to qualified base names, local and imported.
    pub parents: IndexMap<String, Vec<String>>,
    /// Modules imported for their runtime effect (`math`, user modules).
    pub imported_modules: Vec<String>,
}

impl SymbolTable {
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn binding(&self, node: NodeId) -> Option<SymbolId> {
        self.bindings.get(&node).copied()
    }

    pub fn builtin(&self, id: SymbolId) -> Option<Builtin> {
        let sym = self.symbol(id);
        if sym.kind == SymbolKind::Builtin { Builtin::lookup(&sym.name) } else { None }
    }

    pub fn function(&self, id: SymbolId) -> Option<&FunctionInfo> {
        self.functions.get(&id)
    }

    pub fn class(&self, id: SymbolId) -> Option<&ClassInfo> {
        self.classes.get(&id)
    }

    pub fn class_by_name(&self, qualified: &str) -> Option<&ClassInfo> {
        self.classes.values().find(|c| c.qualified == qualified)
    }

    pub fn module_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Local classes in method resolution order, `class` first.
    pub fn mro(&self, class: SymbolId) -> Vec<SymbolId> {
        let mut out = Vec::new();
        let mut stack = vec![class];
        while let Some(c) = stack.pop() {
            if out.contains(&c) {
                continue;
            }
            out.push(c);
            if let Some(info) = self.class(c) {
                let bases: Vec<SymbolId> = info.local_bases().collect();
                stack.extend(bases.into_iter().rev());
            }
        }
        out
    }

    /// Field or method named `attr` visible on `class`, nearest first.
    pub fn lookup_member(&self, class: SymbolId, attr: &str) -> Option<SymbolId> {
        self.mro(class).into_iter().find_map(|c| {
            let info = self.class(c)?;
            info.fields.get(attr).or_else(|| info.methods.get(attr)).copied()
        })
    }

    pub fn lookup_method(&self, class: SymbolId, name: &str) -> Option<SymbolId> {
        self.mro(class).into_iter().find_map(|c| self.class(c)?.methods.get(name).copied())
    }

    pub fn subclasses(&self, class: SymbolId) -> Vec<SymbolId> {
        self.classes
            .values()
            .filter(|c| c.local_bases().any(|b| b == class))
            .map(|c| c.symbol)
            .collect()
    }

    /// All local classes deriving from `class`, directly or not.
    pub fn descendants(&self, class: SymbolId) -> Vec<SymbolId> {
        let mut out = Vec::new();
        let mut stack = self.subclasses(class);
        while let Some(c) = stack.pop() {
            if !out.contains(&c) {
                out.push(c);
                stack.extend(self.subclasses(c));
            }
        }
        out.sort();
        out
    }

    /// Methods overriding `method` in subclasses of its class.
    pub fn overrides_of(&self, method: SymbolId) -> Vec<SymbolId> {
        let sym = self.symbol(method);
        let Some(owner) = sym.owner else { return Vec::new() };
        self.descendants(owner)
            .into_iter()
            .filter_map(|c| self.class(c)?.methods.get(&sym.name).copied())
            .collect()
    }

    /// Does `inner` lie within `outer` in the block tree?
    pub fn block_within(&self, inner: ScopeId, outer: ScopeId) -> bool {
        let mut cur = Some(inner);
        while let Some(s) = cur {
            if s == outer {
                return true;
            }
            cur = self.scope(s).parent;
        }
        false
    }

    /// The function or entry scope enclosing a block.
    pub fn frame_of(&self, block: ScopeId) -> ScopeId {
        let mut cur = block;
        loop {
            let scope = self.scope(cur);
            match (scope.kind, scope.parent) {
                (ScopeKind::Block, Some(p)) => cur = p,
                _ => return cur,
            }
        }
    }

    pub fn class_type(&self, class: SymbolId) -> Type {
        match self.class(class) {
            Some(info) => Type::class(info.qualified.clone()),
            None => Type::Dynamic,
        }
    }

    pub fn qualified_name(&self, id: SymbolId) -> String {
        let sym = self.symbol(id);
        if let Some((module, name)) = &sym.origin {
            return format!("{module}.{name}");
        }
        match sym.owner.and_then(|o| self.class(o)) {
            Some(class) => format!("{}.{}", class.qualified, sym.name),
            None => format!("{}.{}", self.module, sym.name),
        }
    }
}

impl ClassHierarchy for SymbolTable {
    fn ancestors(&self, class: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut stack = vec![class.to_string()];
        while let Some(c) = stack.pop() {
            if out.contains(&c) {
                continue;
            }
            if let Some(bases) = self.parents.get(&c) {
                stack.extend(bases.iter().rev().cloned());
            }
            out.push(c);
        }
        out
    }
}

/// Build the scope tree and symbol table for one module. `interfaces`
/// describes the other modules of the project for import resolution.
pub fn resolve(module: &Module, interfaces: &Interfaces) -> Result<SymbolTable, CompileError> {
    let table = walk::Resolver::new(module, interfaces).run(module)?;
    tracing::debug!(
        module = %module.name,
        symbols = table.symbols.len(),
        classes = table.classes.len(),
        functions = table.functions.len(),
        "resolved"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn table(src: &str) -> SymbolTable {
        let module = parse_module(src, "m").unwrap();
        resolve(&module, &Interfaces::new()).unwrap()
    }

    fn find(t: &SymbolTable, name: &str, kind: SymbolKind) -> SymbolId {
        t.symbols.iter().find(|s| s.name == name && s.kind == kind).map(|s| s.id).unwrap()
    }

    #[test]
    fn interface_collects_exports_and_bases() {
        let module = parse_module("from base import Shape\nclass Circle(Shape):\n    pass\ndef area(c):\n    return 1\nPI = 3.14\n", "geo").unwrap();
        let iface = ModuleInterface::of(&module);
        assert_eq!(iface.exports.get("Circle"), Some(&ExportKind::Class));
        assert_eq!(iface.exports.get("area"), Some(&ExportKind::Function));
        assert_eq!(iface.exports.get("PI"), Some(&ExportKind::Variable));
        assert_eq!(iface.class_bases.get("geo.Circle"), Some(&vec!["base.Shape".to_string()]));
    }

    #[test]
    fn mro_and_member_lookup() {
        let t = table("class A:\n    def f(self):\n        return 1\nclass B(A):\n    def g(self):\n        return 2\n");
        let a = find(&t, "A", SymbolKind::Class);
        let b = find(&t, "B", SymbolKind::Class);
        assert_eq!(t.mro(b), vec![b, a]);
        let f = t.lookup_member(b, "f").unwrap();
        assert_eq!(t.symbol(f).owner, Some(a));
        assert_eq!(t.subclasses(a), vec![b]);
    }

    #[test]
    fn overrides_found_in_descendants() {
        let t = table("class A:\n    def f(self):\n        return 1\nclass B(A):\n    def f(self):\n        return 2\nclass C(B):\n    pass\n");
        let a = find(&t, "A", SymbolKind::Class);
        let fa = t.class(a).unwrap().methods["f"];
        assert_eq!(t.overrides_of(fa).len(), 1);
    }

    #[test]
    fn hierarchy_ancestors_use_qualified_names() {
        let t = table("class A:\n    pass\nclass B(A):\n    pass\n");
        assert_eq!(t.ancestors("m.B"), vec!["m.B".to_string(), "m.A".to_string()]);
        assert_eq!(t.common_ancestor("m.B", "m.A"), Some("m.A".to_string()));
    }
}
