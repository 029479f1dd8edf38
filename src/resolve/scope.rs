use indexmap::{IndexMap, IndexSet};

use crate::resolve::evidence::Evidence;
use crate::span::Span;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Class(SymbolId),
    Function(SymbolId),
    /// Body of `if __name__ == '__main__':`.
    Entry,
    /// Nested statement block (if/while/for/with body). Holds no names of its
    /// own; used to place local declarations.
    Block,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub names: IndexMap<String, SymbolId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Variable,
    Parameter,
    Function,
    Class,
    Method,
    Field,
    Module,
    Imported,
    Builtin,
}

impl SymbolKind {
    /// Kinds whose type is derived from evidence.
    pub fn is_inferred(self) -> bool {
        matches!(
            self,
            SymbolKind::Variable | SymbolKind::Parameter | SymbolKind::Field | SymbolKind::Function | SymbolKind::Method
        )
    }

    pub fn is_callable(self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub scope: ScopeId,
    pub span: Span,
    /// Enclosing class for methods and fields; enclosing function for
    /// parameters and locals.
    pub owner: Option<SymbolId>,
    /// Value type; the return type for functions and methods.
    pub ty: Type,
    /// Usage facts in source order, each recorded once.
    pub evidence: IndexSet<Evidence>,
    /// Block holding the first assignment of a local.
    pub decl_block: Option<ScopeId>,
    /// Every block where the local is read or written.
    pub blocks: Vec<ScopeId>,
    /// `(module, name)` for imported names and module handles.
    pub origin: Option<(String, String)>,
}

impl Symbol {
    pub fn new(id: SymbolId, name: impl Into<String>, kind: SymbolKind, scope: ScopeId, span: Span) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            scope,
            span,
            owner: None,
            ty: Type::Unknown,
            evidence: IndexSet::new(),
            decl_block: None,
            blocks: Vec::new(),
            origin: None,
        }
    }

    /// Record a usage fact. False when it was already known.
    pub fn add_evidence(&mut self, ev: Evidence) -> bool {
        self.evidence.insert(ev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::NodeId;

    #[test]
    fn repeated_evidence_is_recorded_once() {
        let mut sym = Symbol::new(SymbolId(0), "x", SymbolKind::Variable, ScopeId(0), Span::dummy());
        assert!(sym.add_evidence(Evidence::Assigned(NodeId(3))));
        assert!(sym.add_evidence(Evidence::Literal(NodeId(1))));
        assert!(!sym.add_evidence(Evidence::Assigned(NodeId(3))));
        assert_eq!(sym.evidence.len(), 2);
        assert_eq!(sym.evidence[0], Evidence::Assigned(NodeId(3)));
    }
}
