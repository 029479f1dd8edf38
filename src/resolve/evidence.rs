use crate::parser::ast::{BinOp, NodeId};
use crate::resolve::scope::ScopeId;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// One recorded fact about how a symbol is used. Node ids refer to the
/// expressions whose types the fact depends on; types are resolved during
/// inference, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Evidence {
    /// Explicit annotation. Overrides every other fact.
    Annotated(Type),
    /// Assigned a literal or container display.
    Literal(NodeId),
    Assigned(NodeId),
    /// Element `index` of a tuple-valued assignment.
    Unpacked { value: NodeId, index: usize },
    AugAssigned { op: BinOp, value: NodeId },
    /// Used as an operand of `op` against `partner`.
    Operand { op: BinOp, partner: NodeId, side: Side },
    /// Loop variable bound by iterating `iterable`; `index` selects a tuple
    /// component for `for k, v in ...`.
    Iterated { iterable: NodeId, index: Option<usize> },
    /// Positional argument passed at a call site (or operator dispatch).
    Argument { call: NodeId, value: NodeId },
    Default(NodeId),
    /// Bound by `with context as name`.
    Context(NodeId),
    /// Receiver of `.attr`.
    AttributeAccess { attr: String, node: NodeId },
    /// Container mutation: `xs.append(v)`, `s.add(v)`, `d[k] = v`.
    ElementAdded { key: Option<NodeId>, value: NodeId },
    /// Functions: `return value`.
    Returned(NodeId),
    /// Argument type observed at a call in another module.
    CrossModule(Type),
    /// Functions: bare `return` or falling off the end.
    ReturnedNone,
    /// Functions: called at this node.
    CallSite(NodeId),
    /// Classes: instantiated at this node.
    Instantiated(NodeId),
}

impl Evidence {
    pub fn is_literal(&self) -> bool {
        matches!(self, Evidence::Literal(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrUse {
    Load,
    Store { value: NodeId },
    Call { call: NodeId, args: Vec<NodeId> },
}

/// An `expr.attr` occurrence whose meaning depends on the receiver's type.
#[derive(Debug, Clone)]
pub struct AttrSite {
    /// The attribute expression itself.
    pub node: NodeId,
    pub receiver: NodeId,
    pub attr: String,
    pub usage: AttrUse,
    pub scope: ScopeId,
}

/// A container mutation whose receiver symbol is found during inference.
#[derive(Debug, Clone)]
pub struct MutationSite {
    pub receiver: NodeId,
    pub key: Option<NodeId>,
    pub value: NodeId,
}
