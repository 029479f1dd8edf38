//! Recognition of structural `__eq__` bodies.
//!
//! An equality method built from an identity shortcut, class tests on the
//! other operand and field-by-field comparisons is rewritten into a fixed
//! order: identity guard, tag guard, one downcast, then the field
//! conjunction.

use crate::parser::ast::{BoolOp, CmpOp, Expr, ExprKind, FunctionDef, Stmt, UnaryOp};
use crate::span::Spanned;

#[derive(Debug, Clone, PartialEq)]
pub enum TagSpec {
    /// `isinstance(other, A)` (or a tuple of classes); names as written.
    Classes(Vec<String>),
    /// `type(self) == type(other)`.
    SameAsSelf,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EqShape {
    pub identity: bool,
    pub tags: Option<TagSpec>,
    /// Compared fields in source order.
    pub fields: Vec<String>,
}

/// Shape of `def __eq__(self, other)`, or `None` when the body does
/// anything beyond identity, class and field tests.
pub fn analyze(f: &FunctionDef) -> Option<EqShape> {
    let [me, other] = f.params.as_slice() else { return None };
    let (me, other) = (me.name.node.as_str(), other.name.node.as_str());
    let mut shape = EqShape::default();
    let (last, init) = f.body.split_last()?;
    let ends_false = returned_bool(std::slice::from_ref(last)) == Some(false);

    for (i, stmt) in init.iter().enumerate() {
        let Stmt::If { condition, then_body, else_body } = &stmt.node else { return None };
        if !else_body.is_empty() {
            return None;
        }
        if returned_bool(then_body) == Some(true) && is_identity(condition, me, other) {
            shape.identity = true;
            continue;
        }
        if returned_bool(then_body) == Some(false) {
            match &condition.node.kind {
                ExprKind::UnaryOp { op: UnaryOp::Not, operand } => shape.tags = Some(class_test(operand, me, other)?),
                ExprKind::Compare { op: CmpOp::NotEq, left, right } if same_type(left, right, me, other) => {
                    shape.tags = Some(TagSpec::SameAsSelf);
                }
                _ => return None,
            }
            continue;
        }
        // the positive form: one guarded success path, then `return False`
        if i + 1 != init.len() || !ends_false {
            return None;
        }
        conjunction(condition, me, other, &mut shape)?;
        match then_body.as_slice() {
            [Spanned { node: Stmt::Return(Some(value)), .. }] => conjunction(value, me, other, &mut shape)?,
            [Spanned { node: Stmt::If { condition, then_body, else_body }, .. }]
                if else_body.is_empty() && returned_bool(then_body) == Some(true) =>
            {
                conjunction(condition, me, other, &mut shape)?
            }
            _ => return None,
        }
        return Some(shape);
    }

    let Stmt::Return(Some(value)) = &last.node else { return None };
    conjunction(value, me, other, &mut shape)?;
    Some(shape)
}

fn returned_bool(body: &[Spanned<Stmt>]) -> Option<bool> {
    let [only] = body else { return None };
    match &only.node {
        Stmt::Return(Some(Spanned { node: Expr { kind: ExprKind::Bool(b), .. }, .. })) => Some(*b),
        _ => None,
    }
}

fn conjunction(e: &Spanned<Expr>, me: &str, other: &str, shape: &mut EqShape) -> Option<()> {
    match &e.node.kind {
        ExprKind::BoolOp { op: BoolOp::And, left, right } => {
            conjunction(left, me, other, shape)?;
            conjunction(right, me, other, shape)
        }
        ExprKind::Bool(true) => Some(()),
        ExprKind::Compare { op: CmpOp::Is, .. } if is_identity(e, me, other) => {
            shape.identity = true;
            Some(())
        }
        ExprKind::Compare { op: CmpOp::Eq, left, right } => {
            if same_type(left, right, me, other) {
                shape.tags = Some(TagSpec::SameAsSelf);
                return Some(());
            }
            let field = field_pair(left, right, me, other)?;
            shape.fields.push(field);
            Some(())
        }
        _ => {
            shape.tags = Some(class_test(e, me, other)?);
            Some(())
        }
    }
}

fn is_identity(e: &Spanned<Expr>, me: &str, other: &str) -> bool {
    match &e.node.kind {
        ExprKind::Compare { op: CmpOp::Is, left, right } => {
            let names = (left.node.name(), right.node.name());
            names == (Some(me), Some(other)) || names == (Some(other), Some(me))
        }
        _ => false,
    }
}

/// `isinstance(other, C)`, `isinstance(other, (A, B))` or
/// `isinstance(other, type(self))`.
fn class_test(e: &Spanned<Expr>, me: &str, other: &str) -> Option<TagSpec> {
    let ExprKind::Call { func, args } = &e.node.kind else { return None };
    if func.node.name() != Some("isinstance") {
        return None;
    }
    let [subject, classes] = args.as_slice() else { return None };
    if subject.node.name() != Some(other) {
        return None;
    }
    match &classes.node.kind {
        ExprKind::Tuple(items) => items.iter().map(|i| i.node.dotted_path()).collect::<Option<Vec<_>>>().map(TagSpec::Classes),
        ExprKind::Call { func, args } if func.node.name() == Some("type") && args.len() == 1 && args[0].node.name() == Some(me) => {
            Some(TagSpec::SameAsSelf)
        }
        _ => classes.node.dotted_path().map(|c| TagSpec::Classes(vec![c])),
    }
}

/// `type(self)` against `type(other)`, either order.
fn same_type(left: &Spanned<Expr>, right: &Spanned<Expr>, me: &str, other: &str) -> bool {
    let arg_of_type = |e: &Spanned<Expr>| match &e.node.kind {
        ExprKind::Call { func, args } if func.node.name() == Some("type") && args.len() == 1 => {
            args[0].node.name().map(str::to_string)
        }
        _ => None,
    };
    match (arg_of_type(left), arg_of_type(right)) {
        (Some(a), Some(b)) => (a == me && b == other) || (a == other && b == me),
        _ => false,
    }
}

/// `self.f == other.f`, either order; the field name.
fn field_pair(left: &Spanned<Expr>, right: &Spanned<Expr>, me: &str, other: &str) -> Option<String> {
    let field = |e: &Spanned<Expr>| match &e.node.kind {
        ExprKind::Attribute { value, attr } => value.node.name().map(|n| (n.to_string(), attr.node.clone())),
        _ => None,
    };
    let (a, b) = (field(left)?, field(right)?);
    if a.1 != b.1 {
        return None;
    }
    let ok = (a.0 == me && b.0 == other) || (a.0 == other && b.0 == me);
    ok.then_some(a.1)
}
