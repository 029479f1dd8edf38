//! Operator signature table for builtin operand types, and the canonical
//! operand order for symmetric operators.

use std::cmp::Ordering;

use crate::parser::ast::{BinOp, Expr, ExprKind, UnaryOp};
use crate::types::{Head, ScalarKind, Type};

/// Result of `l op r` when both operands are scalars or containers.
/// `None` when the operator is not defined on builtin types.
pub fn primitive_binary(op: BinOp, l: &Type, r: &Type) -> Option<Type> {
    match (l, r) {
        (Type::Scalar(a), Type::Scalar(b)) if a.is_numeric() && b.is_numeric() => {
            let wider = if a == b { *a } else { l.join(r, &crate::types::FlatHierarchy).scalar()? };
            let arith = if wider == ScalarKind::Bool { ScalarKind::Int } else { wider };
            Some(Type::Scalar(match op {
                BinOp::Div => ScalarKind::Float,
                BinOp::Pow if arith == ScalarKind::Int => ScalarKind::Int,
                BinOp::Pow => ScalarKind::Float,
                _ => arith,
            }))
        }
        (Type::Scalar(ScalarKind::Str), Type::Scalar(ScalarKind::Str)) if op == BinOp::Add => Some(Type::str()),
        (Type::Scalar(ScalarKind::Str), Type::Scalar(ScalarKind::Int | ScalarKind::Bool))
        | (Type::Scalar(ScalarKind::Int | ScalarKind::Bool), Type::Scalar(ScalarKind::Str))
            if op == BinOp::Mul =>
        {
            Some(Type::str())
        }
        (Type::Scalar(ScalarKind::Str), _) if op == BinOp::Mod => Some(Type::str()),
        (Type::Nominal(a), Type::Nominal(b)) if a.head == Head::List && b.head == Head::List && op == BinOp::Add => {
            Some(l.join(r, &crate::types::FlatHierarchy))
        }
        (Type::Nominal(a), Type::Scalar(ScalarKind::Int)) if a.head == Head::List && op == BinOp::Mul => Some(l.clone()),
        _ => None,
    }
}

pub fn primitive_unary(op: UnaryOp, t: &Type) -> Option<Type> {
    match (op, t) {
        (UnaryOp::Not, _) => Some(Type::boolean()),
        (_, Type::Scalar(ScalarKind::Bool)) => Some(Type::int()),
        (_, Type::Scalar(k)) if k.is_numeric() => Some(t.clone()),
        _ => None,
    }
}

/// Type suggested for an operand whose partner is the scalar `partner`.
pub fn scalar_partner(op: BinOp, partner: ScalarKind) -> Option<Type> {
    match partner {
        ScalarKind::Str if op == BinOp::Mul => Some(Type::int()),
        ScalarKind::Str if op == BinOp::Add => Some(Type::str()),
        ScalarKind::Bool => Some(Type::int()),
        k if k.is_numeric() => Some(Type::Scalar(k)),
        _ => None,
    }
}

/// Stable per-kind rank: literals first, then names, attribute loads,
/// everything else.
pub fn operand_rank(e: &Expr) -> u8 {
    match &e.kind {
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) => 0,
        ExprKind::Str(_) | ExprKind::NoneLit => 1,
        ExprKind::Name(_) => 2,
        ExprKind::Attribute { .. } => 3,
        ExprKind::UnaryOp { .. } => 4,
        ExprKind::BinOp { .. } => 5,
        _ => 6,
    }
}

fn numeric_value(e: &Expr) -> Option<f64> {
    match &e.kind {
        ExprKind::Int(v) => Some(*v as f64),
        ExprKind::Float(v) => Some(*v),
        ExprKind::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

/// Canonical order of two operands: per-kind rank, then numeric value for
/// two scalar literals, lower first.
pub fn operand_order(a: &Expr, b: &Expr) -> Ordering {
    operand_rank(a).cmp(&operand_rank(b)).then_with(|| match (numeric_value(a), numeric_value(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    })
}

/// Free of side effects, so evaluation order does not matter.
fn is_pure(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Str(_) | ExprKind::NoneLit => true,
        ExprKind::Name(_) => true,
        ExprKind::Attribute { value, .. } => is_pure(&value.node),
        ExprKind::UnaryOp { operand, .. } => is_pure(&operand.node),
        ExprKind::BinOp { left, right, .. } => is_pure(&left.node) && is_pure(&right.node),
        _ => false,
    }
}

/// Should the operands of a primitive `l op r` be swapped into canonical
/// order? Only commutative operators over pure operands are reordered.
pub fn should_swap(op: BinOp, l: &Expr, r: &Expr) -> bool {
    op.is_commutative() && is_pure(l) && is_pure(r) && operand_order(l, r) == Ordering::Greater
}

/// Key for memoising operator results: commutative operand types sorted.
pub fn canonical_key(op: BinOp, l: &Type, r: &Type) -> (BinOp, Type, Type) {
    if op.is_commutative() && r < l { (op, r.clone(), l.clone()) } else { (op, l.clone(), r.clone()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::NodeId;

    fn lit(kind: ExprKind) -> Expr {
        Expr { id: NodeId(0), kind }
    }

    #[test]
    fn numeric_arithmetic() {
        assert_eq!(primitive_binary(BinOp::Add, &Type::int(), &Type::int()), Some(Type::int()));
        assert_eq!(primitive_binary(BinOp::Add, &Type::int(), &Type::float()), Some(Type::float()));
        assert_eq!(primitive_binary(BinOp::Div, &Type::int(), &Type::int()), Some(Type::float()));
        assert_eq!(primitive_binary(BinOp::Pow, &Type::int(), &Type::int()), Some(Type::int()));
        assert_eq!(primitive_binary(BinOp::Add, &Type::boolean(), &Type::boolean()), Some(Type::int()));
    }

    #[test]
    fn string_and_list_operators() {
        assert_eq!(primitive_binary(BinOp::Add, &Type::str(), &Type::str()), Some(Type::str()));
        assert_eq!(primitive_binary(BinOp::Mul, &Type::str(), &Type::int()), Some(Type::str()));
        assert_eq!(primitive_binary(BinOp::Sub, &Type::str(), &Type::str()), None);
        let xs = Type::list(Type::int());
        assert_eq!(primitive_binary(BinOp::Add, &xs, &xs), Some(xs.clone()));
        assert_eq!(primitive_binary(BinOp::Add, &Type::class("m.P"), &Type::int()), None);
    }

    #[test]
    fn unary() {
        assert_eq!(primitive_unary(UnaryOp::Neg, &Type::float()), Some(Type::float()));
        assert_eq!(primitive_unary(UnaryOp::Not, &Type::class("m.P")), Some(Type::boolean()));
        assert_eq!(primitive_unary(UnaryOp::Neg, &Type::class("m.P")), None);
    }

    #[test]
    fn literals_order_before_names_and_by_value() {
        let two = lit(ExprKind::Int(2));
        let three = lit(ExprKind::Float(3.0));
        let x = lit(ExprKind::Name("x".into()));
        assert_eq!(operand_order(&two, &x), Ordering::Less);
        assert_eq!(operand_order(&three, &two), Ordering::Greater);
        assert!(should_swap(BinOp::Mul, &x, &two));
        assert!(!should_swap(BinOp::Sub, &x, &two));
        assert!(should_swap(BinOp::Add, &three, &two));
    }

    #[test]
    fn canonical_key_is_symmetric_for_commutative_ops() {
        let a = canonical_key(BinOp::Add, &Type::float(), &Type::int());
        let b = canonical_key(BinOp::Add, &Type::int(), &Type::float());
        assert_eq!(a, b);
        let c = canonical_key(BinOp::Sub, &Type::float(), &Type::int());
        assert_ne!(c.1, a.1);
    }
}
