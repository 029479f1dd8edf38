//! Operator sites resolved against user-defined dunders.
//!
//! Once operand types are known, `a + b` on a class operand is a call of
//! `__add__`: the other operand is an argument of that method. Lowering
//! feeds these facts back into inference between rounds.

use crate::infer::expr::Member;
use crate::infer::Engine;
use crate::parser::ast::{CmpOp, ExprKind};
use crate::resolve::evidence::Evidence;
use crate::resolve::scope::SymbolId;

/// Argument evidence for the parameters of dunders invoked by operators.
pub fn operator_evidence(engine: &Engine) -> Vec<(SymbolId, Evidence)> {
    let mut out = Vec::new();
    for id in &engine.index.order {
        let Some(e) = engine.index.get(*id) else { continue };
        match &e.node.kind {
            ExprKind::BinOp { op, left, right } => {
                let (lt, rt) = (engine.type_of(left.node.id), engine.type_of(right.node.id));
                if crate::infer::operators::primitive_binary(*op, &lt, &rt).is_some() {
                    continue;
                }
                if let Some(p) = lt.class_name().and_then(|c| dunder_param(engine, c, op.dunder())) {
                    out.push((p, Evidence::Argument { call: *id, value: right.node.id }));
                } else if let Some(p) = rt.class_name().and_then(|c| dunder_param(engine, c, op.reflected_dunder())) {
                    out.push((p, Evidence::Argument { call: *id, value: left.node.id }));
                }
            }
            ExprKind::Compare { op: CmpOp::In | CmpOp::NotIn, left, right } => {
                let container = engine.type_of(right.node.id);
                if let Some(p) = container.class_name().and_then(|c| dunder_param(engine, c, "__contains__")) {
                    out.push((p, Evidence::Argument { call: *id, value: left.node.id }));
                }
            }
            ExprKind::Compare { op, left, right } => {
                let Some(dunder) = op.dunder() else { continue };
                let lt = engine.type_of(left.node.id);
                let param = lt.class_name().and_then(|c| {
                    dunder_param(engine, c, dunder).or_else(|| {
                        // `!=` falls back to `__eq__`
                        (*op == CmpOp::NotEq).then(|| dunder_param(engine, c, "__eq__")).flatten()
                    })
                });
                if let Some(p) = param {
                    out.push((p, Evidence::Argument { call: *id, value: right.node.id }));
                }
            }
            ExprKind::Subscript { value, index } => {
                let container = engine.type_of(value.node.id);
                if let Some(p) = container.class_name().and_then(|c| dunder_param(engine, c, "__getitem__")) {
                    out.push((p, Evidence::Argument { call: *id, value: index.node.id }));
                }
            }
            _ => {}
        }
    }
    out
}

/// First value parameter of `class.dunder`, when defined locally.
fn dunder_param(engine: &Engine, class: &str, dunder: &str) -> Option<SymbolId> {
    match engine.member(class, dunder) {
        Member::Local(m) | Member::Downcast { symbol: m, .. } => {
            engine.table.function(m).and_then(|f| f.value_params().first().copied())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::InferOptions;
    use crate::parser::parse_module;
    use crate::resolve::{resolve, Interfaces};
    use crate::types::Type;

    #[test]
    fn dunder_parameter_typed_from_operator_partner() {
        let src = "class V:\n    def __init__(self, x):\n        self.x = x\n    def __add__(self, other):\n        return V(self.x + other.x)\na = V(1.0)\nb = a + V(2.0)\n";
        let module = parse_module(src, "m").unwrap();
        let table = resolve(&module, &Interfaces::new()).unwrap();
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        let evidence = operator_evidence(&engine);
        assert_eq!(evidence.len(), 1);
        assert!(engine.add_evidence(evidence) > 0);
        engine.run();
        let other = engine.table.symbols.iter().find(|s| s.name == "other").unwrap();
        assert_eq!(other.ty, Type::class("m.V"));
    }

    #[test]
    fn primitive_operators_add_nothing() {
        let module = parse_module("x = 1 + 2\ny = x < 3\n", "m").unwrap();
        let table = resolve(&module, &Interfaces::new()).unwrap();
        let mut engine = Engine::new(&module, table, InferOptions::default());
        engine.run();
        assert!(operator_evidence(&engine).is_empty());
    }
}
