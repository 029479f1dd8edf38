//! Properties of the inference engine: types never lose specificity
//! between passes, acyclic programs settle within their longest dependency
//! chain, and symmetric operands have one canonical order.

use std::cmp::Ordering;

use proptest::prelude::*;
use tide::infer::operators::{canonical_key, operand_order, should_swap};
use tide::infer::{Engine, InferOptions};
use tide::parser::ast::{BinOp, Expr, ExprKind, NodeId};
use tide::parser::parse_module;
use tide::resolve::{resolve, Interfaces};
use tide::types::Type;

/// One numeric assignment per line: a literal, or an operator over earlier names.
#[derive(Debug, Clone)]
enum Line {
    Literal(bool, i64),
    Op(BinOp, usize, usize),
    OpLiteral(BinOp, usize, i64),
}

fn arb_op() -> impl Strategy<Value = BinOp> {
    prop_oneof![Just(BinOp::Add), Just(BinOp::Sub), Just(BinOp::Mul), Just(BinOp::Div)]
}

fn arb_program() -> impl Strategy<Value = Vec<Line>> {
    (1usize..10).prop_flat_map(|n| {
        let lines: Vec<_> = (0..n)
            .map(|i| {
                if i == 0 {
                    (any::<bool>(), -50i64..50).prop_map(|(k, v)| Line::Literal(k, v)).boxed()
                } else {
                    prop_oneof![
                        (any::<bool>(), -50i64..50).prop_map(|(k, v)| Line::Literal(k, v)),
                        (arb_op(), 0..i, 0..i).prop_map(|(op, a, b)| Line::Op(op, a, b)),
                        (arb_op(), 0..i, 1i64..9).prop_map(|(op, a, v)| Line::OpLiteral(op, a, v)),
                    ]
                    .boxed()
                }
            })
            .collect();
        lines
    })
}

fn symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        _ => "/",
    }
}

fn render(lines: &[Line]) -> String {
    let mut src = String::new();
    for (i, line) in lines.iter().enumerate() {
        let rhs = match line {
            Line::Literal(false, v) => v.to_string(),
            Line::Literal(true, v) => format!("{v}.5"),
            Line::Op(op, a, b) => format!("v{a} {} v{b}", symbol(*op)),
            Line::OpLiteral(op, a, v) => format!("v{a} {} {v}", symbol(*op)),
        };
        src.push_str(&format!("v{i} = {rhs}\n"));
    }
    src
}

/// Symbols on the longest dependency path ending at any line.
fn longest_chain(lines: &[Line]) -> usize {
    let mut depth: Vec<usize> = Vec::with_capacity(lines.len());
    for line in lines {
        let d = match line {
            Line::Literal(..) => 1,
            Line::Op(_, a, b) => 1 + depth[*a].max(depth[*b]),
            Line::OpLiteral(_, a, _) => 1 + depth[*a],
        };
        depth.push(d);
    }
    depth.into_iter().max().unwrap_or(0)
}

fn settled(t: &Type) -> bool {
    !t.is_unknown() && !t.is_dynamic()
}

fn lit(kind: ExprKind) -> Expr {
    Expr { id: NodeId(0), kind }
}

proptest! {
    #[test]
    fn types_never_lose_specificity(lines in arb_program()) {
        let src = render(&lines);
        let module = parse_module(&src, "m").unwrap();
        let table = resolve(&module, &Interfaces::new()).unwrap();
        let mut engine = Engine::new(&module, table, InferOptions::default());
        let mut previous: Vec<Type> = engine.table.symbols.iter().map(|s| s.ty.clone()).collect();
        for _ in 0..lines.len() + 2 {
            engine.pass(false);
            let current: Vec<Type> = engine.table.symbols.iter().map(|s| s.ty.clone()).collect();
            for (before, after) in previous.iter().zip(&current) {
                if settled(before) {
                    prop_assert!(settled(after), "{before} regressed to {after} in\n{src}");
                }
            }
            previous = current;
        }
    }

    #[test]
    fn acyclic_programs_settle_within_their_longest_chain(lines in arb_program()) {
        let src = render(&lines);
        let module = parse_module(&src, "m").unwrap();
        let table = resolve(&module, &Interfaces::new()).unwrap();
        let mut engine = Engine::new(&module, table, InferOptions::default());
        let chain = longest_chain(&lines);
        let mut changing = 0;
        while !engine.pass(false).is_empty() {
            changing += 1;
            prop_assert!(changing <= chain, "still changing after {changing} passes, chain {chain}, in\n{src}");
        }
        // every name refers back in source order, so one sweep types all of them
        prop_assert_eq!(changing, 1, "{}", src);
        let c = engine.run();
        prop_assert!(c.converged);
        prop_assert_eq!(c.passes, 2);
    }

    #[test]
    fn literal_operands_order_by_value(a in -1000i64..1000, b in -1000i64..1000) {
        let (x, y) = (lit(ExprKind::Int(a)), lit(ExprKind::Int(b)));
        prop_assert_eq!(operand_order(&x, &y), a.cmp(&b));
        prop_assert_eq!(operand_order(&x, &y), operand_order(&y, &x).reverse());
        prop_assert_eq!(should_swap(BinOp::Add, &x, &y), a > b);
        prop_assert!(!should_swap(BinOp::Sub, &x, &y));
    }

    #[test]
    fn literals_precede_names(v in -1000i64..1000, name in "[a-z]{1,6}") {
        let (x, n) = (lit(ExprKind::Int(v)), lit(ExprKind::Name(name)));
        prop_assert_eq!(operand_order(&x, &n), Ordering::Less);
        prop_assert!(should_swap(BinOp::Mul, &n, &x));
    }

    #[test]
    fn commutative_keys_ignore_operand_order(i in 0usize..4, j in 0usize..4) {
        let types = [Type::int(), Type::float(), Type::str(), Type::boolean()];
        let (l, r) = (&types[i], &types[j]);
        prop_assert_eq!(canonical_key(BinOp::Add, l, r), canonical_key(BinOp::Add, r, l));
        prop_assert_eq!(canonical_key(BinOp::Mul, l, r), canonical_key(BinOp::Mul, r, l));
    }
}
