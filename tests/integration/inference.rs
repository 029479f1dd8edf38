mod common;
use common::{diagnostics_of, translate_one};

use tide::diagnostics::DiagnosticKind;
use tide::infer::{Engine, InferOptions};
use tide::parser::parse_module;
use tide::resolve::{resolve, Interfaces};
use tide::types::Type;

fn type_of(source: &str, name: &str) -> Type {
    let out = translate_one(source);
    out.symbols
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.ty.clone())
        .unwrap_or_else(|| panic!("no symbol {name}"))
}

#[test]
fn literals_type_variables() {
    let src = "a = 1\nb = 2.5\nc = 'text'\nd = True\n";
    assert_eq!(type_of(src, "m.a"), Type::int());
    assert_eq!(type_of(src, "m.b"), Type::float());
    assert_eq!(type_of(src, "m.c"), Type::str());
    assert_eq!(type_of(src, "m.d"), Type::boolean());
}

#[test]
fn arguments_and_returns_flow_through_calls() {
    let src = "def scale(v, k):\n    return v * k\nr = scale(2.0, 3)\n";
    assert_eq!(type_of(src, "m.scale.v"), Type::float());
    assert_eq!(type_of(src, "m.scale.k"), Type::int());
    assert_eq!(type_of(src, "m.scale"), Type::float());
    assert_eq!(type_of(src, "m.r"), Type::float());
}

#[test]
fn containers_refined_by_later_mutation() {
    let src = "xs = []\nxs.append(3)\nd = {}\nd['k'] = 1.5\n";
    assert_eq!(type_of(src, "m.xs"), Type::list(Type::int()));
    assert_eq!(type_of(src, "m.d"), Type::dict(Type::str(), Type::float()));
}

#[test]
fn source_order_chains_converge_in_one_sweep() {
    let module = parse_module("a = 1\nb = a\nc = b\nd = c\n", "m").unwrap();
    let table = resolve(&module, &Interfaces::new()).unwrap();
    let mut engine = Engine::new(&module, table, InferOptions::default());
    let c = engine.run();
    assert!(c.converged);
    // typing sweep, confirming sweep, weak sweep
    assert_eq!(c.passes, 3);
}

const CALLS_BACKWARD: &str =
    "def a():\n    return b()\ndef b():\n    return c()\ndef c():\n    return d()\ndef d():\n    return 1\n";

#[test]
fn backward_calls_converge_one_sweep_per_link() {
    let module = parse_module(CALLS_BACKWARD, "m").unwrap();
    let table = resolve(&module, &Interfaces::new()).unwrap();
    let mut engine = Engine::new(&module, table, InferOptions::default());
    let c = engine.run();
    assert!(c.converged);
    assert_eq!(c.passes, 6);
    assert_eq!(type_of(CALLS_BACKWARD, "m.a"), Type::int());
}

#[test]
fn mutual_recursion_degrades_with_diagnostic() {
    let src = "def ping(n):\n    return pong(n)\ndef pong(n):\n    return ping(n)\nping(1)\n";
    let diags = diagnostics_of(src, DiagnosticKind::TypeInferenceDidNotConverge);
    assert!(!diags.is_empty());
    assert!(diags.iter().any(|d| d.symbol.as_deref() == Some("m.ping")));
    assert_eq!(type_of(src, "m.ping"), Type::Dynamic);
}

#[test]
fn pass_cap_is_a_recoverable_diagnostic() {
    let module = parse_module(CALLS_BACKWARD, "m").unwrap();
    let table = resolve(&module, &Interfaces::new()).unwrap();
    let mut engine = Engine::new(&module, table, InferOptions { max_passes: 2 });
    assert!(!engine.run().converged);
    let typed = engine.finish();
    assert!(typed.diagnostics.iter().any(|d| d.kind == DiagnosticKind::TypeInferenceDidNotConverge));
}

#[test]
fn conflicting_evidence_becomes_union_then_dynamic() {
    let src = "def ident(v):\n    return v\nident(1)\nident('one')\n";
    assert!(matches!(type_of(src, "m.ident.v"), Type::Union(_) | Type::Dynamic));
}

#[test]
fn duck_typed_receiver_takes_the_only_matching_class() {
    let src = "class Circle:\n    def area(self):\n        return 3.0\ndef measure(shape):\n    return shape.area()\n";
    assert_eq!(type_of(src, "m.measure.shape"), Type::class("m.Circle"));
    assert_eq!(type_of(src, "m.measure"), Type::float());
}

#[test]
fn fields_take_constructor_argument_types() {
    let src = "class P:\n    def __init__(self, x, y):\n        self.x = x\n        self.y = y\np = P(1.0, 2)\n";
    assert_eq!(type_of(src, "m.P.x"), Type::float());
    assert_eq!(type_of(src, "m.P.y"), Type::int());
}

#[test]
fn unused_parameters_note_missing_evidence() {
    let diags = diagnostics_of("def f(unused):\n    return 1\n", DiagnosticKind::NoTypeEvidence);
    assert!(diags.iter().any(|d| d.message.contains("'unused'")));
}
