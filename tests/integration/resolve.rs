mod common;
use common::fatal;

use tide::diagnostics::CompileError;
use tide::parser::parse_module;
use tide::resolve::scope::SymbolKind;
use tide::resolve::{resolve, Interfaces, ModuleInterface};

#[test]
fn unresolved_name_reports_identifier_and_position() {
    let src = "def area(w):\n    return w * height\n";
    let err = fatal(src);
    match &err {
        CompileError::UnresolvedName { name, span } => {
            assert_eq!(name, "height");
            assert_eq!(span.line_col(src), (2, 16));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn syntax_errors_are_fatal() {
    assert!(matches!(fatal("def f(:\n    pass\n"), CompileError::Syntax { .. }));
}

#[test]
fn every_name_binds_to_one_symbol() {
    let module = parse_module("x = 1\ndef f(a):\n    b = a + x\n    return b\nclass C:\n    def m(self):\n        return f(1)\n", "m").unwrap();
    let table = resolve(&module, &Interfaces::new()).unwrap();
    let kinds = |name: &str| table.symbols.iter().filter(|s| s.name == name).map(|s| s.kind).collect::<Vec<_>>();
    assert_eq!(kinds("x"), vec![SymbolKind::Variable]);
    assert_eq!(kinds("a"), vec![SymbolKind::Parameter]);
    assert_eq!(kinds("b"), vec![SymbolKind::Variable]);
    assert_eq!(kinds("f"), vec![SymbolKind::Function]);
    assert_eq!(kinds("C"), vec![SymbolKind::Class]);
    assert_eq!(kinds("m"), vec![SymbolKind::Method]);
}

#[test]
fn qualified_names_follow_module_and_class() {
    let module = parse_module("class Point:\n    def norm(self):\n        return 1.0\n", "geo.point").unwrap();
    let table = resolve(&module, &Interfaces::new()).unwrap();
    let norm = table.symbols.iter().find(|s| s.name == "norm").unwrap();
    assert_eq!(table.qualified_name(norm.id), "geo.point.Point.norm");
}

#[test]
fn imported_names_resolve_against_interfaces() {
    let lib = parse_module("def scale(v, k):\n    return v * k\nclass Box:\n    pass\n", "lib.util").unwrap();
    let mut interfaces = Interfaces::new();
    interfaces.insert("lib.util".into(), ModuleInterface::of(&lib));

    let app = parse_module("from lib.util import scale, Box\nimport lib.util as u\nb = Box()\nr = scale(2, 3)\ns = u.scale(1.0, 2.0)\n", "app").unwrap();
    let table = resolve(&app, &interfaces).unwrap();
    assert_eq!(table.external_calls.len(), 3);
    assert!(table.external_calls.iter().all(|c| c.module == "lib.util"));
    assert!(table.imported_modules.contains(&"lib.util".to_string()));
}

#[test]
fn importing_a_missing_name_is_unresolved() {
    let lib = parse_module("def scale(v):\n    return v\n", "lib").unwrap();
    let mut interfaces = Interfaces::new();
    interfaces.insert("lib".into(), ModuleInterface::of(&lib));
    let app = parse_module("from lib import rotate\n", "app").unwrap();
    assert!(matches!(resolve(&app, &interfaces), Err(CompileError::UnresolvedName { .. })));
}

#[test]
fn interfaces_record_qualified_bases() {
    let module = parse_module("class A:\n    pass\nclass B(A):\n    pass\n", "pkg.m").unwrap();
    let iface = ModuleInterface::of(&module);
    assert_eq!(iface.class_bases["pkg.m.B"], vec!["pkg.m.A".to_string()]);
}
