mod common;
use common::{fixture_dir, run_project, translate_project};

use tide::interp::run_program;
use tide::lower::ir::Repr;
use tide::pipeline::{collect_sources, lower_sources};
use tide::types::Type;

#[test]
fn package_layout_gives_module_names() {
    let sources = collect_sources(&[fixture_dir("shapes")], None).unwrap();
    let names: Vec<&str> = sources.iter().map(|s| s.module.as_str()).collect();
    assert_eq!(names, vec!["geo", "geo.shape", "geo.square", "main"]);
}

#[test]
fn modules_translate_and_run_together() {
    let sources = collect_sources(&[fixture_dir("shapes")], None).unwrap();
    let modules = lower_sources(&sources).unwrap();
    let outcome = run_program(&modules, "main");
    assert!(outcome.result.is_ok(), "{:?}", outcome.result);
    assert_eq!(outcome.output, "13.0\nsquare: 4.0\n");
}

#[test]
fn classes_extended_elsewhere_are_references() {
    let sources = collect_sources(&[fixture_dir("shapes")], None).unwrap();
    let modules = lower_sources(&sources).unwrap();
    let shape = modules.iter().find(|m| m.name == "geo.shape").unwrap();
    assert_eq!(shape.classes[0].repr, Repr::Reference);
}

#[test]
fn call_site_evidence_crosses_modules() {
    let t = translate_project(&[
        ("util", "def mean(a, b):\n    return (a + b) / 2\n"),
        ("app", "from util import mean\nprint(mean(1.0, 3.0))\n"),
    ]);
    assert!(!t.failed());
    let util = t.module("util").unwrap().outcome.as_ref().unwrap();
    let mean = &util.exports["util.mean"];
    assert_eq!(mean.params, vec![Type::float(), Type::float()]);
    assert_eq!(mean.ty, Type::float());
    let app = t.module("app").unwrap().outcome.as_ref().unwrap();
    assert!(app.emitted.as_ref().unwrap().source.contains("util::mean(1.0, 3.0)"));
}

#[test]
fn return_types_flow_back_to_importers() {
    let out = run_project(
        &[
            ("counter", "class Counter:\n    def __init__(self):\n        self.n = 0\n    def bump(self):\n        self.n += 1\n        return self.n\n"),
            ("app", "from counter import Counter\nc = Counter()\nc.bump()\nprint(c.bump() * 10)\n"),
        ],
        "app",
    );
    assert_eq!(out, "20\n");
}

#[test]
fn one_broken_module_leaves_the_rest_translated() {
    let t = translate_project(&[
        ("ok", "def f():\n    return 1\n"),
        ("broken", "def g():\n    return nowhere\n"),
    ]);
    assert!(t.failed());
    assert!(t.module("ok").unwrap().outcome.as_ref().unwrap().emitted.is_some());
    assert!(t.module("broken").unwrap().outcome.is_err());
}
