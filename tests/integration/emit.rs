mod common;
use common::{emit, fixture, translate_project};

use tide::emit::EmitOptions;
use tide::pipeline::{translate, Options, SourceFile};

#[test]
fn declaration_unit_is_guarded_and_namespaced() {
    let out = emit("def twice(n):\n    return n * 2\ntwice(4)\n");
    assert!(out.header.starts_with("#ifndef M_HEADER\n#define M_HEADER\n"));
    assert!(out.header.contains("#include \"kiwi\""));
    assert!(out.header.contains("namespace m {"));
    assert!(out.header.contains("int twice(int n);"));
    assert!(out.header.trim_end().ends_with("#endif // M_HEADER"));
    assert!(out.source.starts_with("#include \"m.h\""));
    assert!(out.source.contains("int twice(int n) {"));
}

#[test]
fn value_class_has_no_indirection() {
    let out = emit(&fixture("point.py"));
    assert!(out.header.contains("struct Point {"));
    assert!(!out.header.contains("std::shared_ptr<_Point>"));
    assert!(out.header.contains("Point operator+("));
    assert!(out.header.contains("static double distance("));
    assert!(out.source.contains("std::sqrt("));
    assert!(out.header.contains("#include <cmath>") || out.source.contains("#include <cmath>"));
}

#[test]
fn reference_hierarchy_uses_shared_handles_and_tags() {
    let out = emit(&fixture("symdiff.py"));
    assert!(out.header.contains("using Expression = std::shared_ptr<_Expression>;"));
    assert!(out.header.contains("struct _Scalar : _Expression {"));
    assert!(out.header.contains("enum class ExpressionKind {"));
    assert!(out.header.contains("virtual Expression eval() = 0;"));
    assert!(out.source.contains("std::make_shared<_Multiplication>("));
}

#[test]
fn entry_point_follows_the_initialiser() {
    let out = emit(&fixture("point.py"));
    let init = out.source.find("void __module_init__() {").unwrap();
    let main = out.source.find("int main(int argc, const char* argv[]) {").unwrap();
    assert!(init < main);
    assert!(out.source.contains("m::__module_init__();\n  return m::__main__(argc, argv);"));
}

#[test]
fn entry_point_can_be_suppressed() {
    let options = Options { emit: EmitOptions { emit_entry_point: false, ..EmitOptions::default() }, ..Options::default() };
    let t = translate(&[SourceFile::new("m", "if __name__ == '__main__':\n    print(1)\n")], &options);
    let out = t.modules[0].outcome.as_ref().unwrap().emitted.as_ref().unwrap();
    assert!(!out.source.contains("int main("));
    assert!(out.source.contains("int __main__(int argc, const char* argv[])"));
}

#[test]
fn containers_use_the_runtime_types() {
    let out = emit("names = ['a', 'b']\nscores = {}\nscores['a'] = 1.5\nseen = set()\nseen.add(3)\n");
    assert!(out.header.contains("extern kiwi::List<kiwi::String> names;"));
    assert!(out.header.contains("extern kiwi::Dict<kiwi::String, double> scores;"));
    assert!(out.header.contains("extern kiwi::Dict<int, bool> seen;"));
}

#[test]
fn unresolved_operands_dispatch_through_the_capability_interface() {
    let src = "def ping(n):\n    return pong(n)\ndef pong(n):\n    return ping(n)\nping(1)\n";
    let out = emit(src);
    assert!(out.header.contains("Any ping(int n);"));
    assert!(out.header.contains("struct Object"));
}

#[test]
fn scoped_resources_register_cleanup() {
    let src = "\
class Resource:
    def __init__(self, name):
        self.name = name

    def __enter__(self):
        return self

    def __exit__(self, a, b, c):
        print('closed', self.name)

def work():
    with Resource('db') as r:
        print(r.name)

work()
";
    let out = emit(src);
    assert!(out.source.contains("kiwi::defer"));
    assert!(out.source.contains("__exit__("));
}

#[test]
fn namespace_root_prefixes_every_namespace() {
    let options = Options {
        emit: EmitOptions { namespace_root: Some("app".into()), ..EmitOptions::default() },
        ..Options::default()
    };
    let t = translate(&[SourceFile::new("geo.point", "x = 1\n")], &options);
    let out = t.modules[0].outcome.as_ref().unwrap().emitted.as_ref().unwrap();
    assert!(out.header.contains("namespace app::geo::point {"));
    assert!(out.header.starts_with("#ifndef GEO_POINT_HEADER"));
}

#[test]
fn imported_modules_become_local_includes() {
    let t = translate_project(&[
        ("lib.mathx", "def square(v):\n    return v * v\n"),
        ("app", "import lib.mathx\nprint(lib.mathx.square(3))\n"),
    ]);
    let app = t.module("app").unwrap().outcome.as_ref().unwrap().emitted.as_ref().unwrap();
    assert!(app.header.contains("#include \"lib/mathx.h\""));
    assert!(app.source.contains("lib::mathx::square(3)"));
    assert!(app.source.contains("lib::mathx::__module_init__();"));
}
