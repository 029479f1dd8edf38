mod common;
use common::{fixture_dir, tidec};

#[test]
fn translate_writes_header_and_source_per_module() {
    let out = tempfile::tempdir().unwrap();
    let result = tidec().arg("translate").arg(fixture_dir("shapes")).arg("-o").arg(out.path()).output().unwrap();
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));
    for file in ["geo/shape.h", "geo/shape.cpp", "geo/square.h", "geo/square.cpp", "main.h", "main.cpp"] {
        assert!(out.path().join(file).exists(), "missing {file}");
    }
    let header = std::fs::read_to_string(out.path().join("geo/square.h")).unwrap();
    assert!(header.contains("namespace geo::square {"));
}

#[test]
fn fatal_errors_exit_nonzero_with_location() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("bad.py");
    std::fs::write(&src, "def f():\n    return missing\n").unwrap();
    let result = tidec().arg("translate").arg(&src).arg("-o").arg(dir.path().join("out")).output().unwrap();
    assert_eq!(result.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("missing"), "{stderr}");
    assert!(!dir.path().join("out/bad.cpp").exists());
}

#[test]
fn json_diagnostics_are_machine_readable() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("loop.py");
    std::fs::write(&src, "def ping(n):\n    return pong(n)\ndef pong(n):\n    return ping(n)\nping(1)\n").unwrap();
    let result = tidec().args(["check", "--diagnostics", "json"]).arg(&src).env("RUST_LOG", "off").output().unwrap();
    assert!(result.status.success());
    let report: serde_json::Value = serde_json::from_slice(&result.stderr).unwrap();
    let diags = report[0]["diagnostics"].as_array().unwrap();
    assert!(diags.iter().any(|d| d["kind"] == "TypeInferenceDidNotConverge"));
    assert_eq!(report[0]["module"], "loop");
}

#[test]
fn check_prints_signatures_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("calc.py");
    std::fs::write(&src, "def area(w, h):\n    return w * h\narea(2.0, 3.0)\n").unwrap();
    let result = tidec().arg("check").arg(&src).output().unwrap();
    assert!(result.status.success());
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("calc.area(float, float) -> float"), "{stdout}");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn dump_types_lists_every_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("t.py");
    std::fs::write(&src, "def inc(v):\n    w = v + 1\n    return w\ntotal = inc(1)\n").unwrap();
    let result = tidec().arg("dump-types").arg(&src).output().unwrap();
    assert!(result.status.success());
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("t.inc.v: int"), "{stdout}");
    assert!(stdout.contains("t.inc.w: int"), "{stdout}");
    assert!(stdout.contains("t.total: int"), "{stdout}");
}

#[test]
fn config_file_is_read_from_the_source_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tide.toml"), "namespace_root = \"proj\"\n").unwrap();
    std::fs::write(dir.path().join("m.py"), "x = 1\n").unwrap();
    let out = dir.path().join("out");
    let result = tidec().arg("translate").arg(dir.path()).arg("-o").arg(&out).output().unwrap();
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));
    let header = std::fs::read_to_string(out.join("m.h")).unwrap();
    assert!(header.contains("namespace proj::m {"));
}

#[test]
fn bad_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tide.toml"), "max_passes = 0\n").unwrap();
    std::fs::write(dir.path().join("m.py"), "x = 1\n").unwrap();
    let result = tidec().arg("check").arg(dir.path()).output().unwrap();
    assert_eq!(result.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&result.stderr).contains("max_passes"));
}

#[test]
fn stage_limits_typing_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("s.py");
    std::fs::write(&src, "def a():\n    return b()\ndef b():\n    return c()\ndef c():\n    return 1\n").unwrap();
    let result = tidec().args(["dump-types", "--stage", "1"]).arg(&src).output().unwrap();
    assert!(result.status.success());
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("s.c: int"), "{stdout}");
    assert!(!stdout.contains("s.a: int"), "{stdout}");
}
