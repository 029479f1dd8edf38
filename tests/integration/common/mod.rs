#![allow(dead_code)]

use std::path::PathBuf;
use std::process::Command;

use tide::diagnostics::{CompileError, Diagnostic, DiagnosticKind};
use tide::emit::Emitted;
use tide::interp::run_program;
use tide::lower::ir::LModule;
use tide::pipeline::{lower_sources, translate, ModuleOutput, Options, SourceFile, Translation};

pub fn tidec() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tidec"))
}

pub fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
}

pub fn fixture_dir(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Lower a single module named `m`.
pub fn lower(source: &str) -> LModule {
    match lower_sources(&[SourceFile::new("m", source)]) {
        Ok(mut modules) => modules.remove(0),
        Err(e) => panic!("lowering failed: {e}"),
    }
}

/// Translate a single module named `m` and return its output.
pub fn translate_one(source: &str) -> ModuleOutput {
    let options = Options { workers: 1, ..Options::default() };
    let mut t = translate(&[SourceFile::new("m", source)], &options);
    match t.modules.remove(0).outcome {
        Ok(out) => out,
        Err(e) => panic!("translation failed: {e}"),
    }
}

pub fn emit(source: &str) -> Emitted {
    translate_one(source).emitted.expect("emission enabled")
}

pub fn fatal(source: &str) -> CompileError {
    let options = Options { workers: 1, ..Options::default() };
    let mut t = translate(&[SourceFile::new("m", source)], &options);
    match t.modules.remove(0).outcome {
        Ok(_) => panic!("expected a fatal error"),
        Err(e) => e,
    }
}

pub fn diagnostics_of(source: &str, kind: DiagnosticKind) -> Vec<Diagnostic> {
    translate_one(source).diagnostics.into_iter().filter(|d| d.kind == kind).collect()
}

/// Translate several modules at once, `(module, source)` pairs.
pub fn translate_project(files: &[(&str, &str)]) -> Translation {
    let sources: Vec<SourceFile> = files.iter().map(|(m, s)| SourceFile::new(m, s)).collect();
    translate(&sources, &Options { emit_text: true, workers: 2, ..Options::default() })
}

/// Run `main` with the evaluator and return what it printed.
pub fn run_project(files: &[(&str, &str)], main: &str) -> String {
    let sources: Vec<SourceFile> = files.iter().map(|(m, s)| SourceFile::new(m, s)).collect();
    let modules = lower_sources(&sources).unwrap_or_else(|e| panic!("lowering failed: {e}"));
    let outcome = run_program(&modules, main);
    if let Err(e) = &outcome.result {
        panic!("program failed: {e}\noutput so far:\n{}", outcome.output);
    }
    outcome.output
}

pub fn run(source: &str) -> String {
    run_project(&[("m", source)], "m")
}
