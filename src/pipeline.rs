//! Whole-program driver: parse, resolve, infer with cross-module evidence
//! merged at a barrier between rounds, decide representations, lower, emit.
//!
//! A fatal error in one module stops that module only; its siblings are
//! still translated.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::diagnostics::{CompileError, Diagnostic};
use crate::emit::{emit_module, EmitOptions, Emitted};
use crate::infer::{exports_of, Engine, ExternalKind, Externals, InferOptions};
use crate::lower::dispatch::operator_evidence;
use crate::lower::ir::{LModule, Repr};
use crate::lower::shapes::Shapes;
use crate::lower::{lower_module, LowerOptions};
use crate::parser::ast::Module;
use crate::parser::parse_module;
use crate::resolve::evidence::Evidence;
use crate::resolve::scope::{SymbolId, SymbolKind};
use crate::resolve::{resolve, Interfaces, ModuleInterface, SymbolTable};
use crate::types::Type;

#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Dotted module path, e.g. `symdiff.expr`.
    pub module: String,
    pub path: PathBuf,
    pub text: String,
}

impl SourceFile {
    pub fn new(module: &str, text: &str) -> Self {
        Self {
            module: module.to_string(),
            path: PathBuf::from(format!("{}.py", module.replace('.', "/"))),
            text: text.to_string(),
        }
    }

    pub fn read(root: &Path, path: &Path) -> Result<Self, CompileError> {
        let text = std::fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
        Ok(Self { module: module_name(root, path)?, path: path.to_path_buf(), text })
    }
}

/// `root/a/b.py` -> `a.b`; a package's `__init__.py` names the package.
pub fn module_name(root: &Path, path: &Path) -> Result<String, CompileError> {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.len() > 1 && parts.last().is_some_and(|p| p == "__init__") {
        parts.pop();
    }
    if parts.is_empty() || parts.iter().any(|p| p.is_empty() || p.contains('.')) {
        return Err(CompileError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "cannot derive a module name from this path"),
        ));
    }
    Ok(parts.join("."))
}

/// Python files named by `inputs`. Directories are searched recursively.
/// Without `root`, a directory is its own root and a file's root is its
/// parent directory.
pub fn collect_sources(inputs: &[PathBuf], root: Option<&Path>) -> Result<Vec<SourceFile>, CompileError> {
    let mut out = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let base = root.unwrap_or(input);
            let mut files = Vec::new();
            walk_python(input, &mut files)?;
            files.sort();
            for f in files {
                out.push(SourceFile::read(base, &f)?);
            }
        } else {
            let base = root.map(Path::to_path_buf).unwrap_or_else(|| {
                input.parent().map(Path::to_path_buf).unwrap_or_default()
            });
            out.push(SourceFile::read(&base, input)?);
        }
    }
    let mut seen = HashSet::new();
    out.retain(|s| seen.insert(s.module.clone()));
    Ok(out)
}

fn walk_python(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), CompileError> {
    let entries = std::fs::read_dir(dir).map_err(|e| CompileError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| CompileError::io(dir, e))?.path();
        if path.is_dir() {
            walk_python(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "py") {
            out.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Options {
    pub infer: InferOptions,
    /// Inference rounds with lowering feedback and cross-module merges.
    pub max_rounds: usize,
    pub lower: LowerOptions,
    pub emit: EmitOptions,
    pub workers: usize,
    /// Produce C++ text; off for `check` and the evaluator.
    pub emit_text: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Options {
    pub fn from_config(config: &Config) -> Self {
        Self {
            infer: config.infer_options(),
            max_rounds: config.max_rounds,
            lower: config.lower_options(),
            emit: config.emit_options(),
            workers: config.workers,
            emit_text: true,
        }
    }

    /// Stop typing after `n` rounds of `n` passes each, for inspecting
    /// intermediate typing stages.
    pub fn stage(mut self, n: usize) -> Self {
        let n = n.max(1);
        self.max_rounds = self.max_rounds.min(n);
        self.infer.max_passes = self.infer.max_passes.min(n);
        self
    }
}

/// Inferred type of one symbol, for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolType {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Type,
}

#[derive(Debug)]
pub struct ModuleOutput {
    pub lowered: LModule,
    pub emitted: Option<Emitted>,
    pub diagnostics: Vec<Diagnostic>,
    /// Exported signatures as other modules see them.
    pub exports: Externals,
    pub symbols: Vec<SymbolType>,
    pub passes: usize,
}

#[derive(Debug)]
pub struct ModuleResult {
    pub module: String,
    pub path: PathBuf,
    pub source: String,
    pub outcome: Result<ModuleOutput, CompileError>,
}

#[derive(Debug)]
pub struct Translation {
    pub modules: Vec<ModuleResult>,
    pub rounds: usize,
}

impl Translation {
    pub fn failed(&self) -> bool {
        self.modules.iter().any(|m| m.outcome.is_err())
    }

    pub fn module(&self, name: &str) -> Option<&ModuleResult> {
        self.modules.iter().find(|m| m.module == name)
    }

    /// Lowered modules of every successful translation.
    pub fn lowered(&self) -> Vec<LModule> {
        self.modules.iter().filter_map(|m| m.outcome.as_ref().ok()).map(|o| o.lowered.clone()).collect()
    }
}

/// Lower `sources` without emitting text; the first fatal error wins.
pub fn lower_sources(sources: &[SourceFile]) -> Result<Vec<LModule>, CompileError> {
    let options = Options { emit_text: false, ..Options::default() };
    let translation = translate(sources, &options);
    let mut out = Vec::new();
    for m in translation.modules {
        out.push(m.outcome?.lowered);
    }
    Ok(out)
}

/// Per-module state while typing is in progress.
struct Unit<'m> {
    index: usize,
    engine: Mutex<Engine<'m>>,
}

pub fn translate(sources: &[SourceFile], options: &Options) -> Translation {
    let workers = options.workers.max(1);
    let mut outcomes: Vec<Option<Result<ModuleOutput, CompileError>>> = sources.iter().map(|_| None).collect();

    let parsed: Vec<Result<Module, CompileError>> = par_map(workers, sources, |s| {
        let r = parse_module(&s.text, &s.module);
        tracing::debug!(module = %s.module, ok = r.is_ok(), "parsed");
        r
    });
    let mut modules: Vec<(usize, Module)> = Vec::new();
    for (i, r) in parsed.into_iter().enumerate() {
        match r {
            Ok(m) => modules.push((i, m)),
            Err(e) => outcomes[i] = Some(Err(e)),
        }
    }

    let interfaces: Interfaces = modules.iter().map(|(_, m)| (m.name.clone(), ModuleInterface::of(m))).collect();
    let forced = derived_elsewhere(&interfaces);

    let resolved: Vec<Result<SymbolTable, CompileError>> = par_map(workers, &modules, |(_, m)| {
        let r = resolve(m, &interfaces);
        tracing::debug!(module = %m.name, ok = r.is_ok(), "resolved");
        r
    });
    let mut units: Vec<Unit<'_>> = Vec::new();
    for ((index, module), table) in modules.iter().zip(resolved) {
        match table {
            Ok(table) => {
                units.push(Unit { index: *index, engine: Mutex::new(Engine::new(module, table, options.infer)) });
            }
            Err(e) => outcomes[*index] = Some(Err(e)),
        }
    }

    let rounds = infer_rounds(&units, options.max_rounds, workers);

    let typed: Vec<_> = units
        .into_iter()
        .map(|u| (u.index, u.engine.into_inner().unwrap_or_else(PoisonError::into_inner).finish()))
        .collect();
    let mut shapes: Vec<Shapes> = typed
        .iter()
        .map(|(_, t)| {
            let own = forced.get(&t.table.module).cloned().unwrap_or_default();
            Shapes::decide(&t.table, &t.facts, &t.externals, &HashMap::new(), &own)
        })
        .collect();
    let all_reprs: Vec<HashMap<String, Repr>> = shapes.iter().map(|s| s.repr.clone()).collect();
    for (i, s) in shapes.iter_mut().enumerate() {
        s.external = all_reprs
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .flat_map(|(_, r)| r.iter().map(|(k, v)| (k.clone(), *v)))
            .collect();
    }

    let jobs: Vec<_> = typed.iter().zip(&shapes).collect();
    let produced = par_map(workers, &jobs, |((_, t), shapes)| {
        let lowered = lower_module(t, shapes, &options.lower)?;
        let emitted = if options.emit_text { Some(emit_module(&lowered.module, &options.emit)?) } else { None };
        let mut diagnostics = t.diagnostics.clone();
        diagnostics.extend(lowered.diagnostics);
        Ok(ModuleOutput {
            lowered: lowered.module,
            emitted,
            diagnostics,
            exports: t.exports(),
            symbols: symbol_types(&t.table),
            passes: t.passes,
        })
    });
    for (((index, _), _), outcome) in jobs.iter().zip(produced) {
        if let Err(e) = &outcome {
            tracing::warn!(module = %sources[*index].module, error = %e, "module failed");
        }
        outcomes[*index] = Some(outcome);
    }

    let modules = sources
        .iter()
        .zip(outcomes)
        .map(|(s, outcome)| ModuleResult {
            module: s.module.clone(),
            path: s.path.clone(),
            source: s.text.clone(),
            outcome: outcome.unwrap_or_else(|| Err(CompileError::internal(format!("module '{}' was never translated", s.module)))),
        })
        .collect();
    Translation { modules, rounds }
}

/// Local classes that another module derives from, per module.
fn derived_elsewhere(interfaces: &Interfaces) -> HashMap<String, HashSet<String>> {
    let mut out: HashMap<String, HashSet<String>> = HashMap::new();
    for iface in interfaces.values() {
        for bases in iface.class_bases.values() {
            for base in bases {
                let Some((module, _)) = base.rsplit_once('.') else { continue };
                if module != iface.name && interfaces.contains_key(module) {
                    out.entry(module.to_string()).or_default().insert(base.clone());
                }
            }
        }
    }
    out
}

fn locked<'u, 'm>(unit: &'u Unit<'m>) -> MutexGuard<'u, Engine<'m>> {
    unit.engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs inference rounds until no module learns anything new. Each round
/// starts at the merge barrier: every engine receives the other modules'
/// current signatures and the argument types their calls pass in.
fn infer_rounds(units: &[Unit<'_>], max_rounds: usize, workers: usize) -> usize {
    let snapshot = || -> Vec<Externals> { units.iter().map(|u| exports_of(&locked(u).table)).collect() };
    let mut exports = snapshot();
    let mut rounds = 0;
    while rounds < max_rounds {
        rounds += 1;
        let merged = merge_barrier(units, &exports);
        let results = par_map(workers, units, |u| {
            let mut engine = locked(u);
            let convergence = engine.run();
            let feedback = operator_evidence(&engine);
            let added = engine.add_evidence(feedback);
            tracing::debug!(
                module = %engine.table.module,
                round = rounds,
                passes = convergence.passes,
                converged = convergence.converged,
                changed = added,
                "inference round"
            );
            added
        });
        let fresh = snapshot();
        let learned = merged + results.iter().sum::<usize>();
        let stable = fresh == exports;
        exports = fresh;
        tracing::debug!(round = rounds, learned, stable, "merge barrier");
        if learned == 0 && stable {
            break;
        }
    }
    rounds
}

/// Hands every engine the other modules' signatures and cross-module call
/// evidence. Returns how many evidence entries were new.
fn merge_barrier(units: &[Unit<'_>], exports: &[Externals]) -> usize {
    let names: Vec<String> = units.iter().map(|u| locked(u).table.module.clone()).collect();

    let mut calls: Vec<(usize, String, Vec<Type>)> = Vec::new();
    for caller in units {
        let engine = locked(caller);
        for call in &engine.table.external_calls {
            let Some(target) = names.iter().position(|n| *n == call.module) else { continue };
            let args = call.args.iter().map(|a| engine.type_of(*a)).collect();
            calls.push((target, call.name.clone(), args));
        }
    }

    let mut added = 0;
    for (i, unit) in units.iter().enumerate() {
        let mut engine = locked(unit);
        let mut externals = Externals::new();
        for (j, e) in exports.iter().enumerate() {
            if j != i {
                externals.extend(e.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        engine.set_externals(externals);
        let mut items = Vec::new();
        for (_, name, args) in calls.iter().filter(|(t, _, _)| *t == i) {
            for (param, ty) in callee_params(&engine.table, name).into_iter().zip(args) {
                if !ty.is_unknown() {
                    items.push((param, Evidence::CrossModule(ty.clone())));
                }
            }
        }
        added += engine.add_evidence(items);
    }
    added
}

/// Parameters receiving the arguments of a call to `name`: a function's
/// own, or a class's `__init__`.
fn callee_params(table: &SymbolTable, name: &str) -> Vec<SymbolId> {
    let Some(&id) = table.scope(table.module_scope()).names.get(name) else {
        return Vec::new();
    };
    let func = match table.symbol(id).kind {
        SymbolKind::Function => Some(id),
        SymbolKind::Class => table.lookup_method(id, "__init__"),
        _ => None,
    };
    func.and_then(|f| table.function(f)).map(|f| f.value_params().to_vec()).unwrap_or_default()
}

fn symbol_types(table: &SymbolTable) -> Vec<SymbolType> {
    let mut symbols: Vec<_> = table.symbols.iter().filter(|s| s.kind.is_inferred()).collect();
    symbols.sort_by_key(|s| (s.span.start, s.id));
    symbols
        .into_iter()
        .map(|s| {
            let name = match (s.kind, s.owner) {
                (SymbolKind::Parameter | SymbolKind::Variable, Some(owner)) => {
                    format!("{}.{}", table.qualified_name(owner), s.name)
                }
                _ => table.qualified_name(s.id),
            };
            SymbolType { name, kind: s.kind, ty: s.ty.clone() }
        })
        .collect()
}

/// Exported callable signature as `name(params) -> ret`.
pub fn signature(name: &str, kind: ExternalKind, ty: &Type, params: &[Type]) -> String {
    match kind {
        ExternalKind::Function | ExternalKind::Method => {
            let params = params.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            format!("{name}({params}) -> {ty}")
        }
        ExternalKind::Class => {
            let params = params.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            format!("class {name}({params})")
        }
        ExternalKind::Field | ExternalKind::Variable => format!("{name}: {ty}"),
    }
}

/// Maps `f` over `items` on up to `workers` threads, keeping input order.
fn par_map<T: Sync, R: Send>(workers: usize, items: &[T], f: impl Fn(&T) -> R + Sync) -> Vec<R> {
    if workers <= 1 || items.len() <= 1 {
        return items.iter().map(f).collect();
    }
    let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
    let (out_tx, out_rx) = crossbeam_channel::unbounded::<(usize, R)>();
    for i in 0..items.len() {
        let _ = job_tx.send(i);
    }
    drop(job_tx);
    std::thread::scope(|scope| {
        for _ in 0..workers.min(items.len()) {
            let (jobs, results, f) = (job_rx.clone(), out_tx.clone(), &f);
            scope.spawn(move || {
                for i in jobs.iter() {
                    let _ = results.send((i, f(&items[i])));
                }
            });
        }
    });
    drop(out_tx);
    let mut slots: Vec<Option<R>> = items.iter().map(|_| None).collect();
    for (i, r) in out_rx.try_iter() {
        slots[i] = Some(r);
    }
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Options {
        Options { workers: 2, ..Options::default() }
    }

    #[test]
    fn module_names_follow_the_package_layout() {
        let root = Path::new("/src");
        assert_eq!(module_name(root, Path::new("/src/symdiff/expr.py")).unwrap(), "symdiff.expr");
        assert_eq!(module_name(root, Path::new("/src/point.py")).unwrap(), "point");
        assert_eq!(module_name(root, Path::new("/src/pkg/__init__.py")).unwrap(), "pkg");
    }

    #[test]
    fn par_map_keeps_order() {
        let items: Vec<usize> = (0..50).collect();
        let doubled = par_map(4, &items, |i| i * 2);
        assert_eq!(doubled, items.iter().map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn a_failing_module_does_not_stop_its_siblings() {
        let sources = [
            SourceFile::new("good", "def f(x):\n    return x + 1\nprint(f(1))\n"),
            SourceFile::new("bad", "def g():\n    return missing_name\n"),
        ];
        let t = translate(&sources, &options());
        assert!(t.failed());
        assert!(t.module("good").is_some_and(|m| m.outcome.is_ok()));
        assert!(matches!(
            t.module("bad").map(|m| &m.outcome),
            Some(Err(CompileError::UnresolvedName { .. }))
        ));
    }

    #[test]
    fn syntax_errors_are_isolated_too() {
        let sources = [SourceFile::new("a", "def f(:\n"), SourceFile::new("b", "x = 1\n")];
        let t = translate(&sources, &options());
        assert!(matches!(t.modules[0].outcome, Err(CompileError::Syntax { .. })));
        assert!(t.modules[1].outcome.is_ok());
    }

    #[test]
    fn argument_types_cross_the_merge_barrier() {
        let sources = [
            SourceFile::new("geo", "def area(w, h):\n    return w * h\n"),
            SourceFile::new("app", "from geo import area\nprint(area(2.0, 3.0))\n"),
        ];
        let t = translate(&sources, &options());
        let geo = t.module("geo").and_then(|m| m.outcome.as_ref().ok()).unwrap();
        let area = geo.exports.get("geo.area").unwrap();
        assert_eq!(area.params, vec![Type::float(), Type::float()]);
        assert_eq!(area.ty, Type::float());
    }

    #[test]
    fn base_classes_used_by_other_modules_are_references() {
        let sources = [
            SourceFile::new("base", "class Shape:\n    def __init__(self, n):\n        self.n = n\n"),
            SourceFile::new(
                "derived",
                "from base import Shape\nclass Square(Shape):\n    def area(self):\n        return self.n * self.n\ns = Square(2)\nprint(s.area())\n",
            ),
        ];
        let t = translate(&sources, &options());
        let base = t.module("base").and_then(|m| m.outcome.as_ref().ok()).unwrap();
        assert_eq!(base.lowered.classes[0].repr, Repr::Reference);
    }

    #[test]
    fn emission_can_be_skipped() {
        let sources = [SourceFile::new("m", "x = 1\n")];
        let t = translate(&sources, &Options { emit_text: false, ..options() });
        assert!(t.modules[0].outcome.as_ref().is_ok_and(|o| o.emitted.is_none()));
        let t = translate(&sources, &options());
        assert!(t.modules[0].outcome.as_ref().is_ok_and(|o| o.emitted.is_some()));
    }

    #[test]
    fn stages_cap_rounds_and_passes() {
        let o = Options::default().stage(1);
        assert_eq!(o.max_rounds, 1);
        assert_eq!(o.infer.max_passes, 1);
    }

    #[test]
    fn symbol_report_names_locals_by_function() {
        let t = translate(&[SourceFile::new("m", "def f(a):\n    b = a + 1\n    return b\nf(1)\n")], &options());
        let out = t.modules[0].outcome.as_ref().unwrap();
        let names: Vec<&str> = out.symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"m.f.a"));
        assert!(names.contains(&"m.f.b"));
        assert!(out.symbols.iter().any(|s| s.name == "m.f" && s.ty == Type::int()));
    }

    #[test]
    fn directories_are_collected_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("main.py"), "y = 2\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let sources = collect_sources(&[dir.path().to_path_buf()], None).unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.module.as_str()).collect();
        assert_eq!(names, vec!["main", "pkg.a"]);
    }
}
