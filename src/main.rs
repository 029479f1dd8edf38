use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use tide::config::{Config, DiagnosticFormat, Overrides};
use tide::diagnostics::{render_diagnostic, render_error, CompileError};
use tide::pipeline::{collect_sources, signature, ModuleResult, Options, SourceFile, Translation};

#[derive(Parser)]
#[command(name = "tidec", version, about = "Translate typed-by-inference Python modules to C++")]
struct Cli {
    /// Log stage boundaries (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Human,
    Json,
}

impl From<Format> for DiagnosticFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Human => DiagnosticFormat::Human,
            Format::Json => DiagnosticFormat::Json,
        }
    }
}

#[derive(clap::Args)]
struct Common {
    /// Source root used to derive module names
    #[arg(long)]
    root: Option<PathBuf>,
    /// Config file (default: tide.toml in the source root)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Inference passes per round
    #[arg(long)]
    max_passes: Option<usize>,
    /// Stop after N typing rounds of N passes each
    #[arg(long)]
    stage: Option<usize>,
    /// Parallel module workers
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long, value_enum)]
    diagnostics: Option<Format>,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate modules and write a header and source file per module
    Translate {
        /// Python files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory
        #[arg(short, long, default_value = "out")]
        output: PathBuf,
        /// Prefix for every generated namespace
        #[arg(long)]
        namespace_root: Option<String>,
        #[command(flatten)]
        common: Common,
    },
    /// Type and lower modules without writing anything
    Check {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        common: Common,
    },
    /// Print the inferred type of every symbol
    DumpTypes {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        common: Common,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    };
    std::process::exit(code);
}

fn run(command: Commands) -> Result<i32, CompileError> {
    match command {
        Commands::Translate { inputs, output, namespace_root, common } => {
            let (sources, config, options) = prepare(&inputs, &common, namespace_root)?;
            let translation = tide::translate(&sources, &options);
            report(&translation, config.diagnostics);
            for m in &translation.modules {
                if let Ok(out) = &m.outcome
                    && let Some(emitted) = &out.emitted
                {
                    write_file(&output.join(&emitted.header_path), &emitted.header)?;
                    write_file(&output.join(&emitted.source_path), &emitted.source)?;
                    tracing::info!(module = %m.module, dir = %output.display(), "written");
                }
            }
            Ok(exit_code(&translation))
        }
        Commands::Check { inputs, common } => {
            let (sources, config, options) = prepare(&inputs, &common, None)?;
            let translation = tide::translate(&sources, &Options { emit_text: false, ..options });
            report(&translation, config.diagnostics);
            for m in &translation.modules {
                let Ok(out) = &m.outcome else { continue };
                println!("{}:", m.module);
                for (name, sym) in &out.exports {
                    println!("  {}", signature(name, sym.kind, &sym.ty, &sym.params));
                }
            }
            Ok(exit_code(&translation))
        }
        Commands::DumpTypes { inputs, common } => {
            let (sources, config, options) = prepare(&inputs, &common, None)?;
            let translation = tide::translate(&sources, &Options { emit_text: false, ..options });
            report(&translation, config.diagnostics);
            for m in &translation.modules {
                let Ok(out) = &m.outcome else { continue };
                for sym in &out.symbols {
                    println!("{}: {}", sym.name, sym.ty);
                }
            }
            Ok(exit_code(&translation))
        }
    }
}

fn prepare(
    inputs: &[PathBuf],
    common: &Common,
    namespace_root: Option<String>,
) -> Result<(Vec<SourceFile>, Config, Options), CompileError> {
    let config_path = match (&common.config, &common.root) {
        (Some(path), _) => path.clone(),
        (None, Some(root)) => root.join(tide::config::CONFIG_FILE),
        (None, None) => default_root(inputs).join(tide::config::CONFIG_FILE),
    };
    let config = Config::load(&config_path)?.apply(Overrides {
        max_passes: common.max_passes,
        max_rounds: None,
        namespace_root,
        workers: common.workers,
        diagnostics: common.diagnostics.map(Into::into),
    });
    let mut options = Options::from_config(&config);
    if let Some(n) = common.stage {
        options = options.stage(n);
    }
    let sources = collect_sources(inputs, common.root.as_deref())?;
    tracing::debug!(modules = sources.len(), workers = options.workers, "sources collected");
    Ok((sources, config, options))
}

fn default_root(inputs: &[PathBuf]) -> PathBuf {
    match inputs.first() {
        Some(p) if p.is_dir() => p.clone(),
        Some(p) => p.parent().map(Path::to_path_buf).unwrap_or_default(),
        None => PathBuf::from("."),
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), CompileError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CompileError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| CompileError::io(path, e))
}

fn report(translation: &Translation, format: DiagnosticFormat) {
    match format {
        DiagnosticFormat::Human => {
            for m in &translation.modules {
                report_human(m);
            }
        }
        DiagnosticFormat::Json => {
            let entries: Vec<serde_json::Value> = translation.modules.iter().map(report_json).collect();
            match serde_json::to_string_pretty(&entries) {
                Ok(text) => eprintln!("{text}"),
                Err(e) => eprintln!("error: could not serialize diagnostics: {e}"),
            }
        }
    }
}

fn report_human(m: &ModuleResult) {
    let filename = m.path.to_string_lossy();
    match &m.outcome {
        Ok(out) => {
            for d in &out.diagnostics {
                eprintln!("{}", render_diagnostic(&m.source, &filename, d));
            }
        }
        Err(err) => render_error(&m.source, &filename, err),
    }
}

fn report_json(m: &ModuleResult) -> serde_json::Value {
    match &m.outcome {
        Ok(out) => serde_json::json!({
            "module": m.module,
            "path": m.path,
            "ok": true,
            "passes": out.passes,
            "diagnostics": out.diagnostics,
        }),
        Err(err) => {
            let location = err.span().map(|s| {
                let (line, col) = s.line_col(&m.source);
                serde_json::json!({ "line": line, "column": col })
            });
            serde_json::json!({
                "module": m.module,
                "path": m.path,
                "ok": false,
                "error": err.to_string(),
                "location": location,
            })
        }
    }
}

fn exit_code(translation: &Translation) -> i32 {
    if translation.failed() { 1 } else { 0 }
}
