use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::diagnostics::CompileError;
use crate::emit::EmitOptions;
use crate::infer::InferOptions;
use crate::lower::LowerOptions;

/// Name of the project configuration file looked up in the source root.
pub const CONFIG_FILE: &str = "tide.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Inference passes per round before giving up on a fixed point.
    pub max_passes: usize,
    /// Inference and lowering-feedback rounds across all modules.
    pub max_rounds: usize,
    pub runtime_header: String,
    pub namespace_root: Option<String>,
    pub emit_entry_point: bool,
    pub workers: usize,
    pub diagnostics: DiagnosticFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_passes: InferOptions::default().max_passes,
            max_rounds: 8,
            runtime_header: LowerOptions::default().runtime_header,
            namespace_root: None,
            emit_entry_point: true,
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
            diagnostics: DiagnosticFormat::Human,
        }
    }
}

/// Values given on the command line; each replaces the file's value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub max_passes: Option<usize>,
    pub max_rounds: Option<usize>,
    pub namespace_root: Option<String>,
    pub workers: Option<usize>,
    pub diagnostics: Option<DiagnosticFormat>,
}

impl Config {
    /// Load `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CompileError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| CompileError::config(format!("{CONFIG_FILE}: could not read file: {e}"), path.to_path_buf()))?;
        Self::parse(&content, path)
    }

    /// Look for `tide.toml` in `root`.
    pub fn discover(root: &Path) -> Result<Self, CompileError> {
        Self::load(&root.join(CONFIG_FILE))
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, CompileError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| CompileError::config(format!("{CONFIG_FILE}: {}", e.message()), path.to_path_buf()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), CompileError> {
        let bad = |msg: &str| Err(CompileError::config(format!("{CONFIG_FILE}: {msg}"), PathBuf::from(path)));
        if self.max_passes == 0 {
            return bad("max_passes must be at least 1");
        }
        if self.max_rounds == 0 {
            return bad("max_rounds must be at least 1");
        }
        if self.workers == 0 {
            return bad("workers must be at least 1");
        }
        if self.runtime_header.trim().is_empty() {
            return bad("runtime_header must not be empty");
        }
        Ok(())
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(n) = overrides.max_passes {
            self.max_passes = n.max(1);
        }
        if let Some(n) = overrides.max_rounds {
            self.max_rounds = n.max(1);
        }
        if let Some(root) = overrides.namespace_root {
            self.namespace_root = Some(root);
        }
        if let Some(n) = overrides.workers {
            self.workers = n.max(1);
        }
        if let Some(d) = overrides.diagnostics {
            self.diagnostics = d;
        }
        self
    }

    pub fn infer_options(&self) -> InferOptions {
        InferOptions { max_passes: self.max_passes }
    }

    pub fn lower_options(&self) -> LowerOptions {
        LowerOptions { runtime_header: self.runtime_header.clone() }
    }

    pub fn emit_options(&self) -> EmitOptions {
        EmitOptions { namespace_root: self.namespace_root.clone(), emit_entry_point: self.emit_entry_point }
    }
}
