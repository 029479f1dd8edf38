pub mod span;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod types;
pub mod resolve;
pub mod infer;
pub mod lower;
pub mod emit;
pub mod interp;
pub mod config;
pub mod pipeline;

use diagnostics::CompileError;
use emit::Emitted;
use pipeline::{Options, SourceFile};

pub use pipeline::{translate, Translation};

/// Translate one standalone module to its header and source text.
/// Useful for tests that need nothing from other modules.
pub fn translate_str(source: &str, module: &str) -> Result<Emitted, CompileError> {
    let options = Options { workers: 1, ..Options::default() };
    let mut translation = translate(&[SourceFile::new(module, source)], &options);
    let result = translation.modules.pop().ok_or_else(|| CompileError::internal("no module was translated"))?;
    result.outcome?.emitted.ok_or_else(|| CompileError::internal("emission was skipped"))
}
