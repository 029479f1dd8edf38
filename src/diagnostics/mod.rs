use crate::span::Span;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors: the module cannot be translated and produces no text.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Syntax error: {msg}")]
    Syntax { msg: String, span: Span },

    /// Well-formed source using a construct the translation has no
    /// static counterpart for.
    #[error("unsupported: {msg}")]
    Unsupported { msg: String, span: Span },

    #[error("unresolved name '{name}'")]
    UnresolvedName { name: String, span: Span },

    #[error("constant initialization cycle: {}", cycle.join(" -> "))]
    ConstantInitCycle { cycle: Vec<String>, span: Span },

    #[error("internal error: {msg}")]
    Internal { msg: String },

    #[error("Config error: {msg}")]
    Config { msg: String, path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    pub fn syntax(msg: impl Into<String>, span: Span) -> Self {
        Self::Syntax { msg: msg.into(), span }
    }

    pub fn unsupported(msg: impl Into<String>, span: Span) -> Self {
        Self::Unsupported { msg: msg.into(), span }
    }

    pub fn unresolved(name: impl Into<String>, span: Span) -> Self {
        Self::UnresolvedName { name: name.into(), span }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { msg: msg.into() }
    }

    pub fn config(msg: impl Into<String>, path: PathBuf) -> Self {
        Self::Config { msg: msg.into(), path }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Syntax { span, .. }
            | CompileError::Unsupported { span, .. }
            | CompileError::UnresolvedName { span, .. }
            | CompileError::ConstantInitCycle { span, .. } => Some(*span),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Note,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    TypeInferenceDidNotConverge,
    AmbiguousOperatorResolution,
    AmbiguousAttribute,
    NoTypeEvidence,
}

/// Recoverable finding attached to a translated module. The affected symbol
/// is emitted with the most generic representation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    pub symbol: Option<String>,
    pub span: Span,
}

impl Diagnostic {
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>, span: Span) -> Self {
        Self { kind, severity: Severity::Warning, message: message.into(), symbol: None, span }
    }

    pub fn note(kind: DiagnosticKind, message: impl Into<String>, span: Span) -> Self {
        Self { kind, severity: Severity::Note, message: message.into(), symbol: None, span }
    }

    pub fn for_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// Render a CompileError with ariadne for terminal output.
pub fn render_error(source: &str, filename: &str, err: &CompileError) {
    use ariadne::{Label, Report, ReportKind, Source};

    let Some(span) = err.span() else {
        eprintln!("error: {err}");
        return;
    };
    let label = match err {
        CompileError::Syntax { msg, .. } | CompileError::Unsupported { msg, .. } => msg.clone(),
        CompileError::UnresolvedName { name, .. } => format!("'{name}' is not defined in any enclosing scope"),
        CompileError::ConstantInitCycle { cycle, .. } => format!("initialization order cycle: {}", cycle.join(" -> ")),
        _ => err.to_string(),
    };
    let result = Report::build(ReportKind::Error, filename, span.start)
        .with_message(err.to_string())
        .with_label(Label::new((filename, span.start..span.end)).with_message(label))
        .finish()
        .eprint((filename, Source::from(source)));
    if result.is_err() {
        eprintln!("error: {err}");
    }
}

/// Render a recoverable diagnostic as a single located line.
pub fn render_diagnostic(source: &str, filename: &str, diag: &Diagnostic) -> String {
    let (line, col) = diag.span.line_col(source);
    let level = match diag.severity {
        Severity::Note => "note",
        Severity::Warning => "warning",
    };
    format!("{filename}:{line}:{col}: {level}[{:?}]: {}", diag.kind, diag.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_message_lists_path() {
        let err = CompileError::ConstantInitCycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
            span: Span::new(0, 1),
        };
        assert_eq!(err.to_string(), "constant initialization cycle: a -> b -> a");
        assert_eq!(err.span(), Some(Span::new(0, 1)));
    }

    #[test]
    fn unsupported_is_located() {
        let err = CompileError::unsupported("object() cannot be instantiated", Span::new(3, 11));
        assert_eq!(err.to_string(), "unsupported: object() cannot be instantiated");
        assert_eq!(err.span(), Some(Span::new(3, 11)));
    }

    #[test]
    fn internal_error_has_no_span() {
        let err = CompileError::internal("unresolved type reached emission");
        assert!(err.span().is_none());
        assert!(err.to_string().contains("unresolved type reached emission"));
    }

    #[test]
    fn render_diagnostic_includes_location() {
        let src = "a = 1\nb = f(a)\n";
        let diag = Diagnostic::warning(DiagnosticKind::NoTypeEvidence, "no evidence for 'b'", Span::new(6, 7));
        let line = render_diagnostic(src, "m.py", &diag);
        assert_eq!(line, "m.py:2:1: warning[NoTypeEvidence]: no evidence for 'b'");
    }

    #[test]
    fn diagnostic_serializes_to_json() {
        let diag = Diagnostic::note(DiagnosticKind::AmbiguousAttribute, "m", Span::new(1, 2)).for_symbol("x");
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("\"kind\":\"AmbiguousAttribute\""));
        assert!(json.contains("\"severity\":\"note\""));
        assert!(json.contains("\"symbol\":\"x\""));
    }
}
