//! Structured diagnostics. Components report into a [`Diagnostics`] sink and
//! keep going; rendering to the terminal is a separate step so tests and
//! embedders can inspect what was reported.

use colored::Colorize;

use crate::frontend::{FileSet, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Classification of an error diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ill-formed input
    Syntax,
    /// Redeclaration, unused names, mismatched arity
    Declaration,
    /// Incompatible conversion, overflow, truncation, wrong result type
    Type,
    /// Undefined names, illegal parameter names, numeric access on non-tuples
    Reference,
    /// Unknown architecture
    Config,
    /// Importer failure
    Import,
}

/// Diagnostic codes are opaque short ASCII strings.
pub mod codes {
    pub const E_UNUSED_VAR: &str = "E_UNUSED_VAR";
    pub const E_UNUSED_PARAM: &str = "E_UNUSED_PARAM";
    pub const E_UNUSED_FIELD: &str = "E_UNUSED_FIELD";
    pub const E_SUGGESTION: &str = "E_SUGGESTION";
    pub const E_BIND: &str = "E_BIND";
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: Option<ErrorKind>,
    pub span: Span,
    pub message: String,
    pub code: Option<&'static str>,
}

/// Collecting sink for diagnostics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    diags: Vec<Diagnostic>,
    errors: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, kind: ErrorKind, span: Span, message: impl Into<String>) {
        self.errors += 1;
        self.diags.push(Diagnostic {
            severity: Severity::Error,
            kind: Some(kind),
            span,
            message: message.into(),
            code: None,
        });
    }

    pub fn error_with_code(
        &mut self,
        kind: ErrorKind,
        span: Span,
        message: impl Into<String>,
        code: &'static str,
    ) {
        self.errors += 1;
        self.diags.push(Diagnostic {
            severity: Severity::Error,
            kind: Some(kind),
            span,
            message: message.into(),
            code: Some(code),
        });
    }

    pub fn warn(&mut self, span: Span, message: impl Into<String>, code: Option<&'static str>) {
        self.diags.push(Diagnostic {
            severity: Severity::Warning,
            kind: None,
            span,
            message: message.into(),
            code,
        });
    }

    pub fn info(&mut self, span: Span, message: impl Into<String>, code: Option<&'static str>) {
        self.diags.push(Diagnostic {
            severity: Severity::Info,
            kind: None,
            span,
            message: message.into(),
            code,
        });
    }

    /// Number of error-severity diagnostics reported so far. Consumers should
    /// check this before handing the AST to a back end.
    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.diags.iter()
    }

    /// All reported messages, in report order. Test helper.
    pub fn messages(&self) -> Vec<&str> {
        self.diags.iter().map(|d| d.message.as_str()).collect()
    }

    /// Renders every collected diagnostic to stderr, colored by severity.
    pub fn render(&self, files: &FileSet) {
        for d in self.iter() {
            let label = match d.severity {
                Severity::Error => "error".red().bold(),
                Severity::Warning => "warning".yellow().bold(),
                Severity::Info => "info".blue().bold(),
            };

            let location = files
                .position(d.span)
                .map(|p| format!("{}:{}:{}", p.file, p.line, p.col))
                .unwrap_or_else(|| "<unknown>".to_owned());

            match d.code {
                Some(code) => eprintln!(
                    "{label}: {} ({}) [{}]",
                    d.message,
                    location.white(),
                    code.dimmed()
                ),
                None => eprintln!("{label}: {} ({})", d.message, location.white()),
            }
        }
    }
}
