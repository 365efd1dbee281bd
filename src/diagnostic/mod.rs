pub mod json;

use crate::error::{CompileError, Error};
use crate::reader::ReadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    /// Compiler defects are reported as bugs, not as mistakes in the source.
    Bug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Maps byte offsets to 1-based (line, column) pairs.
pub struct SourceMap {
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(source.bytes().enumerate().filter(|(_, b)| *b == b'\n').map(|(i, _)| i + 1));
        SourceMap { line_starts }
    }

    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        (line + 1, offset.saturating_sub(self.line_starts[line]) + 1)
    }
}

// ── From impls ───────────────────────────────────────────────────────

impl From<&ReadError> for Diagnostic {
    fn from(e: &ReadError) -> Self {
        let mut d = Diagnostic::error(e.to_string()).with_code("KILN-R001");
        if let ReadError::Lex(lex) = e {
            d = d.with_span(Span { start: lex.position, end: lex.position + lex.snippet.len().max(1) }, "here");
            d = d.with_suggestion(lex.suggestion.clone());
        } else if let Some(position) = e.position() {
            d = d.with_span(Span { start: position, end: position + 1 }, "here");
        }
        d
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let code = match e {
            CompileError::Encode(_) => "KILN-C001",
            CompileError::Verify(_) => "KILN-C002",
            CompileError::Internal(_) => "KILN-C003",
        };
        let mut d = Diagnostic::error(e.to_string()).with_code(code);
        if e.is_bug() {
            d.severity = Severity::Bug;
            d = d.with_note("the compiler produced invalid code; this is a defect in kiln");
        }
        d
    }
}

impl From<&Error> for Diagnostic {
    fn from(e: &Error) -> Self {
        match e {
            Error::Read(e) => Diagnostic::from(e),
            Error::Compile(e) => Diagnostic::from(e),
            Error::Runtime(e) => Diagnostic::error(e.to_string()).with_code("KILN-V001"),
            Error::Config(e) => Diagnostic::error(e.to_string())
                .with_code("KILN-O001")
                .with_suggestion("known keys: optimize, inline, inline_max_body, inline_budget, verify, max_call_depth"),
            Error::Io(e) => Diagnostic::error(e.to_string()).with_code("KILN-O002"),
        }
    }
}
