pub mod ansi;
pub mod json;
pub mod registry;

use std::fmt;
use std::ops::Range;

use crate::compiler::{CompileError, CompileErrorKind};
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::vm::{RuntimeError, RuntimeErrorKind};

/// Pipeline stage an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lex,
    Parse,
    Compile,
    Runtime,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Lex => "lex",
            Stage::Parse => "parse",
            Stage::Compile => "compile",
            Stage::Runtime => "runtime",
        })
    }
}

/// Where a diagnostic points: a 1-based line and, when known, the byte
/// range within the source.
#[derive(Debug, Clone)]
pub struct Label {
    pub line: u32,
    pub span: Option<Range<usize>>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub stage: Stage,
    pub code: Option<&'static str>,
    pub message: String,
    pub label: Option<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(stage: Stage, message: impl Into<String>) -> Self {
        Diagnostic {
            stage,
            code: None,
            message: message.into(),
            label: None,
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    /// Point at a line. Line 0 means unknown and adds no label.
    pub fn with_line(mut self, line: u32, label: impl Into<String>) -> Self {
        if line > 0 {
            self.label = Some(Label { line, span: None, message: label.into() });
        }
        self
    }

    pub fn with_span(mut self, line: u32, span: Range<usize>, label: impl Into<String>) -> Self {
        self.label = Some(Label { line, span: Some(span), message: label.into() });
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

// ---- From impls for the pipeline's error types ----

impl From<&LexError> for Diagnostic {
    fn from(e: &LexError) -> Self {
        let span = e.position..e.position + e.snippet.len().max(1);
        let mut d = Diagnostic::error(Stage::Lex, format!("unexpected '{}'", e.snippet))
            .with_code("AUR-L001")
            .with_span(e.line, span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&ParseError> for Diagnostic {
    fn from(e: &ParseError) -> Self {
        Diagnostic::error(Stage::Parse, &e.message).with_code("AUR-P001").with_line(e.line, "here")
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let code = match e.kind {
            CompileErrorKind::BranchTooFar { .. } => "AUR-C001",
            CompileErrorKind::RegisterOverflow { .. } => "AUR-C002",
            CompileErrorKind::BreakOutsideLoop => "AUR-C003",
            CompileErrorKind::ContinueOutsideLoop => "AUR-C004",
            CompileErrorKind::UnresolvedName { .. } => "AUR-C005",
        };
        let mut d = Diagnostic::error(Stage::Compile, e.kind.to_string())
            .with_code(code)
            .with_line(e.line, "");
        match &e.kind {
            CompileErrorKind::UnresolvedName { name } => {
                d = d.with_suggestion(format!("assign `{}` before this line, or pass it in as an argument", name));
            }
            CompileErrorKind::BranchTooFar { .. } => {
                d = d.with_suggestion("move part of this block into a function");
            }
            _ => {}
        }
        d
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        let code = match e.kind {
            RuntimeErrorKind::TypeMismatch { .. } => "AUR-R001",
            RuntimeErrorKind::ArityMismatch { .. } => "AUR-R002",
            RuntimeErrorKind::IndexOutOfRange { .. } => "AUR-R003",
            RuntimeErrorKind::StackUnderflow => "AUR-R004",
            RuntimeErrorKind::CallDepthExceeded { .. } => "AUR-R005",
            RuntimeErrorKind::MalformedChunk { .. } => "AUR-R006",
        };
        let mut d = Diagnostic::error(Stage::Runtime, e.kind.to_string())
            .with_code(code)
            .with_line(e.line, "")
            .with_note(format!("in `{}`", e.function));
        if matches!(e.kind, RuntimeErrorKind::StackUnderflow | RuntimeErrorKind::MalformedChunk { .. }) {
            d = d.with_note("this is a bug in the compiler or VM, not in the program");
        }
        d
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Lex(e) => e.into(),
            crate::Error::Parse(e) => e.into(),
            crate::Error::Compile(e) => e.into(),
            crate::Error::Runtime(e) => e.into(),
        }
    }
}
