use crate::source::Span;
use std::fmt;

/// One error or warning with an optional source location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span: Some(span),
        }
    }

    pub fn global(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "{} at {}..{}", self.message, span.start, span.end),
            None => f.write_str(&self.message),
        }
    }
}

/// Per-stage diagnostic sink. Errors abort the pipeline after the stage
/// that produced them; warnings never do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn error(&mut self, message: impl Into<String>, span: Span) {
        self.errors.push(Diagnostic::new(message, span));
    }

    pub fn error_global(&mut self, message: impl Into<String>) {
        self.errors.push(Diagnostic::global(message));
    }

    pub fn warn(&mut self, message: impl Into<String>, span: Span) {
        self.warnings.push(Diagnostic::new(message, span));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
