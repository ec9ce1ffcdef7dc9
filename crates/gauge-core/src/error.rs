//! Error types for the Gauge engine
//!
//! Host-facing operations return `Result<T, Error>`. Failures caused by a
//! script are modelled separately as [`CompileError`] and [`RuntimeFault`]
//! so the engine can turn them into values instead of propagating them.

use crate::parser::tokenizer::Span;
use crate::verifier::Diagnostic;

/// Gauge engine error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Script rejected by the tokenizer, parser or policy verifier
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Script faulted while running
    #[error("Runtime fault: {0}")]
    Runtime(#[from] RuntimeFault),

    /// Persistence collaborator failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A compiled unit was handed to a context built for the other mode
    #[error("Mode mismatch: unit compiled for {expected} mode, context is {found} mode")]
    ModeMismatch { expected: String, found: String },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for Gauge operations
pub type Result<T> = std::result::Result<T, Error>;

/// A script failed to compile: syntax error or policy violation.
///
/// `message` is the first error; `diagnostics` holds everything the
/// verifier found, warnings included.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    /// Syntax error at a source position
    pub fn syntax(message: impl Into<String>, span: &Span) -> Self {
        CompileError {
            message: format!("{} at {}", message.into(), span),
            diagnostics: Vec::new(),
        }
    }
}

/// Classification of runtime faults, named after the exception classes
/// scripts can catch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    ZeroDivision,
    Type,
    Value,
    Name,
    Attribute,
    Key,
    Index,
    /// Capability lookup found nothing (strict lookups only)
    Lookup,
    Overflow,
    /// Execution budget exhausted
    Limit,
    /// The data store failed underneath a capability function
    Storage,
}

impl FaultKind {
    pub fn exception_name(self) -> &'static str {
        match self {
            FaultKind::ZeroDivision => "ZeroDivisionError",
            FaultKind::Type => "TypeError",
            FaultKind::Value => "ValueError",
            FaultKind::Name => "NameError",
            FaultKind::Attribute => "AttributeError",
            FaultKind::Key => "KeyError",
            FaultKind::Index => "IndexError",
            FaultKind::Lookup => "LookupError",
            FaultKind::Overflow => "OverflowError",
            FaultKind::Limit => "LimitExceeded",
            FaultKind::Storage => "StorageError",
        }
    }

    /// Budget and storage faults always abort the script.
    pub fn is_catchable(self) -> bool {
        !matches!(self, FaultKind::Limit | FaultKind::Storage)
    }

    /// Whether an `except <class>:` handler catches this fault
    pub fn matches(self, class: &str) -> bool {
        if !self.is_catchable() {
            return false;
        }
        match class {
            "Exception" => true,
            "LookupError" => matches!(self, FaultKind::Key | FaultKind::Index | FaultKind::Lookup),
            "ArithmeticError" => matches!(self, FaultKind::ZeroDivision | FaultKind::Overflow),
            other => other == self.exception_name(),
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.exception_name())
    }
}

/// Exception class names accepted in `except` clauses
pub const EXCEPTION_CLASSES: &[&str] = &[
    "Exception",
    "ArithmeticError",
    "LookupError",
    "ZeroDivisionError",
    "TypeError",
    "ValueError",
    "NameError",
    "AttributeError",
    "KeyError",
    "IndexError",
    "OverflowError",
];

/// A script raised while running. `Display` is the bare message, the
/// way a user expects to read it in debug output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct RuntimeFault {
    pub kind: FaultKind,
    pub message: String,
    pub span: Option<Span>,
}

impl RuntimeFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        RuntimeFault {
            kind,
            message: message.into(),
            span: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Type, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Value, message)
    }

    pub fn limit(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Limit, message)
    }

    pub fn overflow() -> Self {
        Self::new(FaultKind::Overflow, "integer overflow")
    }

    /// Attach a source position unless one is already recorded
    pub fn at(mut self, span: &Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span.clone());
        }
        self
    }
}

/// Failure reported by a [`DataSource`](crate::capability::DataSource)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(pub String);
