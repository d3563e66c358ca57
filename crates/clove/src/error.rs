//! Error taxonomy.
//!
//! Front-end failures (parse, compile) are fatal and surface as Rust
//! errors. Runtime failures are values: they become `Error` objects on the
//! operand stack and unwind frame by frame, ultimately becoming the result
//! of the evaluation. [`Exception`] is the public fatal-error type.

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::token::Position;

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Classifies runtime `Error` objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum ErrorKind {
    /// Wrong argument kind to a native or a built-in operator.
    Type,
    /// Division by zero, overflow on integer coercion.
    Arithmetic,
    /// Unknown symbol in dynamic dispatch.
    Lookup,
    /// Call with the wrong number of arguments.
    Arity,
    /// Out-of-bounds container access.
    Index,
    /// Module resolution failure.
    Import,
    /// A `throw` expression.
    User,
}

/// A runtime error on its way to becoming an `Error` object on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    #[must_use]
    pub fn lookup_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lookup, message)
    }

    #[must_use]
    pub fn arity_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arity, message)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Ill-formed source. Fatal; carries the offending token's position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub position: Position,
}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, position: Position) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Macro-arity mismatches, unresolvable compile-time references, and other
/// failures between parsing and execution. Fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compile error: {}", self.message)
    }
}

impl std::error::Error for CompileError {}

/// Public fatal-failure type returned by the runtime entry points.
///
/// Runtime `Error` objects are *not* exceptions: they come back as ordinary
/// result values (`Object::Error`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exception {
    Parse(ParseError),
    Compile(CompileError),
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => e.fmt(f),
            Self::Compile(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Exception {}

impl From<ParseError> for Exception {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<CompileError> for Exception {
    fn from(e: CompileError) -> Self {
        Self::Compile(e)
    }
}
