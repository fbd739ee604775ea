//! Compiler and runtime error implementation.

use std::rc::Rc;

use camel_asm::ErrorKind;
use camel_value::Scalar;
use thiserror::Error;

use crate::frame::TraceEntry;

/// Compile-time failure. These never reach `$@` except through
/// `eval STRING`, which converts them (see [`VmError::from_compile`]).
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// The source text could not be parsed.
    #[error("syntax error: {message} at {file} line {line}.")]
    Syntax {
        /// Parser diagnostic.
        message: String,
        /// Source file.
        file: String,
        /// Source line.
        line: u32,
    },
    /// A body needs more registers than the encoding can name; the
    /// program has to be restructured.
    #[error("{0} registers required, past the 16-bit encoding bound")]
    TooManyRegisters(u64),
    /// `eval STRING` was reached but no parser collaborator is installed.
    #[error("no source parser installed")]
    NoParser,
    /// A construct the compiler does not lower.
    #[error("can't compile {what} at {file} line {line}.")]
    Unsupported {
        /// Description of the construct.
        what: String,
        /// Source file.
        file: String,
        /// Source line.
        line: u32,
    },
    /// Too many entries for a 16-bit pool index.
    #[error("{pool} pool overflow")]
    PoolOverflow {
        /// Which pool filled up.
        pool: &'static str,
    },
}

impl CompileError {
    /// The taxonomy kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TooManyRegisters(_) => ErrorKind::TooManyRegisters,
            _ => ErrorKind::CompileError,
        }
    }
}

/// Runtime error: anything a surrounding `eval` can catch.
///
/// The payload is a scalar so `die $object` survives the trip into `$@`
/// unstringified; plain messages carry the pre-baked `" at FILE line N"`
/// suffix already attached by the `DIE` opcode.
#[derive(Debug, Clone)]
pub struct VmError {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// What `$@` receives.
    pub payload: Scalar,
    /// Frame snapshot from the raise point, innermost first.
    pub trace: Vec<TraceEntry>,
}

impl VmError {
    /// Error with a plain-text message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            payload: Scalar::str(message.into().as_str()),
            trace: Vec::new(),
        }
    }

    /// User-raised exception carrying an arbitrary payload.
    pub fn die(payload: Scalar) -> Self {
        Self {
            kind: ErrorKind::Die,
            payload,
            trace: Vec::new(),
        }
    }

    /// An operator failure at a known source location.
    pub fn at(kind: ErrorKind, message: &str, file: &str, line: u32) -> Self {
        Self::new(kind, format!("{message} at {file} line {line}.\n"))
    }

    /// Converts an `eval STRING` compile failure into the catchable form.
    pub fn from_compile(err: CompileError) -> Self {
        Self::new(err.kind(), format!("{err}\n"))
    }

    /// The string form stored into `$@` for message payloads; object
    /// payloads pass through [`VmError::payload`] untouched.
    pub fn message(&self) -> Rc<str> {
        self.payload.get_string()
    }

    /// Attaches the raise-point frame snapshot, once, innermost first.
    pub fn with_trace(mut self, trace: Vec<TraceEntry>) -> Self {
        if self.trace.is_empty() {
            self.trace = trace;
        }
        self
    }
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for VmError {}

impl From<ErrorKind> for VmError {
    fn from(kind: ErrorKind) -> Self {
        // No trailing newline: the raise site appends its location.
        let message = match kind {
            ErrorKind::ReadOnly => "Modification of a read-only value attempted",
            ErrorKind::DivisionByZero => "Illegal division by zero",
            ErrorKind::ModuloByZero => "Illegal modulus zero",
            ErrorKind::TypeError => "Not a reference",
            ErrorKind::Undefined => "Use of uninitialized value",
            ErrorKind::ArgumentCount => "Wrong number of arguments",
            ErrorKind::NotImplemented => "Unsupported operation",
            ErrorKind::IoError => "I/O error",
            _ => "Runtime error",
        };
        Self::new(kind, message)
    }
}
