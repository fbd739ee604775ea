use core::fmt;

/// Error taxonomy shared by the compiler and the interpreter.
///
/// The set is open; unknown discriminants decode to
/// [`ErrorKind::UnknownErrorKind`] so bytecode produced by a newer
/// catalog still round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The discriminant can't be mapped to any known `ErrorKind`.
    UnknownErrorKind = 0x00,
    /// Attempt to mutate a read-only value.
    ReadOnly = 0x01,
    /// Division where the divisor's numeric view is zero.
    DivisionByZero = 0x02,
    /// Modulo where the modulus is zero.
    ModuloByZero = 0x03,
    /// A value was dereferenced or used as an incompatible type.
    TypeError = 0x04,
    /// An undefined value was used where that is an error.
    Undefined = 0x05,
    /// Source could not be compiled.
    CompileError = 0x06,
    /// A body needs more than 65 535 registers.
    TooManyRegisters = 0x07,
    /// User-raised exception (`die`).
    Die = 0x08,
    /// The operation is cataloged but not provided by this core.
    NotImplemented = 0x09,
    /// An I/O operation failed.
    IoError = 0x0a,
    /// A callable was invoked with an unacceptable argument count.
    ArgumentCount = 0x0b,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<u16> for ErrorKind {
    fn from(word: u16) -> Self {
        use ErrorKind::*;
        match word {
            0x01 => ReadOnly,
            0x02 => DivisionByZero,
            0x03 => ModuloByZero,
            0x04 => TypeError,
            0x05 => Undefined,
            0x06 => CompileError,
            0x07 => TooManyRegisters,
            0x08 => Die,
            0x09 => NotImplemented,
            0x0a => IoError,
            0x0b => ArgumentCount,
            _ => UnknownErrorKind,
        }
    }
}

impl From<ErrorKind> for u16 {
    fn from(kind: ErrorKind) -> u16 {
        kind as u16
    }
}
