#![warn(missing_docs)]
#![cfg_attr(not(feature = "std"), no_std)]

//! Atomic types of the Camel register VM: the opcode catalog, the
//! instruction word encoding, and the error-kind taxonomy shared between
//! the bytecode compiler and the interpreter.

extern crate alloc;

mod builtin;
mod error_kind;
mod opcode;
mod slow;

#[cfg(test)]
mod encoding_tests;

pub use builtin::Builtin;
pub use error_kind::ErrorKind;
pub use opcode::{
    consts::{InvalidOpcode, OpcodeRepr, OPCODE_COUNT},
    Opcode, RefKind,
};
pub use slow::SlowOp;

/// Index of a virtual register inside a compiled body.
///
/// Register indices are encoded as a single code word, which bounds any
/// body to 65 535 registers.
pub type RegisterId = u16;

/// A single unit of the bytecode stream.
pub type CodeWord = u16;

/// Signed 32-bit immediate, stored as two code words (low word first).
pub type Immediate32 = i32;

/// Index into the constant pool of a compiled body.
pub type ConstId = u16;

/// Index into the interned string table of a compiled body.
pub type StringId = u16;

/// String table index that marks "no label" on loop-control instructions.
pub const NO_LABEL: StringId = u16::MAX;

/// Calling context of a body, as stored in the reserved context register.
///
/// The numeric values are part of the encoding: the compiler materializes
/// them with `LOAD_INT` when it forces a context on a callee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum CallContext {
    /// The result is discarded.
    #[default]
    Void = 0,
    /// A single scalar is expected.
    Scalar = 1,
    /// A list is expected.
    List = 2,
}

impl CallContext {
    /// `true` when the caller expects a list.
    pub const fn wants_list(self) -> bool {
        matches!(self, Self::List)
    }
}

impl From<i64> for CallContext {
    fn from(tag: i64) -> Self {
        match tag {
            1 => Self::Scalar,
            2 => Self::List,
            _ => Self::Void,
        }
    }
}

/// Split a signed 32-bit immediate into its two code words, low word first.
pub const fn imm32_words(imm: Immediate32) -> [CodeWord; 2] {
    let raw = imm as u32;
    [(raw & 0xffff) as u16, (raw >> 16) as u16]
}

/// Reassemble a signed 32-bit immediate from two code words, low word first.
pub const fn imm32_from_words(lo: CodeWord, hi: CodeWord) -> Immediate32 {
    (((hi as u32) << 16) | lo as u32) as i32
}
