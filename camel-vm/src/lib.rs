//! Register bytecode compiler and interpreter for the Camel Perl runtime.
//!
//! The pipeline: an AST handed over by the parser is scanned for closure
//! captures, compiled into compact 16-bit-word bytecode with its constant
//! pool and metadata, registered in the package stash under its
//! fully-qualified name, and executed by a switch-dispatched interpreter
//! that keeps cold operations out of its hot loop.

#![allow(clippy::wrong_self_convention)]

pub mod ast;
pub mod backtrace;
pub mod capture;
pub mod compiler;
pub mod consts;
pub mod engine;
pub mod error;
pub mod eval;
pub mod frame;
pub mod interpreter;
pub mod signal;
pub mod stash;
pub mod state;

pub mod prelude {
    //! Re-exports of the types an embedder touches.

    pub use camel_asm::{Builtin, CallContext, ErrorKind, Opcode, OpcodeRepr, SlowOp};
    pub use camel_value::{
        Array, ArrayRef, Closure, CodeValue, CompiledCode, Hash, HashRef, Scalar,
        ScalarRef, ScalarValue, Sigil, Slot,
    };

    pub use crate::ast::{Node, NodeKind, SourceParser};
    pub use crate::backtrace::Backtrace;
    pub use crate::compiler::Compiler;
    pub use crate::engine::{Engine, ExitStatus};
    pub use crate::error::{CompileError, VmError};
    pub use crate::frame::{CallerInfo, Frame};
    pub use crate::interpreter::Interpreter;
    pub use crate::stash::Stash;
    pub use crate::state::{ExecuteState, ProgramState};
    pub use crate::VmParameters;
}

/// Tunable interpreter limits.
///
/// Embedders construct one (usually [`Default::default`]) and hand it to
/// the interpreter; the defaults match the encoding's hard bounds where
/// one exists.
#[derive(Debug, Clone)]
pub struct VmParameters {
    /// Preallocated call-frame ring depth; the ring grows past this.
    pub frame_ring: usize,
    /// Maximum depth of the frame stack before a runaway recursion is
    /// refused.
    pub max_call_depth: usize,
    /// Entries kept in the `eval STRING` compilation cache.
    pub eval_cache_capacity: usize,
    /// Code-word ceiling past which an oversized list literal is split
    /// into chunked anonymous subs.
    pub code_chunk_ceiling: usize,
}

impl Default for VmParameters {
    fn default() -> Self {
        Self {
            frame_ring: consts::FRAME_RING_DEPTH,
            max_call_depth: consts::MAX_CALL_DEPTH,
            eval_cache_capacity: consts::EVAL_CACHE_CAPACITY,
            code_chunk_ceiling: consts::CODE_CHUNK_CEILING,
        }
    }
}
