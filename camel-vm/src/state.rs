//! Runtime state representation for the VM.

use std::rc::Rc;

use camel_value::{ArrayRef, CodeValue, Slot};

/// Resulting state of a single instruction's execution.
#[derive(Debug, Clone)]
pub enum ExecuteState {
    /// Proceed with the next instruction.
    Proceed,
    /// The body returned a value (possibly a control-flow scalar that an
    /// enclosing loop will inspect).
    Return(Slot),
    /// `goto &NAME`: replace the executing body, reusing the frame and
    /// the current `@_`.
    TailCall(Rc<CodeValue>, ArrayRef),
}

impl ExecuteState {
    /// `true` while the dispatch loop should keep fetching.
    pub const fn should_continue(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

impl Default for ExecuteState {
    fn default() -> Self {
        Self::Proceed
    }
}

/// Resulting state of a whole program execution, as the embedding API
/// reports it.
#[derive(Debug, Clone)]
pub enum ProgramState {
    /// Ran to completion with this result.
    Completed(Slot),
    /// An uncaught exception terminated the run; the formatted message
    /// has already been written to the error stream.
    Died(crate::error::VmError),
}

impl ProgramState {
    /// The completion value, if the program completed.
    pub fn result(&self) -> Option<&Slot> {
        match self {
            Self::Completed(slot) => Some(slot),
            Self::Died(_) => None,
        }
    }
}
