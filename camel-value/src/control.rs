//! Non-local control flow as values.
//!
//! `last`, `next`, `redo`, and `goto LABEL` travel up the interpreter
//! stack as ordinary scalars; each enclosing loop inspects the returned
//! value and either consumes the signal or lets it propagate. This keeps
//! host-exception machinery off the hot paths.

use std::rc::Rc;

/// Which statement produced the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ControlKind {
    /// Leave the enclosing loop.
    Last = 0,
    /// Start the next iteration.
    Next = 1,
    /// Rerun the current iteration without re-evaluating the condition.
    Redo = 2,
    /// Jump to a label.
    Goto = 3,
}

impl From<u16> for ControlKind {
    fn from(tag: u16) -> Self {
        match tag {
            1 => Self::Next,
            2 => Self::Redo,
            3 => Self::Goto,
            _ => Self::Last,
        }
    }
}

/// A control-flow signal travelling as a scalar payload.
#[derive(Debug, Clone)]
pub struct ControlFlow {
    /// The originating statement.
    pub kind: ControlKind,
    /// Target label, when one was written.
    pub label: Option<Rc<str>>,
}

impl ControlFlow {
    /// Signal with an optional label.
    pub fn new(kind: ControlKind, label: Option<Rc<str>>) -> Self {
        Self { kind, label }
    }

    /// `true` when a frame labeled `frame_label` (or any frame, for an
    /// unlabeled signal) should consume this signal.
    pub fn targets(&self, frame_label: Option<&str>) -> bool {
        match &self.label {
            None => true,
            Some(wanted) => frame_label == Some(wanted.as_ref()),
        }
    }

    /// Diagnostic rendering.
    pub fn describe(&self) -> String {
        let kind = match self.kind {
            ControlKind::Last => "last",
            ControlKind::Next => "next",
            ControlKind::Redo => "redo",
            ControlKind::Goto => "goto",
        };
        match &self.label {
            Some(label) => format!("{kind} {label}"),
            None => kind.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlabeled_signal_targets_any_frame() {
        let cf = ControlFlow::new(ControlKind::Last, None);
        assert!(cf.targets(None));
        assert!(cf.targets(Some("OUTER")));
    }

    #[test]
    fn labeled_signal_targets_only_its_frame() {
        let cf = ControlFlow::new(ControlKind::Next, Some(Rc::from("OUTER")));
        assert!(!cf.targets(None));
        assert!(!cf.targets(Some("INNER")));
        assert!(cf.targets(Some("OUTER")));
    }
}
