//! Pending-signal delivery.
//!
//! There is no forced interruption mid-opcode: `alarm` arms a deadline
//! and signal raisers set a flag, and the dispatch loop polls at opcode
//! boundaries. The poll is a single flag check so the hot loop pays
//! nothing while nothing is armed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Per-interpreter signal state.
#[derive(Debug, Default)]
pub struct SignalState {
    armed: Cell<bool>,
    pending: RefCell<Option<Rc<str>>>,
    alarm_at: Cell<Option<Instant>>,
}

impl SignalState {
    /// Fresh, disarmed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when a boundary poll may observe something.
    pub fn armed(&self) -> bool {
        self.armed.get()
    }

    /// Queues a named signal for the next opcode boundary.
    pub fn raise(&self, name: impl Into<Rc<str>>) {
        *self.pending.borrow_mut() = Some(name.into());
        self.armed.set(true);
    }

    /// `alarm(n)`: arms (or with 0 cancels) the deadline, returning the
    /// seconds that were remaining on the previous one.
    pub fn alarm(&self, seconds: u64) -> u64 {
        let remaining = self
            .alarm_at
            .get()
            .and_then(|at| at.checked_duration_since(Instant::now()))
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if seconds == 0 {
            self.alarm_at.set(None);
            self.armed.set(self.pending.borrow().is_some());
        } else {
            self.alarm_at
                .set(Some(Instant::now() + Duration::from_secs(seconds)));
            self.armed.set(true);
        }
        remaining
    }

    /// Boundary poll: takes the queued signal, or `ALRM` once the
    /// deadline has passed.
    pub fn poll(&self) -> Option<Rc<str>> {
        if let Some(name) = self.pending.borrow_mut().take() {
            self.armed.set(self.alarm_at.get().is_some());
            return Some(name);
        }
        if let Some(at) = self.alarm_at.get() {
            if Instant::now() >= at {
                self.alarm_at.set(None);
                self.armed.set(false);
                return Some(Rc::from("ALRM"));
            }
        }
        None
    }
}
