//! Call-frame bookkeeping.
//!
//! Frames back `caller`, `wantarray`, and back-trace construction. The
//! common path never heap-allocates per call: a preallocated slot ring is
//! sized at startup and grows only on overflow, and popped slots keep
//! their stale contents until reused.

use std::rc::Rc;

use camel_asm::CallContext;
use camel_value::CompiledCode;

/// One interpreter activation.
#[derive(Debug, Clone)]
pub struct Frame {
    /// The executing body; `None` only for placeholder slots in the ring.
    pub code: Option<Rc<CompiledCode>>,
    /// Package the body was compiled in.
    pub package: Rc<str>,
    /// Qualified sub name, `""` for anonymous and top-level bodies.
    pub sub_name: Rc<str>,
    /// Calling context of this activation.
    pub context: CallContext,
    /// Program counter saved before a nested call, for line lookups.
    pub saved_pc: u32,
    /// Source line of the most recent nested call site.
    pub line: u32,
    /// `true` for `eval BLOCK` activations, where unwinding stops.
    pub is_eval: bool,
    /// `local` stack depth at entry; unwinding restores down to it.
    pub local_watermark: usize,
}

impl Frame {
    fn placeholder() -> Self {
        Self {
            code: None,
            package: Rc::from("main"),
            sub_name: Rc::from(""),
            context: CallContext::Void,
            saved_pc: 0,
            line: 0,
            is_eval: false,
            local_watermark: 0,
        }
    }

    /// Source file of the executing body.
    pub fn file(&self) -> Rc<str> {
        self.code
            .as_ref()
            .map(|c| Rc::clone(&c.source_name))
            .unwrap_or_else(|| Rc::from("-"))
    }
}

/// One line of a captured back-trace.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    /// Qualified sub name, `""` for the top level.
    pub sub_name: Rc<str>,
    /// Package of the activation.
    pub package: Rc<str>,
    /// Source file.
    pub file: Rc<str>,
    /// Line at the time of capture.
    pub line: u32,
}

/// What `caller(n)` reports.
///
/// List context flattens this into the modern 11-field form; the hint
/// fields at the tail are carried as undef placeholders.
#[derive(Debug, Clone)]
pub struct CallerInfo {
    /// Caller's package.
    pub package: Rc<str>,
    /// Call-site file.
    pub file: Rc<str>,
    /// Call-site line.
    pub line: u32,
    /// The called sub's qualified name.
    pub sub_name: Rc<str>,
    /// Whether the call passed arguments.
    pub has_args: bool,
    /// The called sub's context: `None` for void, list-ness otherwise.
    pub wantarray: Option<bool>,
    /// Source text for eval frames.
    pub eval_text: Option<Rc<str>>,
    /// `require` flag for eval frames.
    pub is_require: bool,
}

/// LIFO stack of frames over a preallocated slot ring.
#[derive(Debug)]
pub struct FrameStack {
    slots: Vec<Frame>,
    depth: usize,
}

impl FrameStack {
    /// Ring with `ring` preallocated slots.
    pub fn new(ring: usize) -> Self {
        Self {
            slots: (0..ring).map(|_| Frame::placeholder()).collect(),
            depth: 0,
        }
    }

    /// Current stack depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Pushes an activation, reusing a ring slot when one is free.
    pub fn push(&mut self, frame: Frame) {
        if self.depth < self.slots.len() {
            self.slots[self.depth] = frame;
        } else {
            self.slots.push(frame);
        }
        self.depth += 1;
    }

    /// Pops the innermost activation. The slot's contents linger until
    /// the slot is reused.
    pub fn pop(&mut self) -> Option<&Frame> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        Some(&self.slots[self.depth])
    }

    /// The innermost activation.
    pub fn current(&self) -> Option<&Frame> {
        self.depth.checked_sub(1).map(|at| &self.slots[at])
    }

    /// Mutable access to the innermost activation.
    pub fn current_mut(&mut self) -> Option<&mut Frame> {
        self.depth.checked_sub(1).map(move |at| &mut self.slots[at])
    }

    /// Frame `n` levels below the innermost, 0-based.
    pub fn at_depth(&self, n: usize) -> Option<&Frame> {
        self.depth.checked_sub(1 + n).map(|at| &self.slots[at])
    }

    /// `caller(n)`: the call site `n+1` levels out combined with the sub
    /// entered there.
    pub fn caller(&self, n: usize) -> Option<CallerInfo> {
        let callee = self.at_depth(n)?;
        let site = self.at_depth(n + 1)?;
        Some(CallerInfo {
            package: Rc::clone(&site.package),
            file: site.file(),
            line: site.line,
            sub_name: if callee.sub_name.is_empty() {
                Rc::from("main::__ANON__")
            } else {
                Rc::clone(&callee.sub_name)
            },
            has_args: true,
            wantarray: match callee.context {
                CallContext::Void => None,
                CallContext::Scalar => Some(false),
                CallContext::List => Some(true),
            },
            eval_text: None,
            is_require: false,
        })
    }

    /// Snapshot for error traces, innermost first.
    pub fn snapshot(&self) -> Vec<TraceEntry> {
        (0..self.depth)
            .rev()
            .map(|at| {
                let f = &self.slots[at];
                TraceEntry {
                    sub_name: Rc::clone(&f.sub_name),
                    package: Rc::clone(&f.package),
                    file: f.file(),
                    line: f.line,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(sub_name: &str, line: u32) -> Frame {
        Frame {
            sub_name: Rc::from(sub_name),
            line,
            ..Frame::placeholder()
        }
    }

    #[test]
    fn ring_reuses_slots_without_growing() {
        let mut stack = FrameStack::new(4);
        for _ in 0..3 {
            for i in 0..4 {
                stack.push(named("f", i));
            }
            for _ in 0..4 {
                stack.pop();
            }
        }
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn grows_past_the_ring() {
        let mut stack = FrameStack::new(2);
        for i in 0..10 {
            stack.push(named("f", i));
        }
        assert_eq!(stack.depth(), 10);
        assert_eq!(stack.current().unwrap().line, 9);
    }

    #[test]
    fn caller_combines_site_and_callee() {
        let mut stack = FrameStack::new(8);
        let mut top = named("", 0);
        top.package = Rc::from("main");
        top.line = 3;
        stack.push(top);
        stack.push(named("main::a", 1));

        let info = stack.caller(0).unwrap();
        assert_eq!(info.package.as_ref(), "main");
        assert_eq!(info.line, 3);
        assert_eq!(info.sub_name.as_ref(), "main::a");

        assert!(stack.caller(1).is_none());
    }
}
