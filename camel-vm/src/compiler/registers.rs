//! Register allocation for one compiled body.
//!
//! Indices 0–2 are reserved (invocant, `@_`, context). Lexicals claim
//! the lowest free index in program order and release it at scope exit;
//! temporaries draw from the same pool and die at the statement
//! boundary. Captures persist for the body's lifetime. Freed registers
//! are not zeroed: emitted code writes before it reads.

use std::rc::Rc;

use camel_value::Sigil;

use crate::consts::{REG_USER_BASE, VM_MAX_REGISTERS};
use crate::error::CompileError;

#[derive(Debug)]
struct ScopeFrame {
    vars: Vec<(Sigil, Rc<str>, u16)>,
    locals: usize,
}

/// Scope-disciplined register pool.
#[derive(Debug)]
pub struct RegisterAllocator {
    free: Vec<bool>,
    /// No index below this is free; keeps lowest-first search linear.
    scan_from: usize,
    high_water: u16,
    scopes: Vec<ScopeFrame>,
    temps: Vec<u16>,
}

impl RegisterAllocator {
    /// Pool with the three reserved registers claimed.
    pub fn new() -> Self {
        Self {
            free: vec![false; REG_USER_BASE as usize],
            scan_from: REG_USER_BASE as usize,
            high_water: REG_USER_BASE,
            scopes: vec![ScopeFrame {
                vars: Vec::new(),
                locals: 0,
            }],
            temps: Vec::new(),
        }
    }

    /// Highest register count this body touched.
    pub fn high_water(&self) -> u16 {
        self.high_water
    }

    fn release(&mut self, index: usize) {
        self.free[index] = true;
        self.scan_from = self.scan_from.min(index);
    }

    fn take_lowest(&mut self) -> Result<u16, CompileError> {
        let found = (self.scan_from..self.free.len()).find(|&at| self.free[at]);
        let index = match found {
            Some(at) => {
                self.free[at] = false;
                self.scan_from = at + 1;
                at
            }
            None => {
                if self.free.len() >= VM_MAX_REGISTERS as usize {
                    return Err(CompileError::TooManyRegisters(self.free.len() as u64 + 1));
                }
                self.free.push(false);
                self.scan_from = self.free.len();
                self.free.len() - 1
            }
        };
        self.high_water = self.high_water.max(index as u16 + 1);
        Ok(index as u16)
    }

    /// Claims the next free index for a lexical in the current scope.
    pub fn declare(&mut self, sigil: Sigil, name: &str) -> Result<u16, CompileError> {
        let index = self.take_lowest()?;
        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .vars
            .push((sigil, Rc::from(name), index));
        Ok(index)
    }

    /// Claims a register released at scope exit but not at statement
    /// boundaries; loop counters and other hidden state live here.
    pub fn declare_internal(&mut self) -> Result<u16, CompileError> {
        let index = self.take_lowest()?;
        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .vars
            .push((Sigil::Scalar, Rc::from(""), index));
        Ok(index)
    }

    /// Claims a statement-lifetime temporary.
    pub fn temp(&mut self) -> Result<u16, CompileError> {
        let index = self.take_lowest()?;
        self.temps.push(index);
        Ok(index)
    }

    /// Claims `n` consecutive temporaries (argument packing).
    pub fn temp_block(&mut self, n: usize) -> Result<u16, CompileError> {
        if n == 0 {
            return Ok(self.free.len() as u16);
        }
        // Look for an existing run of free slots, lowest first.
        let len = self.free.len();
        let mut run = 0usize;
        let mut start = None;
        for at in 0..len {
            if self.free[at] {
                run += 1;
                if run == n {
                    start = Some(at + 1 - n);
                    break;
                }
            } else {
                run = 0;
            }
        }
        let base = match start {
            Some(base) => base,
            None => {
                // Extend the pool; a trailing free run shortens the growth.
                let tail = (0..len).rev().take_while(|&at| self.free[at]).count();
                let grow = n.saturating_sub(tail);
                if len + grow > VM_MAX_REGISTERS as usize {
                    return Err(CompileError::TooManyRegisters((len + grow) as u64));
                }
                self.free.extend(std::iter::repeat(true).take(grow));
                len + grow - n
            }
        };
        for at in base..base + n {
            self.free[at] = false;
            self.temps.push(at as u16);
        }
        // Conservative hint update: never past a free slot.
        self.scan_from = self.scan_from.min(base);
        self.high_water = self.high_water.max((base + n) as u16);
        Ok(base as u16)
    }

    /// Releases statement-lifetime temporaries.
    pub fn end_statement(&mut self) {
        while let Some(index) = self.temps.pop() {
            self.release(index as usize);
        }
    }

    /// Opens a lexical scope.
    pub fn push_scope(&mut self) {
        self.scopes.push(ScopeFrame {
            vars: Vec::new(),
            locals: 0,
        });
    }

    /// Closes a lexical scope, releasing its registers for reuse and
    /// returning how many `local` bindings it made.
    pub fn pop_scope(&mut self) -> usize {
        let frame = self.scopes.pop().expect("scope stack never empty");
        for (_, _, index) in &frame.vars {
            self.release(*index as usize);
        }
        frame.locals
    }

    /// Records a `local` made in the current scope.
    pub fn note_local(&mut self) {
        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .locals += 1;
    }

    /// Innermost binding of a lexical, if any.
    pub fn lookup(&self, sigil: Sigil, name: &str) -> Option<u16> {
        self.scopes.iter().rev().find_map(|scope| {
            scope
                .vars
                .iter()
                .rev()
                .find(|(s, n, _)| *s == sigil && n.as_ref() == name)
                .map(|(_, _, index)| *index)
        })
    }

    /// Every lexical visible right now, for capture analysis of a
    /// nested body.
    pub fn visible(&self) -> Vec<(Sigil, Rc<str>)> {
        self.scopes
            .iter()
            .flat_map(|scope| scope.vars.iter())
            .filter(|(_, name, _)| !name.is_empty())
            .map(|(sigil, name, _)| (*sigil, Rc::clone(name)))
            .collect()
    }
}

impl Default for RegisterAllocator {
    fn default() -> Self {
        Self::new()
    }
}
