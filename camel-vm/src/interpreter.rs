//! [`Interpreter`] implementation.
//!
//! One instance owns the whole of an interpreter's "process-wide" state:
//! the package stash, the frame stack, the standard streams, the signal
//! flags, and the `eval STRING` cache. Bodies execute in the
//! switch-dispatched loop in `executors`; cold operations live in
//! `slow`.

use std::rc::Rc;

use camel_asm::{CallContext, ErrorKind};
use camel_value::{
    scalar_ref, Array, ArrayRef, Closure, CodeValue, CompiledCode, FileHandle, Hash,
    HashRef, IoBackend, IoRef, Reference, RefTarget, Scalar, ScalarRef, ScalarValue, Slot,
};

use crate::ast::SourceParser;
use crate::compiler::Compiler;
use crate::error::{CompileError, VmError};
use crate::eval::EvalCache;
use crate::frame::{Frame, FrameStack};
use crate::signal::SignalState;
use crate::stash::Stash;
use crate::state::ExecuteState;
use crate::VmParameters;

mod alu;
mod builtins;
mod executors;
mod slow;

/// The bytecode virtual machine.
pub struct Interpreter {
    pub(crate) stash: Stash,
    pub(crate) frames: FrameStack,
    pub(crate) signals: Rc<SignalState>,
    pub(crate) compiler: Compiler,
    pub(crate) eval_cache: EvalCache,
    pub(crate) parser: Option<Rc<dyn SourceParser>>,
    pub(crate) stdout: IoRef,
    pub(crate) stderr: IoRef,
    pub(crate) stdin: IoRef,
    pub(crate) params: VmParameters,
    eval_counter: u32,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("frames", &self.frames.depth())
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    /// Interpreter with the given limits, wired to the process streams.
    pub fn new(params: VmParameters) -> Self {
        Self {
            stash: Stash::new(),
            frames: FrameStack::new(params.frame_ring),
            signals: Rc::new(SignalState::new()),
            compiler: Compiler::new(params.clone()),
            eval_cache: EvalCache::new(params.eval_cache_capacity),
            parser: None,
            stdout: FileHandle::new_ref(IoBackend::Stdout, Vec::new()),
            stderr: FileHandle::new_ref(IoBackend::Stderr, Vec::new()),
            stdin: FileHandle::new_ref(IoBackend::Stdin, Vec::new()),
            params,
            eval_counter: 0,
        }
    }

    /// Installs the parser collaborator used by `eval STRING`.
    pub fn set_parser(&mut self, parser: Rc<dyn SourceParser>) {
        self.parser = Some(parser);
    }

    /// Redirects standard output (tests capture it in memory).
    pub fn set_stdout(&mut self, handle: IoRef) {
        self.stdout = handle;
    }

    /// Redirects standard error.
    pub fn set_stderr(&mut self, handle: IoRef) {
        self.stderr = handle;
    }

    /// The package stash.
    pub fn stash(&mut self) -> &mut Stash {
        &mut self.stash
    }

    /// The signal flags, shared with embedder-installed handlers.
    pub fn signals(&self) -> Rc<SignalState> {
        Rc::clone(&self.signals)
    }

    /// Current call depth, exposed for frame-balance assertions.
    pub fn frame_depth(&self) -> usize {
        self.frames.depth()
    }

    /// `(hits, misses)` of the `eval STRING` compilation cache.
    pub fn eval_cache_stats(&self) -> (u64, u64) {
        self.eval_cache.stats()
    }

    /* CALLS */

    /// Invokes a callable with already-built arguments.
    ///
    /// This is the seam the two backends share: the callee may be
    /// interpreted bytecode or a host-native sub, and either way it sees
    /// the aliased `@_` and the caller's context.
    pub fn call_code(
        &mut self,
        callee: &Rc<CodeValue>,
        args: ArrayRef,
        ctx: CallContext,
    ) -> Result<Slot, VmError> {
        if self.frames.depth() >= self.params.max_call_depth {
            return Err(VmError::new(
                ErrorKind::Die,
                "Deep recursion; call depth limit exceeded\n",
            ));
        }
        match callee.as_ref() {
            CodeValue::Host(f) => f(&args, ctx).map_err(|e| VmError {
                kind: e.kind,
                payload: Scalar::str(e.message.as_str()),
                trace: Vec::new(),
            }),
            CodeValue::Bytecode(closure) => {
                if closure.code.is_eval {
                    self.run_eval_frame(closure, args, ctx)
                } else {
                    self.run_closure(closure, args, ctx)
                }
            }
        }
    }

    /// `eval BLOCK`: failures land in `$@` and yield undef; successes
    /// clear `$@`.
    fn run_eval_frame(
        &mut self,
        closure: &Closure,
        args: ArrayRef,
        ctx: CallContext,
    ) -> Result<Slot, VmError> {
        match self.run_closure(closure, args, ctx) {
            Ok(slot) => {
                self.set_errsv(Scalar::str(""));
                Ok(slot)
            }
            Err(err) => {
                self.store_error(&err);
                Ok(Slot::fresh())
            }
        }
    }

    /// Populates `$@` from a caught error: object payloads pass through
    /// untouched, messages arrive with their location already baked.
    pub(crate) fn store_error(&mut self, err: &VmError) {
        let value = match err.payload.value() {
            ScalarValue::Ref(_) | ScalarValue::WeakRef(_) => err.payload.clone(),
            _ => Scalar::str(err.message().as_ref()),
        };
        self.set_errsv(value);
    }

    pub(crate) fn set_errsv(&mut self, value: Scalar) {
        let slot = self.stash.scalar_slot("main::@");
        let mut slot = slot.borrow_mut();
        slot.unlock_readonly();
        let _ = slot.assign(&value);
    }

    fn run_closure(
        &mut self,
        closure: &Closure,
        args: ArrayRef,
        ctx: CallContext,
    ) -> Result<Slot, VmError> {
        let mut code = Rc::clone(&closure.code);
        let mut captured = closure.captured.clone();
        let mut args = args;

        loop {
            self.push_frame(&code, ctx);
            let mut regs = Self::register_file(&code, &args, &captured, ctx);
            let state = self.exec(&code, &mut regs);
            self.pop_frame();

            match state {
                Ok(ExecuteState::Return(slot)) => return Ok(slot),
                Ok(ExecuteState::Proceed) => return Ok(Slot::fresh()),
                Ok(ExecuteState::TailCall(next, next_args)) => match next.as_ref() {
                    // `goto &NAME` replaces the body without growing the
                    // frame stack.
                    CodeValue::Bytecode(next_closure) => {
                        code = Rc::clone(&next_closure.code);
                        captured = next_closure.captured.clone();
                        args = next_args;
                    }
                    CodeValue::Host(f) => {
                        return f(&next_args, ctx).map_err(|e| {
                            VmError::new(e.kind, format!("{}\n", e.message))
                        });
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }

    fn push_frame(&mut self, code: &Rc<CompiledCode>, ctx: CallContext) {
        let package = code
            .package_name
            .clone()
            .unwrap_or_else(|| Rc::from("main"));
        let sub_name: Rc<str> = match &code.sub_name {
            Some(_) => Rc::from(code.qualified_name().as_str()),
            None => Rc::from(""),
        };
        self.frames.push(Frame {
            code: Some(Rc::clone(code)),
            package,
            sub_name,
            context: ctx,
            saved_pc: 0,
            line: code.source_line,
            is_eval: code.is_eval,
            local_watermark: self.stash.local_depth(),
        });
    }

    fn pop_frame(&mut self) {
        let watermark = self
            .frames
            .current()
            .map(|f| f.local_watermark)
            .unwrap_or(0);
        self.stash.unwind_locals(watermark);
        self.frames.pop();
    }

    fn register_file(
        code: &CompiledCode,
        args: &ArrayRef,
        captured: &[Slot],
        ctx: CallContext,
    ) -> Vec<Slot> {
        let len = code.max_registers.max(3) as usize;
        let mut regs = Vec::with_capacity(len);
        regs.push(match args.borrow().get(0) {
            Some(first) => Slot::Scalar(first),
            None => Slot::fresh(),
        });
        regs.push(Slot::Array(Rc::clone(args)));
        regs.push(Slot::Scalar(scalar_ref(Scalar::int(ctx as i64))));
        for slot in captured {
            regs.push(slot.clone());
        }
        while regs.len() < len {
            regs.push(Slot::fresh());
        }
        regs
    }

    /* VALUE HELPERS */

    /// Scalar handle view of a register, counting aggregates.
    pub(crate) fn read_scalar(&mut self, regs: &[Slot], r: u16) -> Result<ScalarRef, VmError> {
        match &regs[r as usize] {
            Slot::Scalar(s) => self.resolve_tied(s),
            Slot::Array(a) => Ok(scalar_ref(Scalar::int(a.borrow().len() as i64))),
            Slot::Hash(h) => Ok(scalar_ref(Scalar::int(h.borrow().len() as i64))),
        }
    }

    /// Value copy of a register's scalar view.
    pub(crate) fn read_value(&mut self, regs: &[Slot], r: u16) -> Result<Scalar, VmError> {
        Ok(self.read_scalar(regs, r)?.borrow().clone())
    }

    /// Reads through tie magic: a tied scalar's `FETCH` result stands in
    /// for the value.
    pub(crate) fn resolve_tied(&mut self, s: &ScalarRef) -> Result<ScalarRef, VmError> {
        let handler = match s.borrow().value() {
            ScalarValue::Tied(t) => t.borrow().handler.clone(),
            _ => return Ok(Rc::clone(s)),
        };
        let fetched = self.tied_method(&handler, "FETCH", Vec::new())?;
        Ok(scalar_ref(fetched))
    }

    pub(crate) fn tied_method(
        &mut self,
        handler: &Scalar,
        method: &str,
        mut extra: Vec<ScalarRef>,
    ) -> Result<Scalar, VmError> {
        let class = handler.ref_type_name();
        let found = self.stash.lookup_method(&class, method)?.ok_or_else(|| {
            VmError::new(
                ErrorKind::Die,
                format!("Can't locate object method \"{method}\" via package \"{class}\"\n"),
            )
        })?;
        let mut all = vec![scalar_ref(handler.clone())];
        all.append(&mut extra);
        let args = Rc::new(std::cell::RefCell::new(Array::from_refs(all)));
        let slot = self.call_code(&found, args, CallContext::Scalar)?;
        Ok(self.slot_value(&slot))
    }

    /// Writes a computed value into a register, preserving the slot
    /// handle (and with it closure sharing) when one is there.
    pub(crate) fn write_value(
        &mut self,
        regs: &mut [Slot],
        r: u16,
        value: Scalar,
    ) -> Result<(), VmError> {
        match &regs[r as usize] {
            Slot::Scalar(s) => {
                let tied = matches!(s.borrow().value(), ScalarValue::Tied(_));
                if tied {
                    let handler = match s.borrow().value() {
                        ScalarValue::Tied(t) => t.borrow().handler.clone(),
                        _ => unreachable!("checked above"),
                    };
                    self.tied_method(&handler, "STORE", vec![scalar_ref(value)])?;
                    return Ok(());
                }
                // `assign` carries the cached numeric view along, so an
                // explicit dualvar keeps both faces.
                s.borrow_mut().assign(&value).map_err(VmError::from)?;
                Ok(())
            }
            _ => {
                regs[r as usize] = Slot::Scalar(scalar_ref(value));
                Ok(())
            }
        }
    }

    /// The scalar value a call result carries.
    pub(crate) fn slot_value(&self, slot: &Slot) -> Scalar {
        match slot {
            Slot::Scalar(s) => s.borrow().clone(),
            Slot::Array(a) => Scalar::int(a.borrow().len() as i64),
            Slot::Hash(h) => Scalar::int(h.borrow().len() as i64),
        }
    }

    /// Flattens a register run into scalar handles, Perl-list style:
    /// arrays contribute their element handles, hashes their key/value
    /// pairs.
    pub(crate) fn flatten(
        &mut self,
        regs: &[Slot],
        base: u16,
        n: u16,
        copy: bool,
    ) -> Vec<ScalarRef> {
        let mut out = Vec::new();
        for at in base..base + n {
            Self::flatten_slot(&mut out, &regs[at as usize], copy);
        }
        out
    }

    pub(crate) fn flatten_slot(out: &mut Vec<ScalarRef>, slot: &Slot, copy: bool) {
        match slot {
            Slot::Scalar(s) => out.push(if copy {
                scalar_ref(s.borrow().clone())
            } else {
                Rc::clone(s)
            }),
            Slot::Array(a) => {
                for elem in a.borrow().iter() {
                    out.push(if copy {
                        scalar_ref(elem.borrow().clone())
                    } else {
                        Rc::clone(elem)
                    });
                }
            }
            Slot::Hash(h) => {
                for (k, v) in h.borrow().iter() {
                    out.push(scalar_ref(Scalar::str(k.as_ref())));
                    out.push(if copy {
                        scalar_ref(v.borrow().clone())
                    } else {
                        Rc::clone(v)
                    });
                }
            }
        }
    }

    /// The array a subscript or aggregate op applies to, dereferencing
    /// (and autovivifying) scalars holding array references.
    pub(crate) fn resolve_array(&mut self, regs: &[Slot], r: u16) -> Result<ArrayRef, VmError> {
        match &regs[r as usize] {
            Slot::Array(a) => Ok(Rc::clone(a)),
            Slot::Scalar(s) => {
                let existing = match s.borrow().value() {
                    ScalarValue::Ref(rf) => match rf.target() {
                        RefTarget::Array(a) => Some(Rc::clone(a)),
                        _ => None,
                    },
                    ScalarValue::Undef => None,
                    _ => {
                        return Err(VmError::new(
                            ErrorKind::TypeError,
                            "Not an ARRAY reference\n",
                        ))
                    }
                };
                match existing {
                    Some(a) => Ok(a),
                    None => {
                        // Autovivification through an undef lvalue.
                        let fresh = Array::new_ref();
                        s.borrow_mut()
                            .set_value(ScalarValue::Ref(Reference::to_array(Rc::clone(
                                &fresh,
                            ))))
                            .map_err(VmError::from)?;
                        Ok(fresh)
                    }
                }
            }
            Slot::Hash(_) => Err(VmError::new(
                ErrorKind::TypeError,
                "Not an ARRAY reference\n",
            )),
        }
    }

    /// Hash counterpart of [`Interpreter::resolve_array`].
    pub(crate) fn resolve_hash(&mut self, regs: &[Slot], r: u16) -> Result<HashRef, VmError> {
        match &regs[r as usize] {
            Slot::Hash(h) => Ok(Rc::clone(h)),
            Slot::Scalar(s) => {
                let existing = match s.borrow().value() {
                    ScalarValue::Ref(rf) => match rf.target() {
                        RefTarget::Hash(h) => Some(Rc::clone(h)),
                        _ => None,
                    },
                    ScalarValue::Undef => None,
                    _ => {
                        return Err(VmError::new(
                            ErrorKind::TypeError,
                            "Not a HASH reference\n",
                        ))
                    }
                };
                match existing {
                    Some(h) => Ok(h),
                    None => {
                        let fresh = Hash::new_ref();
                        s.borrow_mut()
                            .set_value(ScalarValue::Ref(Reference::to_hash(Rc::clone(
                                &fresh,
                            ))))
                            .map_err(VmError::from)?;
                        Ok(fresh)
                    }
                }
            }
            Slot::Array(_) => Err(VmError::new(
                ErrorKind::TypeError,
                "Not a HASH reference\n",
            )),
        }
    }

    /// The callable behind a scalar: a code value or a code reference.
    pub(crate) fn resolve_code(&mut self, value: &Scalar) -> Result<Rc<CodeValue>, VmError> {
        match value.value() {
            ScalarValue::Code(cv) => Ok(Rc::clone(cv)),
            ScalarValue::Ref(r) => match r.target() {
                RefTarget::Code(cv) => Ok(Rc::clone(cv)),
                _ => Err(VmError::new(ErrorKind::TypeError, "Not a CODE reference\n")),
            },
            ScalarValue::Undef => Err(VmError::new(
                ErrorKind::Die,
                "Undefined subroutine called\n",
            )),
            _ => Err(VmError::new(ErrorKind::TypeError, "Not a CODE reference\n")),
        }
    }

    /* EVAL STRING */

    /// Runtime compilation for `eval STRING`: parse, compile against the
    /// eval site's lexical scope, cache, and execute in the current
    /// frame's package and context. Failures of any stage land in `$@`
    /// with an undef result.
    pub(crate) fn eval_string(
        &mut self,
        source: &str,
        scope: &str,
        regs: &[Slot],
    ) -> Result<Slot, VmError> {
        let (package, ctx) = match self.frames.current() {
            Some(frame) => (frame.package.to_string(), frame.context),
            None => ("main".to_owned(), CallContext::Scalar),
        };

        // Two eval sites with identical text may see different scopes,
        // so the scope descriptor is part of the cache key.
        let cache_key = format!("{scope}\0{source}");
        let compiled = match self.eval_cache.get(&cache_key) {
            Some(found) => found,
            None => {
                let code = match self.compile_eval(source, &package, scope) {
                    Ok(code) => code,
                    Err(err) => {
                        self.store_error(&VmError::from_compile(err));
                        return Ok(Slot::fresh());
                    }
                };
                self.eval_cache.insert(&cache_key, Rc::clone(&code));
                code
            }
        };

        // Close over the live registers the descriptor names.
        let captured = compiled
            .captured_slots
            .iter()
            .map(|slot| regs[slot.parent_register as usize].clone())
            .collect();
        let callee = Rc::new(CodeValue::Bytecode(Closure {
            code: compiled,
            captured,
        }));
        let args = Rc::new(std::cell::RefCell::new(Array::new()));
        // The body carries the eval flag, so call_code lands failures in
        // `$@` and hands back undef.
        self.call_code(&callee, args, ctx)
    }

    fn compile_eval(
        &mut self,
        source: &str,
        package: &str,
        scope: &str,
    ) -> Result<Rc<CompiledCode>, CompileError> {
        let parser = self.parser.clone().ok_or(CompileError::NoParser)?;
        self.eval_counter += 1;
        let origin = format!("(eval {})", self.eval_counter);
        let tree = parser.parse(source, &origin, 1)?;
        let bindings = parse_scope_descriptor(scope);
        self.compiler.compile_eval(&tree, package, &bindings)
    }

    /* SIGNALS */

    /// Boundary delivery: consult `%SIG`, run the handler, and let its
    /// `die` propagate; an unhandled `ALRM` is fatal the way the default
    /// disposition is.
    pub(crate) fn deliver_signal(&mut self) -> Result<(), VmError> {
        let Some(name) = self.signals.poll() else {
            return Ok(());
        };
        let sig = self.stash.hash_slot("main::SIG");
        let handler = sig.borrow().get(name.as_ref());
        match handler {
            Some(handler) => {
                let value = handler.borrow().clone();
                if let Ok(code) = self.resolve_code(&value) {
                    let args = Rc::new(std::cell::RefCell::new(Array::from_scalars(vec![
                        Scalar::str(name.as_ref()),
                    ])));
                    self.call_code(&code, args, CallContext::Void)?;
                }
                Ok(())
            }
            None if name.as_ref() == "ALRM" => {
                Err(VmError::new(ErrorKind::Die, "Alarm clock\n"))
            }
            None => Ok(()),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(VmParameters::default())
    }
}

/// Decodes a `$name=REG;`-style scope descriptor back into bindings.
fn parse_scope_descriptor(scope: &str) -> Vec<(camel_value::Sigil, Rc<str>, u16)> {
    use camel_value::Sigil;
    scope
        .split(';')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (tagged, reg) = entry.split_once('=')?;
            let mut chars = tagged.chars();
            let sigil = match chars.next()? {
                '$' => Sigil::Scalar,
                '@' => Sigil::Array,
                '%' => Sigil::Hash,
                _ => return None,
            };
            let name: String = chars.collect();
            let reg: u16 = reg.parse().ok()?;
            Some((sigil, Rc::from(name.as_str()), reg))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_descriptor_round_trip() {
        let bindings = parse_scope_descriptor("$x=5;@xs=7;%h=9;");
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].1.as_ref(), "x");
        assert_eq!(bindings[0].2, 5);
        assert_eq!(bindings[1].0, camel_value::Sigil::Array);
        assert_eq!(bindings[2].0, camel_value::Sigil::Hash);
        assert!(parse_scope_descriptor("").is_empty());
    }
}
