//! Cold-path operation dispatch.
//!
//! One handler keyed on the sub-operation word. Everything here is rare
//! enough that the extra dispatch is noise next to the operation's own
//! cost; keeping these bodies out of the main loop is what keeps that
//! loop resident in instruction cache.

use std::cell::RefCell;
use std::rc::Rc;

use camel_asm::{CallContext, ErrorKind, SlowOp};
use camel_value::{
    scalar_ref, Array, CompiledCode, FileHandle, IoBackend, Layer, Reference, RefTarget,
    Scalar, ScalarValue, Sigil, Slot, TiedScalar,
};

use crate::error::VmError;
use crate::state::ExecuteState;

use super::Interpreter;

impl Interpreter {
    /// Executes one slow operation whose operand words start at `base`.
    /// Returns a state only when the operation ruptures the normal flow.
    pub(crate) fn slow_op(
        &mut self,
        sub: SlowOp,
        code: &Rc<CompiledCode>,
        base: usize,
        regs: &mut Vec<Slot>,
    ) -> Result<Option<ExecuteState>, VmError> {
        let words = &code.code;
        let w = |at: usize| words[base + at];
        tracing::trace!(?sub, "slow dispatch");

        match sub {
            SlowOp::EvalString => {
                let (rd, rs, scope_sid) = (w(0), w(1), w(2));
                let source = {
                    let v = self.read_value(regs, rs)?;
                    self.string_of(&v)?
                };
                let scope = Rc::clone(&code.strings[scope_sid as usize]);
                let result = self.eval_string(&source, &scope, regs)?;
                regs[rd as usize] = result;
            }
            SlowOp::Splice => {
                let (rd, ra, roff, rlen, n, rfirst) =
                    (w(0), w(1), w(2), w(3), w(4), w(5));
                let arr = self.resolve_array(regs, ra)?;
                let off = self.read_value(regs, roff)?.get_int();
                let len = self.read_value(regs, rlen)?.get_int();
                let replacement = self.flatten(regs, rfirst, n, true);
                let removed = arr.borrow_mut().splice(off, len, replacement);
                regs[rd as usize] = Slot::Array(Rc::new(RefCell::new(Array::from_refs(
                    removed,
                ))));
            }
            SlowOp::Sort => {
                let (rd, rl, flags) = (w(0), w(1), w(2));
                let mut handles = Vec::new();
                Self::flatten_slot(&mut handles, &regs[rl as usize], true);
                let mut keyed: Vec<(Scalar, camel_value::ScalarRef)> = Vec::new();
                for handle in handles {
                    let value = handle.borrow().clone();
                    keyed.push((value, handle));
                }
                match flags {
                    1 => keyed.sort_by(|(a, _), (b, _)| {
                        a.get_double()
                            .partial_cmp(&b.get_double())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    }),
                    2 => keyed.sort_by(|(a, _), (b, _)| {
                        b.get_double()
                            .partial_cmp(&a.get_double())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    }),
                    _ => keyed.sort_by(|(a, _), (b, _)| a.get_string().cmp(&b.get_string())),
                }
                let sorted = keyed.into_iter().map(|(_, handle)| handle).collect();
                regs[rd as usize] =
                    Slot::Array(Rc::new(RefCell::new(Array::from_refs(sorted))));
            }
            SlowOp::Reverse => {
                let (rd, rl) = (w(0), w(1));
                let mut handles = Vec::new();
                Self::flatten_slot(&mut handles, &regs[rl as usize], true);
                handles.reverse();
                regs[rd as usize] =
                    Slot::Array(Rc::new(RefCell::new(Array::from_refs(handles))));
            }
            SlowOp::Sleep => {
                let (rd, rs) = (w(0), w(1));
                let seconds = self.read_value(regs, rs)?.get_double().max(0.0);
                std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
                self.write_value(regs, rd, Scalar::int(seconds as i64))?;
            }
            SlowOp::Caller => {
                let (rd, rdepth, ctxw) = (w(0), w(1), w(2));
                let depth = self.read_value(regs, rdepth)?.get_int().max(0) as usize;
                // Depth 0 is this sub's own call site: skip the frame
                // executing the `caller` itself.
                let info = self.frames.caller(depth);
                regs[rd as usize] = match (info, CallContext::from(ctxw as i64)) {
                    (None, _) => Slot::fresh(),
                    (Some(info), CallContext::List) => {
                        let fields = vec![
                            Scalar::str(info.package.as_ref()),
                            Scalar::str(info.file.as_ref()),
                            Scalar::int(info.line as i64),
                            Scalar::str(info.sub_name.as_ref()),
                            Scalar::bool_(info.has_args),
                            match info.wantarray {
                                Some(w) => Scalar::bool_(w),
                                None => Scalar::undef(),
                            },
                            match info.eval_text {
                                Some(text) => Scalar::str(text.as_ref()),
                                None => Scalar::undef(),
                            },
                            Scalar::bool_(info.is_require),
                            // Hints, bitmask, and hinthash are carried
                            // as placeholders in this runtime.
                            Scalar::undef(),
                            Scalar::undef(),
                            Scalar::undef(),
                        ];
                        Slot::Array(Rc::new(RefCell::new(Array::from_scalars(fields))))
                    }
                    (Some(info), _) => {
                        Slot::Scalar(scalar_ref(Scalar::str(info.package.as_ref())))
                    }
                };
            }
            SlowOp::LocalSave => {
                let (sid, kind) = (w(0), w(1));
                let name = Rc::clone(&code.strings[sid as usize]);
                let sigil = match kind {
                    1 => Sigil::Array,
                    2 => Sigil::Hash,
                    _ => Sigil::Scalar,
                };
                self.stash.local_save(&name, sigil);
            }
            SlowOp::LocalRestore => {
                let n = w(0) as usize;
                self.stash.local_restore(n);
            }
            SlowOp::Tie => {
                let (rd, rtarget, n, rfirst) = (w(0), w(1), w(2), w(3));
                let handles = self.flatten(regs, rfirst, n, false);
                let class = match handles.first() {
                    Some(first) => {
                        let v = first.borrow().clone();
                        self.string_of(&v)?
                    }
                    None => {
                        return Err(VmError::new(
                            ErrorKind::ArgumentCount,
                            "tie with no class",
                        ))
                    }
                };
                let ctor = self
                    .stash
                    .lookup_method(&class, "TIESCALAR")?
                    .ok_or_else(|| {
                        VmError::new(
                            ErrorKind::Die,
                            format!(
                                "Can't locate object method \"TIESCALAR\" via package \"{class}\"\n"
                            ),
                        )
                    })?;
                let args = Rc::new(RefCell::new(Array::from_refs(handles)));
                let object = self.call_code(&ctor, args, CallContext::Scalar)?;
                let object = self.slot_value(&object);
                let target = self.read_scalar_raw(regs, rtarget)?;
                target
                    .borrow_mut()
                    .set_value(ScalarValue::Tied(Rc::new(RefCell::new(TiedScalar {
                        handler: object.clone(),
                    }))))
                    .map_err(VmError::from)?;
                self.write_value(regs, rd, object)?;
            }
            SlowOp::Untie => {
                let (rd, rtarget) = (w(0), w(1));
                let target = self.read_scalar_raw(regs, rtarget)?;
                let was_tied = matches!(target.borrow().value(), ScalarValue::Tied(_));
                if was_tied {
                    target
                        .borrow_mut()
                        .set_value(ScalarValue::Undef)
                        .map_err(VmError::from)?;
                }
                self.write_value(regs, rd, Scalar::bool_(was_tied))?;
            }
            SlowOp::Alarm => {
                let (rd, rs) = (w(0), w(1));
                let seconds = self.read_value(regs, rs)?.get_int().max(0) as u64;
                let previous = self.signals.alarm(seconds);
                self.write_value(regs, rd, Scalar::int(previous as i64))?;
            }
            SlowOp::Open => {
                let (rd, n, rfirst) = (w(0), w(1), w(2));
                let outcome = self.do_open(regs, n, rfirst)?;
                self.write_value(regs, rd, outcome)?;
            }
            SlowOp::Close => {
                let (rd, rfh) = (w(0), w(1));
                let io = self.resolve_io(regs, rfh)?;
                let outcome = io.borrow_mut().close().is_ok();
                self.write_value(regs, rd, Scalar::bool_(outcome))?;
            }
            SlowOp::Readline => {
                let (rd, rfh) = (w(0), w(1));
                let io = self.resolve_io(regs, rfh)?;
                let line = io.borrow_mut().readline().map_err(VmError::from)?;
                let value = match line {
                    Some(text) => Scalar::str(text.as_str()),
                    None => Scalar::undef(),
                };
                self.write_value(regs, rd, value)?;
            }
            SlowOp::Eof => {
                let (rd, rfh) = (w(0), w(1));
                let io = self.resolve_io(regs, rfh)?;
                let eof = io.borrow().eof();
                self.write_value(regs, rd, Scalar::bool_(eof))?;
            }
            SlowOp::Seek => {
                let (rd, rfh, rpos, rwhence) = (w(0), w(1), w(2), w(3));
                let io = self.resolve_io(regs, rfh)?;
                let pos = self.read_value(regs, rpos)?.get_int();
                let whence = self.read_value(regs, rwhence)?.get_int() as u8;
                let ok = io.borrow_mut().seek(pos, whence).is_ok();
                self.write_value(regs, rd, Scalar::bool_(ok))?;
            }
            SlowOp::Tell => {
                let (rd, rfh) = (w(0), w(1));
                let io = self.resolve_io(regs, rfh)?;
                let at = io.borrow_mut().tell().map_err(VmError::from)?;
                self.write_value(regs, rd, Scalar::int(at as i64))?;
            }
            SlowOp::PrintFh => {
                let (rfh, n, rfirst) = (w(0), w(1), w(2));
                let io = self.resolve_io(regs, rfh)?;
                let handles = self.flatten(regs, rfirst, n, false);
                let mut out = String::new();
                for handle in handles {
                    let v = handle.borrow().clone();
                    out.push_str(&self.string_of(&v)?);
                }
                io.borrow_mut().write(&out).map_err(VmError::from)?;
            }
            SlowOp::Charname => {
                let (rd, rname) = (w(0), w(1));
                let name = {
                    let v = self.read_value(regs, rname)?;
                    self.string_of(&v)?
                };
                let value = match charname(&name) {
                    Some(c) => Scalar::str(c.to_string().as_str()),
                    None => Scalar::undef(),
                };
                self.write_value(regs, rd, value)?;
            }
            // Process control and IPC are cataloged for encoding
            // stability but not provided by this runtime.
            SlowOp::Kill
            | SlowOp::Waitpid
            | SlowOp::System
            | SlowOp::Exec
            | SlowOp::Chmod
            | SlowOp::Socket
            | SlowOp::Bind
            | SlowOp::Listen
            | SlowOp::Accept
            | SlowOp::Msgget
            | SlowOp::Semget
            | SlowOp::Shmget
            | SlowOp::FormatWrite => {
                return Err(VmError::new(
                    ErrorKind::NotImplemented,
                    format!("The {sub:?} operation is not supported by this runtime"),
                ));
            }
            _ => {
                return Err(VmError::new(
                    ErrorKind::NotImplemented,
                    format!("The {sub:?} operation is not supported by this runtime"),
                ));
            }
        }

        Ok(None)
    }

    /// The raw scalar handle of a register, without tie resolution.
    fn read_scalar_raw(
        &mut self,
        regs: &[Slot],
        r: u16,
    ) -> Result<camel_value::ScalarRef, VmError> {
        match &regs[r as usize] {
            Slot::Scalar(s) => Ok(Rc::clone(s)),
            _ => Err(VmError::new(
                ErrorKind::TypeError,
                "Scalar expected",
            )),
        }
    }

    /// 3-argument `open`: target scalar, mode with optional layers, and
    /// a path or in-memory scalar reference. Failure is the recoverable
    /// kind: false return, message in `$!`.
    fn do_open(&mut self, regs: &mut [Slot], n: u16, rfirst: u16) -> Result<Scalar, VmError> {
        let handles = self.flatten(regs, rfirst, n, false);
        if handles.len() < 3 {
            return Err(VmError::new(
                ErrorKind::ArgumentCount,
                "open needs a handle, a mode, and a target",
            ));
        }
        let mode_full = {
            let v = handles[1].borrow().clone();
            self.string_of(&v)?
        };
        let mut parts = mode_full.split(':');
        let mode = parts.next().unwrap_or("<").trim().to_owned();
        let layers: Vec<Layer> = parts
            .map(|layer| match layer.trim() {
                "raw" => Layer::Raw,
                "crlf" => Layer::Crlf,
                "utf8" => Layer::Utf8,
                other => Layer::Encoding(Rc::from(other)),
            })
            .collect();

        let target = handles[2].borrow().clone();
        let backend = match target.value() {
            // `open $fh, '<', \$scalar` reads from memory.
            ScalarValue::Ref(r) => match r.target() {
                RefTarget::Scalar(s) => {
                    let bytes = s.borrow().get_string().as_bytes().to_vec();
                    Some(IoBackend::Memory(std::io::Cursor::new(bytes)))
                }
                _ => None,
            },
            _ => {
                let path = self.string_of(&target)?;
                let opened = match mode.as_str() {
                    ">" => std::fs::File::create(path.as_ref()).ok(),
                    ">>" => std::fs::OpenOptions::new()
                        .append(true)
                        .create(true)
                        .open(path.as_ref())
                        .ok(),
                    _ => std::fs::File::open(path.as_ref()).ok(),
                };
                opened.map(IoBackend::File)
            }
        };

        match backend {
            Some(backend) => {
                let io = FileHandle::new_ref(backend, layers);
                handles[0]
                    .borrow_mut()
                    .set_value(ScalarValue::Ref(Reference::new(RefTarget::Io(io))))
                    .map_err(VmError::from)?;
                Ok(Scalar::bool_(true))
            }
            None => {
                let err = Scalar::str("No such file or directory");
                self.stash
                    .set_scalar("main::!", &err)
                    .map_err(VmError::from)?;
                Ok(Scalar::bool_(false))
            }
        }
    }

    fn resolve_io(&mut self, regs: &[Slot], r: u16) -> Result<camel_value::IoRef, VmError> {
        let value = match &regs[r as usize] {
            Slot::Scalar(s) => s.borrow().clone(),
            _ => {
                return Err(VmError::new(
                    ErrorKind::TypeError,
                    "Not a filehandle",
                ))
            }
        };
        match value.value() {
            ScalarValue::Ref(rf) => match rf.target() {
                RefTarget::Io(io) => Ok(Rc::clone(io)),
                RefTarget::Glob(g) => g.borrow().io.clone().ok_or_else(|| {
                    VmError::new(ErrorKind::IoError, "Filehandle never opened")
                }),
                _ => Err(VmError::new(ErrorKind::TypeError, "Not a filehandle")),
            },
            ScalarValue::Glob(g) => g.borrow().io.clone().ok_or_else(|| {
                VmError::new(ErrorKind::IoError, "Filehandle never opened")
            }),
            ScalarValue::Str(s) => match s.as_ref() {
                "STDOUT" => Ok(Rc::clone(&self.stdout)),
                "STDERR" => Ok(Rc::clone(&self.stderr)),
                "STDIN" => Ok(Rc::clone(&self.stdin)),
                _ => Err(VmError::new(ErrorKind::TypeError, "Not a filehandle")),
            },
            _ => Err(VmError::new(ErrorKind::TypeError, "Not a filehandle")),
        }
    }
}

/// The handful of named sequences this runtime resolves.
fn charname(name: &str) -> Option<char> {
    match name {
        "NULL" | "NUL" => Some('\0'),
        "LINE FEED" | "LF" => Some('\n'),
        "CARRIAGE RETURN" | "CR" => Some('\r'),
        "HORIZONTAL TABULATION" | "TAB" => Some('\t'),
        "SPACE" => Some(' '),
        "LATIN SMALL LETTER A" => Some('a'),
        "LATIN CAPITAL LETTER A" => Some('A'),
        _ => None,
    }
}
