//! The fetch/decode/dispatch loop.
//!
//! Every fast opcode executes inline here; `SLOW_OP` escapes to the cold
//! handler so the hot loop stays small. Errors pick up their source
//! location and a frame snapshot on the way out.

use std::rc::Rc;

use camel_asm::{CallContext, ErrorKind, Opcode};
use camel_value::{
    scalar_ref, Array, CodeValue, CompiledCode, ControlFlow, ControlKind, Hash, Reference,
    RefTarget, Scalar, ScalarValue, Slot,
};

use crate::error::VmError;
use crate::state::ExecuteState;

use super::Interpreter;

impl Interpreter {
    /// Runs one body's bytecode to completion.
    pub(crate) fn exec(
        &mut self,
        code: &Rc<CompiledCode>,
        regs: &mut Vec<Slot>,
    ) -> Result<ExecuteState, VmError> {
        let words = &code.code;
        let mut pc = 0usize;

        while pc < words.len() {
            if self.signals.armed() {
                if let Err(err) = self.deliver_signal() {
                    return Err(self.fail(code, pc, err));
                }
            }

            let op_pc = pc;
            let (op, next) = match Opcode::decode(words, pc) {
                Ok(decoded) => decoded,
                Err(_) => {
                    let err = VmError::new(ErrorKind::UnknownErrorKind, "Malformed bytecode\n");
                    return Err(self.fail(code, op_pc, err));
                }
            };
            pc = next;

            tracing::trace!(pc = op_pc, %op, "dispatch");

            match self.step(op, code, regs, &mut pc, op_pc) {
                Ok(None) => {}
                Ok(Some(state)) => return Ok(state),
                Err(err) => return Err(self.fail(code, op_pc, err)),
            }
        }

        Ok(ExecuteState::Return(Slot::fresh()))
    }

    /// Stamps an outgoing error with its raise location and a back-trace.
    fn fail(&mut self, code: &Rc<CompiledCode>, pc: usize, err: VmError) -> VmError {
        let line = code.line_for_pc(pc as u32);
        if let Some(frame) = self.frames.current_mut() {
            frame.saved_pc = pc as u32;
            frame.line = line;
        }
        let err = locate(err, &code.source_name, line);
        let trace = self.frames.snapshot();
        err.with_trace(trace)
    }

    #[allow(clippy::too_many_lines)]
    fn step(
        &mut self,
        op: Opcode,
        code: &Rc<CompiledCode>,
        regs: &mut Vec<Slot>,
        pc: &mut usize,
        op_pc: usize,
    ) -> Result<Option<ExecuteState>, VmError> {
        use Opcode::*;

        match op {
            NOP => {}

            /* CONTROL FLOW */
            RETURN(rs) => return Ok(Some(ExecuteState::Return(regs[rs as usize].clone()))),
            GOTO(off) => jump(pc, off),
            GOTO_IF_FALSE(rc, off) => {
                let cond = self.read_value(regs, rc)?;
                if !self.truthy_of(&cond)? {
                    jump(pc, off);
                }
            }
            GOTO_IF_TRUE(rc, off) => {
                let cond = self.read_value(regs, rc)?;
                if self.truthy_of(&cond)? {
                    jump(pc, off);
                }
            }

            /* REGISTER OPS */
            MOVE(rd, rs) => self.move_value(regs, rd, rs)?,
            ALIAS(rd, rs) => regs[rd as usize] = regs[rs as usize].clone(),
            LOAD_CONST(rd, k) => {
                let value = code.constants[k as usize].clone();
                regs[rd as usize] = Slot::Scalar(scalar_ref(value));
            }
            LOAD_INT(rd, imm) => {
                regs[rd as usize] = Slot::Scalar(scalar_ref(Scalar::int(imm as i64)));
            }
            LOAD_STRING(rd, s) => {
                let text = Rc::clone(&code.strings[s as usize]);
                regs[rd as usize] = Slot::Scalar(scalar_ref(Scalar::str(text)));
            }
            LOAD_UNDEF(rd) => regs[rd as usize] = Slot::fresh(),
            LOAD_BOOL(rd, imm) => {
                regs[rd as usize] = Slot::Scalar(scalar_ref(Scalar::bool_(imm != 0)));
            }

            /* PACKAGE SLOTS */
            PKG_GET_SCALAR(rd, s) => {
                let name = &code.strings[s as usize];
                let handle = self.stash.scalar_slot(name);
                regs[rd as usize] = Slot::Scalar(handle);
            }
            PKG_SET_SCALAR(s, rs) => {
                let value = self.read_value(regs, rs)?;
                let name = Rc::clone(&code.strings[s as usize]);
                self.stash.set_scalar(&name, &value).map_err(VmError::from)?;
            }
            PKG_GET_ARRAY(rd, s) => {
                let name = &code.strings[s as usize];
                let handle = self.stash.array_slot(name);
                regs[rd as usize] = Slot::Array(handle);
            }
            PKG_SET_ARRAY(s, rs) => {
                let mut elems = Vec::new();
                Self::flatten_slot(&mut elems, &regs[rs as usize], true);
                let name = Rc::clone(&code.strings[s as usize]);
                self.stash.set_array_contents(&name, elems);
            }
            PKG_GET_HASH(rd, s) => {
                let name = &code.strings[s as usize];
                let handle = self.stash.hash_slot(name);
                regs[rd as usize] = Slot::Hash(handle);
            }
            PKG_SET_HASH(s, rs) => {
                let mut elems = Vec::new();
                Self::flatten_slot(&mut elems, &regs[rs as usize], true);
                let name = Rc::clone(&code.strings[s as usize]);
                let slot = self.stash.hash_slot(&name);
                *slot.borrow_mut() = camel_value::hash::hash_from_list(elems);
            }
            PKG_BIND_SCALAR(s, rs) => {
                let handle = match &regs[rs as usize] {
                    Slot::Scalar(handle) => Rc::clone(handle),
                    _ => {
                        return Err(VmError::new(
                            ErrorKind::TypeError,
                            "Scalar expected in slot binding",
                        ))
                    }
                };
                let name = &code.strings[s as usize];
                let glob = self.stash.glob(name);
                glob.borrow_mut().scalar = Some(handle);
            }
            PKG_GET_CODE(rd, s) => {
                let name = &code.strings[s as usize];
                let value = match self.stash.code_slot(name) {
                    Some(cv) => Scalar::code(cv),
                    None => Scalar::undef(),
                };
                regs[rd as usize] = Slot::Scalar(scalar_ref(value));
            }
            PKG_SET_CODE(s, rs) => {
                let value = self.read_value(regs, rs)?;
                let cv = self.resolve_code(&value)?;
                let name = Rc::clone(&code.strings[s as usize]);
                self.stash.set_code(&name, cv);
            }

            /* ARITHMETIC */
            ADD(rd, ra, rb) => self.arith(regs, rd, ra, rb, ArithOp::Add)?,
            SUB(rd, ra, rb) => self.arith(regs, rd, ra, rb, ArithOp::Sub)?,
            MUL(rd, ra, rb) => self.arith(regs, rd, ra, rb, ArithOp::Mul)?,
            DIV(rd, ra, rb) => self.arith(regs, rd, ra, rb, ArithOp::Div)?,
            MOD(rd, ra, rb) => self.arith(regs, rd, ra, rb, ArithOp::Mod)?,
            POW(rd, ra, rb) => self.arith(regs, rd, ra, rb, ArithOp::Pow)?,
            ADD_INT(rd, ra, rb) => self.arith_int(regs, rd, ra, rb, ArithOp::Add)?,
            SUB_INT(rd, ra, rb) => self.arith_int(regs, rd, ra, rb, ArithOp::Sub)?,
            MUL_INT(rd, ra, rb) => self.arith_int(regs, rd, ra, rb, ArithOp::Mul)?,
            NEG(rd, rs) => self.negate(regs, rd, rs)?,
            INC(rd) => {
                let slot = self.read_scalar(regs, rd)?;
                slot.borrow_mut().increment().map_err(VmError::from)?;
            }
            DEC(rd) => {
                let slot = self.read_scalar(regs, rd)?;
                slot.borrow_mut().decrement().map_err(VmError::from)?;
            }

            /* STRINGS */
            CONCAT(rd, ra, rb) => self.concat(regs, rd, ra, rb)?,
            REPEAT(rd, ra, rb) => self.repeat(regs, rd, ra, rb)?,
            SUBSTR(rd, rs, ro, rl) => {
                let s = {
                    let v = self.read_value(regs, rs)?;
                    self.string_of(&v)?
                };
                let off = self.read_value(regs, ro)?.get_int();
                let len = self.read_value(regs, rl)?.get_int();
                let value = substr(&s, off, len);
                self.write_value(regs, rd, value)?;
            }
            LENGTH(rd, rs) => {
                let v = self.read_value(regs, rs)?;
                let value = if v.is_defined() {
                    Scalar::int(self.string_of(&v)?.chars().count() as i64)
                } else {
                    Scalar::undef()
                };
                self.write_value(regs, rd, value)?;
            }

            /* COMPARISONS */
            EQ_NUM(rd, ra, rb) => self.cmp_num(regs, rd, ra, rb, CmpOp::Eq)?,
            NE_NUM(rd, ra, rb) => self.cmp_num(regs, rd, ra, rb, CmpOp::Ne)?,
            LT_NUM(rd, ra, rb) => self.cmp_num(regs, rd, ra, rb, CmpOp::Lt)?,
            GT_NUM(rd, ra, rb) => self.cmp_num(regs, rd, ra, rb, CmpOp::Gt)?,
            LE_NUM(rd, ra, rb) => self.cmp_num(regs, rd, ra, rb, CmpOp::Le)?,
            GE_NUM(rd, ra, rb) => self.cmp_num(regs, rd, ra, rb, CmpOp::Ge)?,
            CMP_NUM(rd, ra, rb) => self.cmp_num(regs, rd, ra, rb, CmpOp::Spaceship)?,
            EQ_STR(rd, ra, rb) => self.cmp_str(regs, rd, ra, rb, CmpOp::Eq)?,
            NE_STR(rd, ra, rb) => self.cmp_str(regs, rd, ra, rb, CmpOp::Ne)?,
            LT_STR(rd, ra, rb) => self.cmp_str(regs, rd, ra, rb, CmpOp::Lt)?,
            GT_STR(rd, ra, rb) => self.cmp_str(regs, rd, ra, rb, CmpOp::Gt)?,
            LE_STR(rd, ra, rb) => self.cmp_str(regs, rd, ra, rb, CmpOp::Le)?,
            GE_STR(rd, ra, rb) => self.cmp_str(regs, rd, ra, rb, CmpOp::Ge)?,
            CMP_STR(rd, ra, rb) => self.cmp_str(regs, rd, ra, rb, CmpOp::Spaceship)?,

            /* LOGIC */
            NOT(rd, rs) => {
                let v = self.read_value(regs, rs)?;
                let truth = self.truthy_of(&v)?;
                self.write_value(regs, rd, Scalar::bool_(!truth))?;
            }
            AND(rd, ra, rb) => {
                let a = self.read_value(regs, ra)?;
                let pick = if self.truthy_of(&a)? { rb } else { ra };
                self.move_value(regs, rd, pick)?;
            }
            OR(rd, ra, rb) => {
                let a = self.read_value(regs, ra)?;
                let pick = if self.truthy_of(&a)? { ra } else { rb };
                self.move_value(regs, rd, pick)?;
            }
            DEFINED(rd, rs) => {
                let defined = match &regs[rs as usize] {
                    Slot::Scalar(s) => s.borrow().is_defined(),
                    Slot::Array(a) => !a.borrow().is_empty(),
                    Slot::Hash(h) => !h.borrow().is_empty(),
                };
                self.write_value(regs, rd, Scalar::bool_(defined))?;
            }

            /* ARRAYS */
            ARRAY_CREATE(rd, n, base) => {
                let elems = self.flatten(regs, base, n, true);
                regs[rd as usize] =
                    Slot::Array(Rc::new(std::cell::RefCell::new(Array::from_refs(elems))));
            }
            ARRAY_GET(rd, ra, ri) => {
                let arr = self.resolve_array(regs, ra)?;
                let idx = self.read_value(regs, ri)?.get_int();
                let found = arr.borrow().get(idx);
                regs[rd as usize] = match found {
                    Some(handle) => Slot::Scalar(handle),
                    None => Slot::fresh(),
                };
            }
            ARRAY_SET(ra, ri, rs) => {
                let arr = self.resolve_array(regs, ra)?;
                let idx = self.read_value(regs, ri)?.get_int();
                let value = self.read_value(regs, rs)?;
                arr.borrow_mut().set(idx, &value).map_err(VmError::from)?;
            }
            ARRAY_PUSH(ra, n, base) => {
                let arr = self.resolve_array(regs, ra)?;
                let elems = self.flatten(regs, base, n, true);
                arr.borrow_mut().push(elems);
            }
            ARRAY_POP(rd, ra) => {
                let arr = self.resolve_array(regs, ra)?;
                let popped = arr.borrow_mut().pop();
                regs[rd as usize] = match popped {
                    Some(handle) => Slot::Scalar(handle),
                    None => Slot::fresh(),
                };
            }
            ARRAY_SHIFT(rd, ra) => {
                let arr = self.resolve_array(regs, ra)?;
                let shifted = arr.borrow_mut().shift();
                regs[rd as usize] = match shifted {
                    Some(handle) => Slot::Scalar(handle),
                    None => Slot::fresh(),
                };
            }
            ARRAY_UNSHIFT(ra, n, base) => {
                let arr = self.resolve_array(regs, ra)?;
                let elems = self.flatten(regs, base, n, true);
                arr.borrow_mut().unshift(elems);
            }
            ARRAY_SIZE(rd, ra) => {
                let arr = self.resolve_array(regs, ra)?;
                let len = arr.borrow().len() as i64;
                self.write_value(regs, rd, Scalar::int(len))?;
            }

            /* HASHES */
            HASH_CREATE(rd, n, base) => {
                let elems = self.flatten(regs, base, n, true);
                let hash = camel_value::hash::hash_from_list(elems);
                regs[rd as usize] = Slot::Hash(Rc::new(std::cell::RefCell::new(hash)));
            }
            HASH_GET(rd, rh, rk) => {
                let hash = self.resolve_hash(regs, rh)?;
                let key = {
                    let v = self.read_value(regs, rk)?;
                    self.string_of(&v)?
                };
                let found = hash.borrow().get(&key);
                regs[rd as usize] = match found {
                    Some(handle) => Slot::Scalar(handle),
                    None => Slot::fresh(),
                };
            }
            HASH_SET(rh, rk, rs) => {
                let hash = self.resolve_hash(regs, rh)?;
                let key = {
                    let v = self.read_value(regs, rk)?;
                    self.string_of(&v)?
                };
                let value = self.read_value(regs, rs)?;
                hash.borrow_mut().set(&key, &value).map_err(VmError::from)?;
            }
            HASH_EXISTS(rd, rc, rk) => {
                let value = self.container_query(regs, rc, rk, true)?;
                self.write_value(regs, rd, value)?;
            }
            HASH_DELETE(rd, rc, rk) => {
                let value = self.container_query(regs, rc, rk, false)?;
                self.write_value(regs, rd, value)?;
            }
            HASH_KEYS(rd, rh) => {
                let hash = self.resolve_hash(regs, rh)?;
                let keys = hash.borrow_mut().keys();
                let elems = keys
                    .into_iter()
                    .map(|k| scalar_ref(Scalar::str(k.as_ref())))
                    .collect();
                regs[rd as usize] =
                    Slot::Array(Rc::new(std::cell::RefCell::new(Array::from_refs(elems))));
            }
            HASH_VALUES(rd, rh) => {
                let hash = self.resolve_hash(regs, rh)?;
                let values = hash.borrow_mut().values();
                regs[rd as usize] =
                    Slot::Array(Rc::new(std::cell::RefCell::new(Array::from_refs(values))));
            }

            /* CALLS */
            CALL_SUB(rd, rf, n, base, ctxw) => {
                self.mark_call_site(code, op_pc);
                let callee = self.read_value(regs, rf)?;
                let cv = self.resolve_code(&callee)?;
                let handles = self.flatten(regs, base, n, false);
                let args = Rc::new(std::cell::RefCell::new(Array::from_refs(handles)));
                let result = self.call_code(&cv, args, context_of(ctxw))?;
                regs[rd as usize] = result;
            }
            CALL_METHOD(rd, s, n, base, ctxw) => {
                self.mark_call_site(code, op_pc);
                let method = Rc::clone(&code.strings[s as usize]);
                let handles = self.flatten(regs, base, n, false);
                let args = Rc::new(std::cell::RefCell::new(Array::from_refs(handles)));
                let result = self.method_call(&method, args, context_of(ctxw))?;
                regs[rd as usize] = result;
            }
            CALL_BUILTIN(rd, builtin, n, base, ctxw) => {
                self.mark_call_site(code, op_pc);
                let args: Vec<Slot> = regs[base as usize..(base + n) as usize].to_vec();
                let result = self.builtin(builtin, args, context_of(ctxw))?;
                regs[rd as usize] = result;
            }
            MAKE_CLOSURE(rd, k) => {
                let template = code.constants[k as usize].clone();
                let ScalarValue::Code(cv) = template.value() else {
                    return Err(VmError::new(
                        ErrorKind::UnknownErrorKind,
                        "Malformed closure constant\n",
                    ));
                };
                let Some(closure) = cv.closure() else {
                    return Err(VmError::new(
                        ErrorKind::UnknownErrorKind,
                        "Malformed closure constant\n",
                    ));
                };
                // Snapshot the capture sources by sharing their handles.
                let captured = closure
                    .code
                    .captured_slots
                    .iter()
                    .map(|slot| regs[slot.parent_register as usize].clone())
                    .collect();
                let fresh = CodeValue::Bytecode(camel_value::Closure {
                    code: Rc::clone(&closure.code),
                    captured,
                });
                regs[rd as usize] =
                    Slot::Scalar(scalar_ref(Scalar::code(Rc::new(fresh))));
            }
            GOTO_SUB(rf) => {
                let callee = self.read_value(regs, rf)?;
                let cv = self.resolve_code(&callee)?;
                let args = match &regs[crate::consts::REG_ARGS as usize] {
                    Slot::Array(a) => Rc::clone(a),
                    _ => Rc::new(std::cell::RefCell::new(Array::new())),
                };
                return Ok(Some(ExecuteState::TailCall(cv, args)));
            }

            /* CONTEXT */
            LIST_TO_SCALAR(rd, rs) => {
                let value = match &regs[rs as usize] {
                    Slot::Scalar(s) => s.borrow().clone(),
                    Slot::Array(a) => match a.borrow().get(-1) {
                        Some(last) => last.borrow().clone(),
                        None => Scalar::undef(),
                    },
                    Slot::Hash(h) => Scalar::int(h.borrow().len() as i64),
                };
                self.write_value(regs, rd, value)?;
            }
            SCALAR_TO_LIST(rd, rs) => {
                regs[rd as usize] = match &regs[rs as usize] {
                    Slot::Scalar(s) => {
                        let copy = scalar_ref(s.borrow().clone());
                        Slot::Array(Rc::new(std::cell::RefCell::new(Array::from_refs(
                            vec![copy],
                        ))))
                    }
                    other => other.clone(),
                };
            }

            /* CONTROL-FLOW VALUES */
            CREATE_LAST(rd, s) => self.make_control(code, regs, rd, s, ControlKind::Last),
            CREATE_NEXT(rd, s) => self.make_control(code, regs, rd, s, ControlKind::Next),
            CREATE_REDO(rd, s) => self.make_control(code, regs, rd, s, ControlKind::Redo),
            CREATE_GOTO(rd, s) => self.make_control(code, regs, rd, s, ControlKind::Goto),
            IS_CONTROL_FLOW(rd, rs) => {
                let is_cf = match &regs[rs as usize] {
                    Slot::Scalar(s) => s.borrow().is_control_flow(),
                    _ => false,
                };
                self.write_value(regs, rd, Scalar::bool_(is_cf))?;
            }
            GET_CONTROL_FLOW_TYPE(rd, rs) => {
                let value = match &regs[rs as usize] {
                    Slot::Scalar(s) => match s.borrow().control_flow() {
                        Some(cf) => Scalar::int(cf.kind as i64),
                        None => Scalar::undef(),
                    },
                    _ => Scalar::undef(),
                };
                self.write_value(regs, rd, value)?;
            }
            GET_CONTROL_FLOW_LABEL(rd, rs) => {
                let value = match &regs[rs as usize] {
                    Slot::Scalar(s) => match s.borrow().control_flow() {
                        Some(ControlFlow {
                            label: Some(label), ..
                        }) => Scalar::str(label.as_ref()),
                        _ => Scalar::undef(),
                    },
                    _ => Scalar::undef(),
                };
                self.write_value(regs, rd, value)?;
            }

            /* REFERENCES */
            CREATE_REF(rd, rs, kind) => {
                let reference = self.make_reference(regs, rs, kind)?;
                regs[rd as usize] = Slot::Scalar(scalar_ref(Scalar::reference(reference)));
            }
            DEREF(rd, rs, kind) => {
                let slot = self.deref(regs, rs, kind)?;
                regs[rd as usize] = slot;
            }
            GET_TYPE(rd, rs) => {
                let v = self.read_value(regs, rs)?;
                let name = v.ref_type_name();
                self.write_value(regs, rd, Scalar::str(name.as_ref()))?;
            }

            /* OUTPUT AND ERRORS */
            PRINT(n, base) => self.print(regs, n, base, false)?,
            SAY(n, base) => self.print(regs, n, base, true)?,
            DIE(rmsg, k) => {
                self.mark_call_site(code, op_pc);
                let payload = self.die_payload(code, regs, rmsg, k)?;
                return Err(VmError::die(payload));
            }
            WARN(rmsg, k) => {
                let payload = self.die_payload(code, regs, rmsg, k)?;
                let text = payload.get_string();
                self.stderr
                    .borrow_mut()
                    .write(&text)
                    .map_err(VmError::from)?;
            }

            SLOW_OP(sub) => {
                self.mark_call_site(code, op_pc);
                let base = *pc - sub.operand_words();
                if let Some(state) = self.slow_op(sub, code, base, regs)? {
                    return Ok(Some(state));
                }
            }
        }

        Ok(None)
    }

    fn mark_call_site(&mut self, code: &CompiledCode, op_pc: usize) {
        if let Some(frame) = self.frames.current_mut() {
            frame.saved_pc = op_pc as u32;
            frame.line = code.line_for_pc(op_pc as u32);
        }
    }

    fn make_control(
        &mut self,
        code: &CompiledCode,
        regs: &mut [Slot],
        rd: u16,
        s: u16,
        kind: ControlKind,
    ) {
        let label = if s == camel_asm::NO_LABEL {
            None
        } else {
            Some(Rc::clone(&code.strings[s as usize]))
        };
        regs[rd as usize] = Slot::Scalar(scalar_ref(Scalar::control(ControlFlow::new(
            kind, label,
        ))));
    }

    fn die_payload(
        &mut self,
        code: &CompiledCode,
        regs: &mut [Slot],
        rmsg: u16,
        k: u16,
    ) -> Result<Scalar, VmError> {
        let payload = self.read_value(regs, rmsg)?;
        match payload.value() {
            ScalarValue::Ref(_) | ScalarValue::WeakRef(_) => Ok(payload),
            _ => {
                let text = self.string_of(&payload)?;
                if text.ends_with('\n') {
                    Ok(Scalar::str(text.as_ref()))
                } else {
                    // The location suffix was baked at compile time.
                    let suffix = code.constants[k as usize].get_string();
                    Ok(Scalar::str(format!("{text}{suffix}").as_str()))
                }
            }
        }
    }

    fn print(&mut self, regs: &[Slot], n: u16, base: u16, newline: bool) -> Result<(), VmError> {
        let handles = self.flatten(regs, base, n, false);
        let mut out = String::new();
        for handle in handles {
            let value = handle.borrow().clone();
            out.push_str(&self.string_of(&value)?);
        }
        if newline {
            out.push('\n');
        }
        let stdout = Rc::clone(&self.stdout);
        let result = stdout.borrow_mut().write(&out).map_err(VmError::from);
        result
    }

    /// Value assignment: copies the source's value(s) into the
    /// destination, preserving the destination's slot handle. A
    /// hash-shaped destination consumes a list source as key/value
    /// pairs, the way `%h = (...)` does.
    fn move_value(&mut self, regs: &mut [Slot], rd: u16, rs: u16) -> Result<(), VmError> {
        match regs[rs as usize].clone() {
            Slot::Scalar(s) => {
                let resolved = self.resolve_tied(&s)?;
                let value = resolved.borrow().clone();
                self.write_value(regs, rd, value)
            }
            Slot::Array(a) => {
                let copies: Vec<_> = a
                    .borrow()
                    .iter()
                    .map(|e| scalar_ref(e.borrow().clone()))
                    .collect();
                match &regs[rd as usize] {
                    Slot::Array(dest) => dest.borrow_mut().replace(copies),
                    Slot::Hash(dest) => {
                        *dest.borrow_mut() = camel_value::hash::hash_from_list(copies);
                    }
                    Slot::Scalar(_) => {
                        regs[rd as usize] = Slot::Array(Rc::new(std::cell::RefCell::new(
                            Array::from_refs(copies),
                        )))
                    }
                }
                Ok(())
            }
            Slot::Hash(h) => {
                let pairs: Vec<_> = h
                    .borrow()
                    .iter()
                    .map(|(k, v)| (Rc::clone(k), scalar_ref(v.borrow().clone())))
                    .collect();
                match &regs[rd as usize] {
                    Slot::Hash(dest) => dest.borrow_mut().replace_from_pairs(pairs),
                    Slot::Array(dest) => {
                        // List context flattens the pairs back out.
                        let mut flat = Vec::with_capacity(pairs.len() * 2);
                        for (k, v) in pairs {
                            flat.push(scalar_ref(Scalar::str(k.as_ref())));
                            flat.push(v);
                        }
                        dest.borrow_mut().replace(flat);
                    }
                    Slot::Scalar(_) => {
                        let mut hash = Hash::new();
                        hash.replace_from_pairs(pairs);
                        regs[rd as usize] =
                            Slot::Hash(Rc::new(std::cell::RefCell::new(hash)));
                    }
                }
                Ok(())
            }
        }
    }

    /// `exists`/`delete`, index semantics for arrays and key semantics
    /// for hashes behind the same opcode pair.
    fn container_query(
        &mut self,
        regs: &mut [Slot],
        rc: u16,
        rk: u16,
        exists: bool,
    ) -> Result<Scalar, VmError> {
        let is_array = match &regs[rc as usize] {
            Slot::Array(_) => true,
            Slot::Scalar(s) => matches!(
                s.borrow().value(),
                ScalarValue::Ref(r) if matches!(r.target(), RefTarget::Array(_))
            ),
            Slot::Hash(_) => false,
        };
        if is_array {
            let arr = self.resolve_array(regs, rc)?;
            let idx = self.read_value(regs, rk)?.get_int();
            if exists {
                let found = arr.borrow().exists(idx);
                Ok(Scalar::bool_(found))
            } else {
                let deleted = arr.borrow_mut().delete(idx);
                Ok(match deleted {
                    Some(handle) => handle.borrow().clone(),
                    None => Scalar::undef(),
                })
            }
        } else {
            let hash = self.resolve_hash(regs, rc)?;
            let key = {
                let v = self.read_value(regs, rk)?;
                self.string_of(&v)?
            };
            if exists {
                let found = hash.borrow().exists(&key);
                Ok(Scalar::bool_(found))
            } else {
                let deleted = hash.borrow_mut().delete(&key);
                Ok(match deleted {
                    Some(handle) => handle.borrow().clone(),
                    None => Scalar::undef(),
                })
            }
        }
    }

    fn make_reference(
        &mut self,
        regs: &mut [Slot],
        rs: u16,
        kind: camel_asm::RefKind,
    ) -> Result<Reference, VmError> {
        use camel_asm::RefKind;
        match kind {
            RefKind::Scalar => match &regs[rs as usize] {
                Slot::Scalar(s) => Ok(Reference::to_scalar(Rc::clone(s))),
                Slot::Array(a) => Ok(Reference::to_array(Rc::clone(a))),
                Slot::Hash(h) => Ok(Reference::to_hash(Rc::clone(h))),
            },
            RefKind::Array => {
                let arr = self.resolve_array(regs, rs)?;
                Ok(Reference::to_array(arr))
            }
            RefKind::Hash => {
                let hash = self.resolve_hash(regs, rs)?;
                Ok(Reference::to_hash(hash))
            }
            RefKind::Code => {
                let value = self.read_value(regs, rs)?;
                let cv = self.resolve_code(&value)?;
                Ok(Reference::to_code(cv))
            }
            RefKind::Glob => {
                let value = self.read_value(regs, rs)?;
                match value.value() {
                    ScalarValue::Glob(g) => {
                        Ok(Reference::new(RefTarget::Glob(Rc::clone(g))))
                    }
                    _ => Err(VmError::new(ErrorKind::TypeError, "Not a GLOB reference\n")),
                }
            }
        }
    }

    fn deref(
        &mut self,
        regs: &mut [Slot],
        rs: u16,
        kind: camel_asm::RefKind,
    ) -> Result<Slot, VmError> {
        use camel_asm::RefKind;
        let value = self.read_value(regs, rs)?;
        let value = self.deref_overload(&value, kind)?;
        let reference = match value.value() {
            ScalarValue::Ref(r) => r.clone(),
            ScalarValue::WeakRef(w) => w.upgrade().ok_or_else(|| {
                VmError::new(
                    ErrorKind::TypeError,
                    "Can't use an undefined value as a reference\n",
                )
            })?,
            ScalarValue::Code(cv) if kind == RefKind::Code => {
                return Ok(Slot::Scalar(scalar_ref(Scalar::code(Rc::clone(cv)))));
            }
            ScalarValue::Undef => {
                return Err(VmError::new(
                    ErrorKind::TypeError,
                    "Can't use an undefined value as a reference\n",
                ))
            }
            _ => {
                return Err(VmError::new(ErrorKind::TypeError, "Not a reference\n"));
            }
        };
        match (kind, reference.target()) {
            (RefKind::Scalar, RefTarget::Scalar(s)) => Ok(Slot::Scalar(Rc::clone(s))),
            (RefKind::Array, RefTarget::Array(a)) => Ok(Slot::Array(Rc::clone(a))),
            (RefKind::Hash, RefTarget::Hash(h)) => Ok(Slot::Hash(Rc::clone(h))),
            (RefKind::Code, RefTarget::Code(cv)) => {
                Ok(Slot::Scalar(scalar_ref(Scalar::code(Rc::clone(cv)))))
            }
            (RefKind::Glob, RefTarget::Glob(g)) => {
                Ok(Slot::Scalar(scalar_ref(Scalar::glob(Rc::clone(g)))))
            }
            (wanted, _) => Err(VmError::new(
                ErrorKind::TypeError,
                format!("Not a {} reference\n", kind_name(wanted)),
            )),
        }
    }

    fn method_call(
        &mut self,
        method: &str,
        args: camel_value::ArrayRef,
        ctx: CallContext,
    ) -> Result<Slot, VmError> {
        let invocant = args
            .borrow()
            .get(0)
            .ok_or_else(|| VmError::new(ErrorKind::Die, "Can't call method on empty invocant\n"))?;
        let invocant = invocant.borrow().clone();

        let (calling_class, bare_method): (Option<String>, &str) = match method
            .strip_prefix("SUPER::")
        {
            Some(rest) => match rest.rsplit_once("::") {
                Some((class, m)) => (Some(class.to_owned()), m),
                None => (None, rest),
            },
            None => (None, method),
        };

        let class = match invocant.value() {
            ScalarValue::Ref(r) => match r.class() {
                Some(class) => class.to_string(),
                None => {
                    return Err(VmError::new(
                        ErrorKind::Die,
                        "Can't call method on unblessed reference\n",
                    ))
                }
            },
            ScalarValue::Str(s) => s.to_string(),
            _ => {
                return Err(VmError::new(
                    ErrorKind::Die,
                    format!("Can't call method \"{bare_method}\" without a package or object reference\n"),
                ))
            }
        };

        let found = match calling_class {
            Some(calling) => self.stash.lookup_super_method(&calling, bare_method)?,
            None => self.stash.lookup_method(&class, bare_method)?,
        };
        let code = found.ok_or_else(|| {
            VmError::new(
                ErrorKind::Die,
                format!("Can't locate object method \"{bare_method}\" via package \"{class}\"\n"),
            )
        })?;
        self.call_code(&code, args, ctx)
    }
}

fn jump(pc: &mut usize, off: i32) {
    *pc = (*pc as i64 + off as i64) as usize;
}

fn context_of(word: u16) -> CallContext {
    CallContext::from(word as i64)
}

fn kind_name(kind: camel_asm::RefKind) -> &'static str {
    use camel_asm::RefKind;
    match kind {
        RefKind::Scalar => "SCALAR",
        RefKind::Array => "ARRAY",
        RefKind::Hash => "HASH",
        RefKind::Code => "CODE",
        RefKind::Glob => "GLOB",
    }
}

/// Arithmetic selector shared by the generic and integer-specialized
/// opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

/// Comparison selector shared by the numeric and string families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Spaceship,
}

/// Character-wise `substr` with Perl's negative-offset rules.
fn substr(s: &str, off: i64, len: i64) -> Scalar {
    let chars: Vec<char> = s.chars().collect();
    let total = chars.len() as i64;
    let start = if off < 0 { (total + off).max(0) } else { off.min(total) };
    let take = if len < 0 {
        (total - start + len).max(0)
    } else {
        len.min(total - start)
    };
    let out: String = chars[start as usize..(start + take) as usize].iter().collect();
    Scalar::str(out.as_str())
}

/// Errors raised with no newline get the conventional location suffix.
fn locate(mut err: VmError, file: &str, line: u32) -> VmError {
    let is_ref = matches!(
        err.payload.value(),
        ScalarValue::Ref(_) | ScalarValue::WeakRef(_)
    );
    if !is_ref {
        let text = err.payload.get_string();
        if !text.ends_with('\n') {
            err.payload = Scalar::str(format!("{text} at {file} line {line}.\n").as_str());
        }
    }
    err
}
