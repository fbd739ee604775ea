//! Expression emission.

use std::rc::Rc;

use camel_asm::{Builtin, Opcode, RefKind, SlowOp, NO_LABEL};
use camel_value::{Scalar, Sigil};

use crate::ast::{BinOp, DerefKind, LogOp, Node, NodeKind, UnOp};
use crate::capture::is_global_name;
use crate::consts::{LIST_CHUNK_LEN, REG_CTX};
use crate::error::CompileError;

use super::{BodyCompiler, Want};

impl BodyCompiler<'_> {
    /// Emits an expression, returning the register holding its result.
    pub fn expr(&mut self, node: &Node, want: Want) -> Result<u16, CompileError> {
        self.note_line(node.line);
        match &node.kind {
            NodeKind::Number(text) => {
                let rd = self.regs.temp()?;
                match number_value(text) {
                    Scalar0::Int(i) if i32::try_from(i).is_ok() => {
                        self.op(Opcode::LOAD_INT(rd, i as i32));
                    }
                    Scalar0::Int(i) => {
                        let k = self.kid(Scalar::int(i))?;
                        self.op(Opcode::LOAD_CONST(rd, k));
                    }
                    Scalar0::Double(d) => {
                        let k = self.kid(Scalar::double(d))?;
                        self.op(Opcode::LOAD_CONST(rd, k));
                    }
                }
                self.wrap_list(rd, want)
            }
            NodeKind::Str(text) => {
                let rd = self.regs.temp()?;
                let sid = self.sid(text)?;
                self.op(Opcode::LOAD_STRING(rd, sid));
                self.wrap_list(rd, want)
            }
            NodeKind::Undef => {
                let rd = self.regs.temp()?;
                self.op(Opcode::LOAD_UNDEF(rd));
                self.wrap_list(rd, want)
            }
            NodeKind::Var { sigil, name } => self.var_expr(*sigil, name, want),
            NodeKind::Elem { array, index } => {
                let ra = self.array_operand(array)?;
                let ri = self.expr(index, Want::Scalar)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::ARRAY_GET(rd, ra, ri));
                self.wrap_list(rd, want)
            }
            NodeKind::HElem { hash, key } => {
                let rh = self.hash_operand(hash)?;
                let rk = self.hash_key(key)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::HASH_GET(rd, rh, rk));
                self.wrap_list(rd, want)
            }
            NodeKind::Assign { target, value } => self.assign(target, value, want),
            NodeKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, want),
            NodeKind::Unary { op, operand } => self.unary(*op, operand, want),
            NodeKind::Logical { op, lhs, rhs } => self.logical(*op, lhs, rhs, want),
            NodeKind::Ternary { cond, then, els } => {
                let rc = self.expr(cond, Want::Scalar)?;
                let rd = self.regs.temp()?;
                let to_else = self.jump_fwd(|off| Opcode::GOTO_IF_FALSE(rc, off));
                let rt = self.expr(then, want_value(want))?;
                self.op(Opcode::MOVE(rd, rt));
                let to_end = self.jump_fwd(Opcode::GOTO);
                self.patch_here(to_else);
                let re = self.expr(els, want_value(want))?;
                self.op(Opcode::MOVE(rd, re));
                self.patch_here(to_end);
                Ok(rd)
            }
            NodeKind::List(items) => self.list_value(items, want),
            NodeKind::ArrayLit(items) => {
                let rl = self.list_value(items, Want::List)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::CREATE_REF(rd, rl, RefKind::Array));
                Ok(rd)
            }
            NodeKind::HashLit(items) => {
                let (base, n) = self.pack_items(items)?;
                let rh = self.regs.temp()?;
                self.op(Opcode::HASH_CREATE(rh, n, base));
                let rd = self.regs.temp()?;
                self.op(Opcode::CREATE_REF(rd, rh, RefKind::Hash));
                Ok(rd)
            }
            NodeKind::AnonSub { body } => {
                let k = self.nested_body(body, node.line, None, false)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::MAKE_CLOSURE(rd, k));
                Ok(rd)
            }
            NodeKind::Call { name, args } => self.call_named(name, args, want),
            NodeKind::CallRef { callee, args } => {
                let rf = self.expr(callee, Want::Scalar)?;
                let (base, n) = self.pack_args(args)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::CALL_SUB(rd, rf, n, base, want.ctx_word()));
                Ok(rd)
            }
            NodeKind::MethodCall {
                invocant,
                method,
                args,
            } => {
                let mut all = Vec::with_capacity(args.len() + 1);
                all.push(invocant.as_ref().clone());
                all.extend(args.iter().cloned());
                let (base, n) = self.pack_args(&all)?;
                let method = if let Some(rest) = method.strip_prefix("SUPER::") {
                    format!("SUPER::{}::{rest}", self.package)
                } else {
                    method.clone()
                };
                let sid = self.sid(&method)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::CALL_METHOD(rd, sid, n, base, want.ctx_word()));
                Ok(rd)
            }
            NodeKind::FuncOp { name, args } => self.func_op(name, args, node.line, want),
            NodeKind::EvalBlock(body) => {
                let k = self.nested_body(body, node.line, None, true)?;
                let rf = self.regs.temp()?;
                self.op(Opcode::MAKE_CLOSURE(rf, k));
                let rd = self.regs.temp()?;
                self.op(Opcode::CALL_SUB(rd, rf, 0, 0, want_value(want).ctx_word()));
                Ok(rd)
            }
            NodeKind::EvalString(src) => {
                let rs = self.expr(src, Want::Scalar)?;
                // Lexicals visible here stay visible inside the eval'd
                // string; the descriptor maps names to live registers.
                let scope = self.scope_descriptor();
                let scope_sid = self.sid(&scope)?;
                let rd = self.regs.temp()?;
                self.slow(SlowOp::EvalString, &[rd, rs, scope_sid]);
                Ok(rd)
            }
            NodeKind::Wantarray => {
                let rd = self.regs.temp()?;
                self.op(Opcode::CALL_BUILTIN(
                    rd,
                    Builtin::Wantarray,
                    1,
                    REG_CTX,
                    want.ctx_word(),
                ));
                Ok(rd)
            }
            NodeKind::TakeRef { kind, operand } => self.take_ref(*kind, operand),
            NodeKind::Deref { kind, operand } => {
                let rr = self.expr(operand, Want::Scalar)?;
                let rd = self.regs.temp()?;
                let kind = match kind {
                    DerefKind::Scalar => RefKind::Scalar,
                    DerefKind::Array => RefKind::Array,
                    DerefKind::Hash => RefKind::Hash,
                    DerefKind::Code => RefKind::Code,
                };
                self.op(Opcode::DEREF(rd, rr, kind));
                match (kind, want) {
                    (RefKind::Array, Want::Scalar) => {
                        let rs = self.regs.temp()?;
                        self.op(Opcode::ARRAY_SIZE(rs, rd));
                        Ok(rs)
                    }
                    _ => Ok(rd),
                }
            }
            NodeKind::Block(stmts) => {
                // `do { ... }`-style value block.
                self.regs.push_scope();
                let last = self.stmts(stmts)?;
                self.close_scope();
                match last {
                    Some(reg) => Ok(reg),
                    None => {
                        let rd = self.regs.temp()?;
                        self.op(Opcode::LOAD_UNDEF(rd));
                        Ok(rd)
                    }
                }
            }
            other => Err(CompileError::Unsupported {
                what: format!("{other:?} in expression position"),
                file: self.file.to_string(),
                line: node.line,
            }),
        }
    }

    /// In list context, wraps a scalar result into a one-element list.
    fn wrap_list(&mut self, reg: u16, want: Want) -> Result<u16, CompileError> {
        if want == Want::List {
            let rd = self.regs.temp()?;
            self.op(Opcode::SCALAR_TO_LIST(rd, reg));
            Ok(rd)
        } else {
            Ok(reg)
        }
    }

    fn var_expr(&mut self, sigil: Sigil, name: &str, want: Want) -> Result<u16, CompileError> {
        // `@_` is the aliased argument register, not a package array.
        if sigil == Sigil::Array && name == "_" {
            return match want {
                Want::Scalar => {
                    let rd = self.regs.temp()?;
                    self.op(Opcode::ARRAY_SIZE(rd, crate::consts::REG_ARGS));
                    Ok(rd)
                }
                _ => Ok(crate::consts::REG_ARGS),
            };
        }
        if !is_global_name(name) {
            if let Some(reg) = self.regs.lookup(sigil, name) {
                return match (sigil, want) {
                    (Sigil::Array, Want::Scalar) => {
                        let rd = self.regs.temp()?;
                        self.op(Opcode::ARRAY_SIZE(rd, reg));
                        Ok(rd)
                    }
                    (Sigil::Hash, Want::Scalar) => {
                        let rk = self.regs.temp()?;
                        self.op(Opcode::HASH_KEYS(rk, reg));
                        let rd = self.regs.temp()?;
                        self.op(Opcode::ARRAY_SIZE(rd, rk));
                        Ok(rd)
                    }
                    (Sigil::Scalar, Want::List) => self.wrap_list(reg, want),
                    _ => Ok(reg),
                };
            }
        }
        // Package variable.
        let sid = self.sid(&self.qualify(name))?;
        let rd = self.regs.temp()?;
        match sigil {
            Sigil::Scalar => {
                self.op(Opcode::PKG_GET_SCALAR(rd, sid));
                self.wrap_list(rd, want)
            }
            Sigil::Array => {
                self.op(Opcode::PKG_GET_ARRAY(rd, sid));
                if want == Want::Scalar {
                    let rs = self.regs.temp()?;
                    self.op(Opcode::ARRAY_SIZE(rs, rd));
                    Ok(rs)
                } else {
                    Ok(rd)
                }
            }
            Sigil::Hash => {
                self.op(Opcode::PKG_GET_HASH(rd, sid));
                if want == Want::Scalar {
                    let rk = self.regs.temp()?;
                    self.op(Opcode::HASH_KEYS(rk, rd));
                    let rs = self.regs.temp()?;
                    self.op(Opcode::ARRAY_SIZE(rs, rk));
                    Ok(rs)
                } else {
                    Ok(rd)
                }
            }
        }
    }

    /// Register holding the array a subscript applies to. Scalar-valued
    /// operands pass through; the interpreter dereferences them.
    pub(crate) fn array_operand(&mut self, node: &Node) -> Result<u16, CompileError> {
        match &node.kind {
            NodeKind::Var {
                sigil: Sigil::Array,
                name,
            } if name == "_" => Ok(crate::consts::REG_ARGS),
            NodeKind::Var {
                sigil: Sigil::Array,
                name,
            } if !is_global_name(name) && self.regs.lookup(Sigil::Array, name).is_some() => {
                Ok(self.regs.lookup(Sigil::Array, name).expect("checked"))
            }
            NodeKind::Var {
                sigil: Sigil::Array,
                name,
            } => {
                let sid = self.sid(&self.qualify(name))?;
                let rd = self.regs.temp()?;
                self.op(Opcode::PKG_GET_ARRAY(rd, sid));
                Ok(rd)
            }
            NodeKind::Deref {
                kind: DerefKind::Array,
                operand,
            } => {
                let rr = self.expr(operand, Want::Scalar)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::DEREF(rd, rr, RefKind::Array));
                Ok(rd)
            }
            _ => self.expr(node, Want::Scalar),
        }
    }

    pub(crate) fn hash_operand(&mut self, node: &Node) -> Result<u16, CompileError> {
        match &node.kind {
            NodeKind::Var {
                sigil: Sigil::Hash,
                name,
            } if !is_global_name(name) && self.regs.lookup(Sigil::Hash, name).is_some() => {
                Ok(self.regs.lookup(Sigil::Hash, name).expect("checked"))
            }
            NodeKind::Var {
                sigil: Sigil::Hash,
                name,
            } => {
                let sid = self.sid(&self.qualify(name))?;
                let rd = self.regs.temp()?;
                self.op(Opcode::PKG_GET_HASH(rd, sid));
                Ok(rd)
            }
            NodeKind::Deref {
                kind: DerefKind::Hash,
                operand,
            } => {
                let rr = self.expr(operand, Want::Scalar)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::DEREF(rd, rr, RefKind::Hash));
                Ok(rd)
            }
            _ => self.expr(node, Want::Scalar),
        }
    }

    /// Bareword hash keys arrive as `Str`; everything else evaluates.
    fn hash_key(&mut self, key: &Node) -> Result<u16, CompileError> {
        self.expr(key, Want::Scalar)
    }

    /* OPERATORS */

    fn binary(
        &mut self,
        op: BinOp,
        lhs: &Node,
        rhs: &Node,
        want: Want,
    ) -> Result<u16, CompileError> {
        let ra = self.expr(lhs, Want::Scalar)?;
        let rb = self.expr(rhs, Want::Scalar)?;
        let rd = self.regs.temp()?;
        let int_spec = is_int_literal(lhs) && is_int_literal(rhs);
        let opcode = match op {
            BinOp::Add if int_spec => Opcode::ADD_INT(rd, ra, rb),
            BinOp::Sub if int_spec => Opcode::SUB_INT(rd, ra, rb),
            BinOp::Mul if int_spec => Opcode::MUL_INT(rd, ra, rb),
            BinOp::Add => Opcode::ADD(rd, ra, rb),
            BinOp::Sub => Opcode::SUB(rd, ra, rb),
            BinOp::Mul => Opcode::MUL(rd, ra, rb),
            BinOp::Div => Opcode::DIV(rd, ra, rb),
            BinOp::Mod => Opcode::MOD(rd, ra, rb),
            BinOp::Pow => Opcode::POW(rd, ra, rb),
            BinOp::Concat => Opcode::CONCAT(rd, ra, rb),
            BinOp::Repeat => Opcode::REPEAT(rd, ra, rb),
            BinOp::NumEq => Opcode::EQ_NUM(rd, ra, rb),
            BinOp::NumNe => Opcode::NE_NUM(rd, ra, rb),
            BinOp::NumLt => Opcode::LT_NUM(rd, ra, rb),
            BinOp::NumGt => Opcode::GT_NUM(rd, ra, rb),
            BinOp::NumLe => Opcode::LE_NUM(rd, ra, rb),
            BinOp::NumGe => Opcode::GE_NUM(rd, ra, rb),
            BinOp::NumCmp => Opcode::CMP_NUM(rd, ra, rb),
            BinOp::StrEq => Opcode::EQ_STR(rd, ra, rb),
            BinOp::StrNe => Opcode::NE_STR(rd, ra, rb),
            BinOp::StrLt => Opcode::LT_STR(rd, ra, rb),
            BinOp::StrGt => Opcode::GT_STR(rd, ra, rb),
            BinOp::StrLe => Opcode::LE_STR(rd, ra, rb),
            BinOp::StrGe => Opcode::GE_STR(rd, ra, rb),
            BinOp::StrCmp => Opcode::CMP_STR(rd, ra, rb),
        };
        self.op(opcode);
        self.wrap_list(rd, want)
    }

    fn unary(&mut self, op: UnOp, operand: &Node, want: Want) -> Result<u16, CompileError> {
        match op {
            UnOp::Neg => {
                let rs = self.expr(operand, Want::Scalar)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::NEG(rd, rs));
                self.wrap_list(rd, want)
            }
            UnOp::Not => {
                let rs = self.expr(operand, Want::Scalar)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::NOT(rd, rs));
                self.wrap_list(rd, want)
            }
            UnOp::PreInc | UnOp::PreDec => {
                let rv = self.lvalue_register(operand)?;
                self.op(if op == UnOp::PreInc {
                    Opcode::INC(rv)
                } else {
                    Opcode::DEC(rv)
                });
                self.wrap_list(rv, want)
            }
            UnOp::PostInc | UnOp::PostDec => {
                let rv = self.lvalue_register(operand)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::MOVE(rd, rv));
                self.op(if op == UnOp::PostInc {
                    Opcode::INC(rv)
                } else {
                    Opcode::DEC(rv)
                });
                self.wrap_list(rd, want)
            }
        }
    }

    /// A register whose slot handle IS the variable, for in-place ops.
    fn lvalue_register(&mut self, node: &Node) -> Result<u16, CompileError> {
        match &node.kind {
            NodeKind::Var {
                sigil: Sigil::Scalar,
                name,
            } => {
                if !is_global_name(name) {
                    if let Some(reg) = self.regs.lookup(Sigil::Scalar, name) {
                        return Ok(reg);
                    }
                }
                let sid = self.sid(&self.qualify(name))?;
                let rd = self.regs.temp()?;
                self.op(Opcode::PKG_GET_SCALAR(rd, sid));
                Ok(rd)
            }
            NodeKind::Elem { array, index } => {
                let ra = self.array_operand(array)?;
                let ri = self.expr(index, Want::Scalar)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::ARRAY_GET(rd, ra, ri));
                Ok(rd)
            }
            NodeKind::HElem { hash, key } => {
                let rh = self.hash_operand(hash)?;
                let rk = self.hash_key(key)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::HASH_GET(rd, rh, rk));
                Ok(rd)
            }
            NodeKind::Deref {
                kind: DerefKind::Scalar,
                operand,
            } => {
                let rr = self.expr(operand, Want::Scalar)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::DEREF(rd, rr, RefKind::Scalar));
                Ok(rd)
            }
            other => Err(CompileError::Unsupported {
                what: format!("{other:?} as an lvalue"),
                file: self.file.to_string(),
                line: node.line,
            }),
        }
    }

    fn logical(
        &mut self,
        op: LogOp,
        lhs: &Node,
        rhs: &Node,
        want: Want,
    ) -> Result<u16, CompileError> {
        let ra = self.expr(lhs, Want::Scalar)?;
        let rd = self.regs.temp()?;
        self.op(Opcode::MOVE(rd, ra));
        let short = match op {
            LogOp::And => self.jump_fwd(|off| Opcode::GOTO_IF_FALSE(ra, off)),
            LogOp::Or => self.jump_fwd(|off| Opcode::GOTO_IF_TRUE(ra, off)),
            LogOp::DefinedOr => {
                let rt = self.regs.temp()?;
                self.op(Opcode::DEFINED(rt, ra));
                self.jump_fwd(|off| Opcode::GOTO_IF_TRUE(rt, off))
            }
        };
        let rb = self.expr(rhs, Want::Scalar)?;
        self.op(Opcode::MOVE(rd, rb));
        self.patch_here(short);
        self.wrap_list(rd, want)
    }

    /* ASSIGNMENT */

    pub(crate) fn assign(
        &mut self,
        target: &Node,
        value: &Node,
        want: Want,
    ) -> Result<u16, CompileError> {
        match &target.kind {
            NodeKind::Var {
                sigil: Sigil::Scalar,
                name,
            } => {
                let rv = self.expr(value, Want::Scalar)?;
                if !is_global_name(name) {
                    if let Some(reg) = self.regs.lookup(Sigil::Scalar, name) {
                        self.op(Opcode::MOVE(reg, rv));
                        return self.wrap_list(reg, want);
                    }
                }
                let sid = self.sid(&self.qualify(name))?;
                self.op(Opcode::PKG_SET_SCALAR(sid, rv));
                self.wrap_list(rv, want)
            }
            NodeKind::Var {
                sigil: Sigil::Array,
                name,
            } => {
                let rv = self.expr(value, Want::List)?;
                // `@_ = (...)` rewrites the argument register in place;
                // the `goto &NAME` idiom depends on it.
                if name == "_" {
                    self.op(Opcode::MOVE(crate::consts::REG_ARGS, rv));
                    return Ok(crate::consts::REG_ARGS);
                }
                if !is_global_name(name) {
                    if let Some(reg) = self.regs.lookup(Sigil::Array, name) {
                        self.op(Opcode::MOVE(reg, rv));
                        return Ok(reg);
                    }
                }
                let sid = self.sid(&self.qualify(name))?;
                self.op(Opcode::PKG_SET_ARRAY(sid, rv));
                Ok(rv)
            }
            NodeKind::Var {
                sigil: Sigil::Hash,
                name,
            } => {
                let rv = self.expr(value, Want::List)?;
                if !is_global_name(name) {
                    if let Some(reg) = self.regs.lookup(Sigil::Hash, name) {
                        self.op(Opcode::MOVE(reg, rv));
                        return Ok(reg);
                    }
                }
                let sid = self.sid(&self.qualify(name))?;
                self.op(Opcode::PKG_SET_HASH(sid, rv));
                Ok(rv)
            }
            NodeKind::Elem { array, index } => {
                let ra = self.array_operand(array)?;
                let ri = self.expr(index, Want::Scalar)?;
                let rv = self.expr(value, Want::Scalar)?;
                self.op(Opcode::ARRAY_SET(ra, ri, rv));
                self.wrap_list(rv, want)
            }
            NodeKind::HElem { hash, key } => {
                let rh = self.hash_operand(hash)?;
                let rk = self.hash_key(key)?;
                let rv = self.expr(value, Want::Scalar)?;
                self.op(Opcode::HASH_SET(rh, rk, rv));
                self.wrap_list(rv, want)
            }
            NodeKind::Deref { kind, operand } => {
                let rr = self.expr(operand, Want::Scalar)?;
                let rd = self.regs.temp()?;
                let (kind, value_want) = match kind {
                    DerefKind::Scalar => (RefKind::Scalar, Want::Scalar),
                    DerefKind::Array => (RefKind::Array, Want::List),
                    DerefKind::Hash => (RefKind::Hash, Want::List),
                    DerefKind::Code => (RefKind::Code, Want::Scalar),
                };
                self.op(Opcode::DEREF(rd, rr, kind));
                let rv = self.expr(value, value_want)?;
                self.op(Opcode::MOVE(rd, rv));
                Ok(rd)
            }
            NodeKind::List(targets) => self.list_assign(targets, value),
            NodeKind::My { .. } => {
                // `(my $x = ...)` in expression position.
                let line = target.line;
                self.my_decl(target, Some(value), line)
            }
            other => Err(CompileError::Unsupported {
                what: format!("{other:?} as an assignment target"),
                file: self.file.to_string(),
                line: target.line,
            }),
        }
    }

    fn list_assign(&mut self, targets: &[Node], value: &Node) -> Result<u16, CompileError> {
        let mut rl = self.expr(value, Want::List)?;
        let slurpy = targets.iter().any(|t| {
            matches!(
                &t.kind,
                NodeKind::Var {
                    sigil: Sigil::Array | Sigil::Hash,
                    ..
                }
            )
        });
        if slurpy {
            // The slurp splices its source; work on a copy so the
            // original list (it may be `@_`) survives.
            let rcopy = self.regs.temp()?;
            self.op(Opcode::MOVE(rcopy, rl));
            rl = rcopy;
        }
        let ridx = self.regs.temp()?;
        for (at, target) in targets.iter().enumerate() {
            match &target.kind {
                NodeKind::Var {
                    sigil: Sigil::Array,
                    ..
                } => {
                    // A slurpy array target takes the rest of the list.
                    let rrest = self.regs.temp()?;
                    let roff = self.regs.temp()?;
                    self.op(Opcode::LOAD_INT(roff, at as i32));
                    let rlen = self.regs.temp()?;
                    self.op(Opcode::ARRAY_SIZE(rlen, rl));
                    self.slow(
                        SlowOp::Splice,
                        &[rrest, rl, roff, rlen, 0, 0],
                    );
                    self.assign_packed(target, rrest)?;
                    break;
                }
                _ => {
                    self.op(Opcode::LOAD_INT(ridx, at as i32));
                    let rv = self.regs.temp()?;
                    self.op(Opcode::ARRAY_GET(rv, rl, ridx));
                    self.assign_packed(target, rv)?;
                }
            }
        }
        Ok(rl)
    }

    /// Assigns an already-emitted value register to a simple target.
    fn assign_packed(&mut self, target: &Node, rv: u16) -> Result<(), CompileError> {
        match &target.kind {
            NodeKind::Var { sigil, name } => {
                if !is_global_name(name) {
                    if let Some(reg) = self.regs.lookup(*sigil, name) {
                        self.op(Opcode::MOVE(reg, rv));
                        return Ok(());
                    }
                }
                let sid = self.sid(&self.qualify(name))?;
                self.op(match sigil {
                    Sigil::Scalar => Opcode::PKG_SET_SCALAR(sid, rv),
                    Sigil::Array => Opcode::PKG_SET_ARRAY(sid, rv),
                    Sigil::Hash => Opcode::PKG_SET_HASH(sid, rv),
                });
                Ok(())
            }
            _ => Err(CompileError::Unsupported {
                what: "complex target in list assignment".to_owned(),
                file: self.file.to_string(),
                line: target.line,
            }),
        }
    }

    /* LISTS AND CALLS */

    /// Packs items into a consecutive register block, sharing handles so
    /// the callee's `@_` aliases the caller's variables.
    pub(crate) fn pack_items(&mut self, items: &[Node]) -> Result<(u16, u16), CompileError> {
        let base = self.regs.temp_block(items.len())?;
        for (at, item) in items.iter().enumerate() {
            let reg = self.expr_item(item)?;
            self.op(Opcode::ALIAS(base + at as u16, reg));
        }
        Ok((base, items.len() as u16))
    }

    /// Same as [`BodyCompiler::pack_items`]; argument lists flatten at
    /// runtime exactly like list literals do.
    pub(crate) fn pack_args(&mut self, args: &[Node]) -> Result<(u16, u16), CompileError> {
        self.pack_items(args)
    }

    /// One list item: arrays and hashes travel as handles (flattened at
    /// runtime), everything else as a scalar.
    fn expr_item(&mut self, node: &Node) -> Result<u16, CompileError> {
        match &node.kind {
            NodeKind::Var {
                sigil: Sigil::Array,
                ..
            } => self.array_operand(node),
            NodeKind::Var {
                sigil: Sigil::Hash, ..
            } => self.hash_operand(node),
            NodeKind::Deref {
                kind: DerefKind::Array,
                ..
            } => self.array_operand(node),
            NodeKind::Deref {
                kind: DerefKind::Hash,
                ..
            } => self.hash_operand(node),
            NodeKind::List(inner) => self.list_value(inner, Want::List),
            _ => self.expr(node, Want::Scalar),
        }
    }

    /// Emits a list value into a fresh array register. Oversized
    /// literals are split into chunked anonymous subs so no single body
    /// outgrows the emission ceiling; captures flow through unchanged.
    pub(crate) fn list_value(&mut self, items: &[Node], want: Want) -> Result<u16, CompileError> {
        if want == Want::Scalar {
            // Comma in scalar context: evaluate all, keep the last.
            let mut last = None;
            for item in items {
                last = Some(self.expr(item, Want::Scalar)?);
            }
            return match last {
                Some(reg) => Ok(reg),
                None => {
                    let rd = self.regs.temp()?;
                    self.op(Opcode::LOAD_UNDEF(rd));
                    Ok(rd)
                }
            };
        }

        if items.len() > LIST_CHUNK_LEN || self.pos() > self.params.code_chunk_ceiling {
            return self.chunked_list(items);
        }

        let (base, n) = self.pack_items(items)?;
        let rd = self.regs.temp()?;
        self.op(Opcode::ARRAY_CREATE(rd, n, base));
        Ok(rd)
    }

    /// The oversized-literal refactor: each chunk becomes a nested
    /// anonymous sub returning its slice, called in sequence and merged.
    fn chunked_list(&mut self, items: &[Node]) -> Result<u16, CompileError> {
        let rd = self.regs.temp()?;
        self.op(Opcode::ARRAY_CREATE(rd, 0, 0));
        for chunk in items.chunks(LIST_CHUNK_LEN) {
            let line = chunk.first().map(|n| n.line).unwrap_or(self.source_line);
            let file = chunk
                .first()
                .map(|n| Rc::clone(&n.file))
                .unwrap_or_else(|| Rc::clone(&self.file));
            let body = vec![Node::new(
                NodeKind::List(chunk.to_vec()),
                Rc::clone(&file),
                line,
            )];
            let k = self.nested_body(&body, line, None, false)?;
            let rf = self.regs.temp()?;
            self.op(Opcode::MAKE_CLOSURE(rf, k));
            let rpart = self.regs.temp()?;
            self.op(Opcode::CALL_SUB(rpart, rf, 0, 0, Want::List.ctx_word()));
            self.op(Opcode::ARRAY_PUSH(rd, 1, rpart));
        }
        Ok(rd)
    }

    fn call_named(&mut self, name: &str, args: &[Node], want: Want) -> Result<u16, CompileError> {
        let qualified = if name.contains("::") {
            name.to_owned()
        } else {
            format!("{}::{}", self.package, name)
        };
        let sid = self.sid(&qualified)?;
        let rf = self.regs.temp()?;
        self.op(Opcode::PKG_GET_CODE(rf, sid));
        let (base, n) = self.pack_args(args)?;
        let rd = self.regs.temp()?;
        self.op(Opcode::CALL_SUB(rd, rf, n, base, want.ctx_word()));
        Ok(rd)
    }

    fn take_ref(&mut self, kind: DerefKind, operand: &Node) -> Result<u16, CompileError> {
        let rd = self.regs.temp()?;
        match kind {
            DerefKind::Scalar => {
                let rs = self.lvalue_register(operand)?;
                self.op(Opcode::CREATE_REF(rd, rs, RefKind::Scalar));
            }
            DerefKind::Array => {
                let ra = self.array_operand(operand)?;
                self.op(Opcode::CREATE_REF(rd, ra, RefKind::Array));
            }
            DerefKind::Hash => {
                let rh = self.hash_operand(operand)?;
                self.op(Opcode::CREATE_REF(rd, rh, RefKind::Hash));
            }
            DerefKind::Code => {
                let rs = match &operand.kind {
                    // `\&name` resolves the package code slot.
                    NodeKind::Call { name, args } if args.is_empty() => {
                        let qualified = if name.contains("::") {
                            name.clone()
                        } else {
                            format!("{}::{}", self.package, name)
                        };
                        let sid = self.sid(&qualified)?;
                        let rs = self.regs.temp()?;
                        self.op(Opcode::PKG_GET_CODE(rs, sid));
                        rs
                    }
                    _ => self.expr(operand, Want::Scalar)?,
                };
                self.op(Opcode::CREATE_REF(rd, rs, RefKind::Code));
            }
        }
        Ok(rd)
    }

    /// Emits loop-control signal creation for a `last`/`next`/`redo`
    /// crossing a sub boundary.
    pub(crate) fn control_value(
        &mut self,
        make: fn(u16, u16) -> Opcode,
        label: Option<&str>,
    ) -> Result<(), CompileError> {
        let sid = match label {
            Some(label) => self.sid(label)?,
            None => NO_LABEL,
        };
        let rd = self.regs.temp()?;
        self.op(make(rd, sid));
        self.op(Opcode::RETURN(rd));
        Ok(())
    }
}

fn want_value(want: Want) -> Want {
    if want == Want::List {
        Want::List
    } else {
        Want::Scalar
    }
}

fn is_int_literal(node: &Node) -> bool {
    matches!(&node.kind, NodeKind::Number(text) if matches!(number_value(text), Scalar0::Int(_)))
}

pub(crate) enum Scalar0 {
    Int(i64),
    Double(f64),
}

/// Decides a numeric literal's representation from its source form.
pub(crate) fn number_value(text: &str) -> Scalar0 {
    let clean: String = text.chars().filter(|&c| c != '_').collect();
    if let Some(hex) = clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
        if let Ok(i) = i64::from_str_radix(hex, 16) {
            return Scalar0::Int(i);
        }
    }
    if let Some(bin) = clean.strip_prefix("0b").or_else(|| clean.strip_prefix("0B")) {
        if let Ok(i) = i64::from_str_radix(bin, 2) {
            return Scalar0::Int(i);
        }
    }
    if clean.len() > 1 && clean.starts_with('0') && clean.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = i64::from_str_radix(&clean[1..], 8) {
            return Scalar0::Int(i);
        }
    }
    if !clean.contains(['.', 'e', 'E']) {
        if let Ok(i) = clean.parse::<i64>() {
            return Scalar0::Int(i);
        }
    }
    Scalar0::Double(clean.parse::<f64>().unwrap_or(0.0))
}
