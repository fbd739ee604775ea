//! Statement emission: declarations, control flow, and the named
//! operator lowerings.

use camel_asm::{Builtin, Opcode, SlowOp};
use camel_value::Sigil;

use crate::ast::{BinOp, Node, NodeKind};
use crate::error::CompileError;

use super::{BodyCompiler, LoopScope, Want};

#[derive(Debug, Clone, Copy)]
enum LoopExit {
    Last,
    Next,
    Redo,
}

impl BodyCompiler<'_> {
    /// Emits a statement list, returning the last expression statement's
    /// result register (the body's implicit return value).
    pub(crate) fn stmts(&mut self, list: &[Node]) -> Result<Option<u16>, CompileError> {
        let mut last = None;
        for (at, stmt) in list.iter().enumerate() {
            last = self.stmt(stmt, at + 1 == list.len())?;
            self.regs.end_statement();
        }
        Ok(last)
    }

    fn stmt(&mut self, node: &Node, keep_value: bool) -> Result<Option<u16>, CompileError> {
        self.note_line(node.line);
        match &node.kind {
            NodeKind::My { init, .. } => {
                let line = node.line;
                let reg = self.my_decl(node, init.as_deref(), line)?;
                Ok(Some(reg))
            }
            NodeKind::Local { sigil, name, init } => {
                self.local_stmt(*sigil, name, init.as_deref())?;
                Ok(None)
            }
            NodeKind::Package(name) => {
                self.package = std::rc::Rc::from(name.as_str());
                Ok(None)
            }
            NodeKind::SubDecl { name, body } => {
                let pkg = std::rc::Rc::clone(&self.package);
                let sub: std::rc::Rc<str> = std::rc::Rc::from(name.as_str());
                let k = self.nested_body(
                    body,
                    node.line,
                    Some((pkg, std::rc::Rc::clone(&sub))),
                    false,
                )?;
                let rt = self.regs.temp()?;
                self.op(Opcode::MAKE_CLOSURE(rt, k));
                let qualified = format!("{}::{name}", self.package);
                let sid = self.sid(&qualified)?;
                self.op(Opcode::PKG_SET_CODE(sid, rt));
                Ok(None)
            }
            NodeKind::If { branches, els } => {
                self.if_stmt(branches, els.as_deref())?;
                Ok(None)
            }
            NodeKind::While { label, cond, body } => {
                self.while_stmt(label.as_deref(), cond, body)?;
                Ok(None)
            }
            NodeKind::For3 {
                label,
                init,
                cond,
                step,
                body,
            } => {
                self.for3_stmt(
                    label.as_deref(),
                    init.as_deref(),
                    cond.as_deref(),
                    step.as_deref(),
                    body,
                )?;
                Ok(None)
            }
            NodeKind::Foreach {
                label,
                var,
                declares_var,
                list,
                body,
            } => {
                self.foreach_stmt(label.as_deref(), var.as_deref(), *declares_var, list, body)?;
                Ok(None)
            }
            NodeKind::Return(value) => {
                let reg = match value {
                    Some(value) => {
                        let want = return_want(value);
                        self.expr(value, want)?
                    }
                    None => {
                        let rd = self.regs.temp()?;
                        self.op(Opcode::LOAD_UNDEF(rd));
                        rd
                    }
                };
                self.op(Opcode::RETURN(reg));
                Ok(None)
            }
            NodeKind::Last(label) => {
                self.loop_exit(LoopExit::Last, label.as_deref())?;
                Ok(None)
            }
            NodeKind::Next(label) => {
                self.loop_exit(LoopExit::Next, label.as_deref())?;
                Ok(None)
            }
            NodeKind::Redo(label) => {
                self.loop_exit(LoopExit::Redo, label.as_deref())?;
                Ok(None)
            }
            NodeKind::GotoSub(target) => {
                let rf = match &target.kind {
                    NodeKind::Call { name, args } if args.is_empty() => {
                        let qualified = if name.contains("::") {
                            name.clone()
                        } else {
                            format!("{}::{name}", self.package)
                        };
                        let sid = self.sid(&qualified)?;
                        let rf = self.regs.temp()?;
                        self.op(Opcode::PKG_GET_CODE(rf, sid));
                        rf
                    }
                    _ => self.expr(target, Want::Scalar)?,
                };
                self.op(Opcode::GOTO_SUB(rf));
                Ok(None)
            }
            NodeKind::Block(stmts) => {
                self.regs.push_scope();
                self.stmts(stmts)?;
                self.close_scope();
                Ok(None)
            }
            _ => {
                let want = if keep_value {
                    return_want(node)
                } else {
                    Want::Void
                };
                let reg = self.expr(node, want)?;
                if is_callish(node) {
                    self.cf_check(reg)?;
                }
                Ok(Some(reg))
            }
        }
    }

    /// Closes the innermost lexical scope, restoring its `local`s.
    pub(crate) fn close_scope(&mut self) {
        let n = self.regs.pop_scope();
        if n > 0 {
            self.slow(SlowOp::LocalRestore, &[n as u16]);
            self.local_count -= n;
        }
    }

    /* DECLARATIONS */

    pub(crate) fn my_decl(
        &mut self,
        node: &Node,
        init: Option<&Node>,
        line: u32,
    ) -> Result<u16, CompileError> {
        let NodeKind::My {
            targets,
            parenthesized,
            ..
        } = &node.kind
        else {
            return Err(CompileError::Unsupported {
                what: "declaration".to_owned(),
                file: self.file.to_string(),
                line,
            });
        };
        let parenthesized = *parenthesized;
        let targets = targets.clone();

        if targets.len() == 1 && !parenthesized {
            let (sigil, name) = &targets[0];
            // The initializer sees the outer binding of the same name.
            let rv = match init {
                Some(init) => Some(self.expr(
                    init,
                    match sigil {
                        Sigil::Scalar => Want::Scalar,
                        _ => Want::List,
                    },
                )?),
                None => None,
            };
            let reg = self.declare_fresh(*sigil, name)?;
            if let Some(rv) = rv {
                self.op(Opcode::MOVE(reg, rv));
            }
            return Ok(reg);
        }

        // my (...) = LIST distributes element values, slurping the tail
        // into a trailing array or hash target.
        let rl = match init {
            Some(init) => Some(self.expr(init, Want::List)?),
            None => None,
        };
        let mut first_reg = None;
        let regs: Vec<(Sigil, u16)> = targets
            .iter()
            .map(|(sigil, name)| Ok((*sigil, self.declare_fresh(*sigil, name)?)))
            .collect::<Result<_, CompileError>>()?;
        if let Some((_, reg)) = regs.first() {
            first_reg = Some(*reg);
        }
        if let Some(rl) = rl {
            let ridx = self.regs.temp()?;
            for (at, (sigil, reg)) in regs.iter().enumerate() {
                match sigil {
                    Sigil::Scalar => {
                        self.op(Opcode::LOAD_INT(ridx, at as i32));
                        let rv = self.regs.temp()?;
                        self.op(Opcode::ARRAY_GET(rv, rl, ridx));
                        self.op(Opcode::MOVE(*reg, rv));
                    }
                    Sigil::Array | Sigil::Hash => {
                        // Slurp the rest; work on a copy so the source
                        // list survives (it may be `@_`).
                        let rcopy = self.regs.temp()?;
                        self.op(Opcode::MOVE(rcopy, rl));
                        let roff = self.regs.temp()?;
                        self.op(Opcode::LOAD_INT(roff, at as i32));
                        let rlen = self.regs.temp()?;
                        self.op(Opcode::ARRAY_SIZE(rlen, rcopy));
                        let rrest = self.regs.temp()?;
                        self.slow(SlowOp::Splice, &[rrest, rcopy, roff, rlen, 0, 0]);
                        self.op(Opcode::MOVE(*reg, rrest));
                        break;
                    }
                }
            }
        }
        Ok(first_reg.unwrap_or(crate::consts::REG_SELF))
    }

    /// Declares a lexical with a fresh slot so closures over a previous
    /// incarnation keep their own copy.
    fn declare_fresh(&mut self, sigil: Sigil, name: &str) -> Result<u16, CompileError> {
        let reg = self.regs.declare(sigil, name)?;
        match sigil {
            Sigil::Scalar => self.op(Opcode::LOAD_UNDEF(reg)),
            Sigil::Array => self.op(Opcode::ARRAY_CREATE(reg, 0, 0)),
            Sigil::Hash => self.op(Opcode::HASH_CREATE(reg, 0, 0)),
        }
        Ok(reg)
    }

    fn local_stmt(
        &mut self,
        sigil: Sigil,
        name: &str,
        init: Option<&Node>,
    ) -> Result<(), CompileError> {
        let qualified = self.qualify(name);
        let sid = self.sid(&qualified)?;
        let kind = match sigil {
            Sigil::Scalar => 0,
            Sigil::Array => 1,
            Sigil::Hash => 2,
        };
        self.slow(SlowOp::LocalSave, &[sid, kind]);
        self.local_count += 1;
        self.regs.note_local();
        if let Some(init) = init {
            match sigil {
                Sigil::Scalar => {
                    let rv = self.expr(init, Want::Scalar)?;
                    self.op(Opcode::PKG_SET_SCALAR(sid, rv));
                }
                Sigil::Array => {
                    let rv = self.expr(init, Want::List)?;
                    self.op(Opcode::PKG_SET_ARRAY(sid, rv));
                }
                Sigil::Hash => {
                    let rv = self.expr(init, Want::List)?;
                    self.op(Opcode::PKG_SET_HASH(sid, rv));
                }
            }
        }
        Ok(())
    }

    /* CONTROL FLOW */

    fn if_stmt(
        &mut self,
        branches: &[(Node, Vec<Node>)],
        els: Option<&[Node]>,
    ) -> Result<(), CompileError> {
        let mut end_sites = Vec::new();
        for (cond, body) in branches {
            let rc = self.expr(cond, Want::Scalar)?;
            let miss = self.jump_fwd(|off| Opcode::GOTO_IF_FALSE(rc, off));
            self.regs.push_scope();
            self.stmts(body)?;
            self.close_scope();
            end_sites.push(self.jump_fwd(Opcode::GOTO));
            self.patch_here(miss);
        }
        if let Some(els) = els {
            self.regs.push_scope();
            self.stmts(els)?;
            self.close_scope();
        }
        for site in end_sites {
            self.patch_here(site);
        }
        Ok(())
    }

    fn push_loop(&mut self, label: Option<&str>, redo_pc: usize) -> Result<(), CompileError> {
        let cf_slot = self.regs.declare_internal()?;
        self.loops.push(LoopScope {
            label: label.map(std::rc::Rc::from),
            redo_pc,
            next_sites: Vec::new(),
            last_sites: Vec::new(),
            entry_locals: self.local_count,
            cf_slot,
            cf_sites: Vec::new(),
        });
        Ok(())
    }

    /// Finishes a loop: patches `next` to the continue point, emits the
    /// control-flow dispatch block, and patches `last` to the exit.
    fn finish_loop(&mut self, cont_pc: usize) -> Result<(), CompileError> {
        let scope = self.loops.pop().expect("loop stack underflow");
        let LoopScope {
            label,
            redo_pc,
            next_sites,
            mut last_sites,
            cf_slot,
            cf_sites,
            ..
        } = scope;

        for site in next_sites {
            self.patch(site, cont_pc);
        }

        if !cf_sites.is_empty() {
            // Signal dispatch: consume a matching control-flow value,
            // hand anything else to the enclosing loop or the caller.
            for site in cf_sites {
                self.patch_here(site);
            }
            let rlb = self.regs.temp()?;
            self.op(Opcode::GET_CONTROL_FLOW_LABEL(rlb, cf_slot));
            let rdef = self.regs.temp()?;
            self.op(Opcode::DEFINED(rdef, rlb));
            let unlabeled = self.jump_fwd(|off| Opcode::GOTO_IF_FALSE(rdef, off));
            let rls = self.regs.temp()?;
            let own = self.sid(label.as_deref().unwrap_or(""))?;
            self.op(Opcode::LOAD_STRING(rls, own));
            let req = self.regs.temp()?;
            self.op(Opcode::EQ_STR(req, rlb, rls));
            let propagate = self.jump_fwd(|off| Opcode::GOTO_IF_FALSE(req, off));
            self.patch_here(unlabeled);

            let rty = self.regs.temp()?;
            self.op(Opcode::GET_CONTROL_FLOW_TYPE(rty, cf_slot));
            let rk = self.regs.temp()?;
            self.op(Opcode::LOAD_INT(rk, 0));
            self.op(Opcode::EQ_NUM(req, rty, rk));
            last_sites.push(self.jump_fwd(|off| Opcode::GOTO_IF_TRUE(req, off)));
            self.op(Opcode::LOAD_INT(rk, 1));
            self.op(Opcode::EQ_NUM(req, rty, rk));
            let to_next = self.jump_fwd(|off| Opcode::GOTO_IF_TRUE(req, off));
            self.patch(to_next, cont_pc);
            self.op(Opcode::LOAD_INT(rk, 2));
            self.op(Opcode::EQ_NUM(req, rty, rk));
            let to_redo = self.jump_fwd(|off| Opcode::GOTO_IF_TRUE(req, off));
            self.patch(to_redo, redo_pc);

            self.patch_here(propagate);
            let outer_slot = self.loops.last().map(|outer| outer.cf_slot);
            match outer_slot {
                Some(outer_slot) => {
                    self.op(Opcode::ALIAS(outer_slot, cf_slot));
                    let site = self.jump_fwd(Opcode::GOTO);
                    self.loops
                        .last_mut()
                        .expect("outer loop checked")
                        .cf_sites
                        .push(site);
                }
                None => self.op(Opcode::RETURN(cf_slot)),
            }
        }

        for site in last_sites {
            self.patch_here(site);
        }
        Ok(())
    }

    fn while_stmt(
        &mut self,
        label: Option<&str>,
        cond: &Node,
        body: &[Node],
    ) -> Result<(), CompileError> {
        self.regs.push_scope();
        let cond_pc = self.pos();
        let rc = self.expr(cond, Want::Scalar)?;
        self.regs.end_statement();
        let exit = self.jump_fwd(|off| Opcode::GOTO_IF_FALSE(rc, off));

        let body_pc = self.pos();
        self.push_loop(label, body_pc)?;
        self.regs.push_scope();
        self.stmts(body)?;
        self.close_scope();

        let cont_pc = self.pos();
        self.jump_back(cond_pc);
        self.finish_loop(cont_pc)?;
        self.patch_here(exit);
        self.close_scope();
        Ok(())
    }

    fn for3_stmt(
        &mut self,
        label: Option<&str>,
        init: Option<&Node>,
        cond: Option<&Node>,
        step: Option<&Node>,
        body: &[Node],
    ) -> Result<(), CompileError> {
        self.regs.push_scope();
        if let Some(init) = init {
            self.stmt(init, false)?;
            self.regs.end_statement();
        }
        let cond_pc = self.pos();
        let exit = match cond {
            Some(cond) => {
                let rc = self.expr(cond, Want::Scalar)?;
                self.regs.end_statement();
                Some(self.jump_fwd(|off| Opcode::GOTO_IF_FALSE(rc, off)))
            }
            None => None,
        };

        let body_pc = self.pos();
        self.push_loop(label, body_pc)?;
        self.regs.push_scope();
        self.stmts(body)?;
        self.close_scope();

        let cont_pc = self.pos();
        if let Some(step) = step {
            self.stmt(step, false)?;
            self.regs.end_statement();
        }
        self.jump_back(cond_pc);
        self.finish_loop(cont_pc)?;
        if let Some(exit) = exit {
            self.patch_here(exit);
        }
        self.close_scope();
        Ok(())
    }

    fn foreach_stmt(
        &mut self,
        label: Option<&str>,
        var: Option<&str>,
        declares_var: bool,
        list: &Node,
        body: &[Node],
    ) -> Result<(), CompileError> {
        self.regs.push_scope();

        let rl = self.expr(list, Want::List)?;
        let rlist = self.regs.declare_internal()?;
        self.op(Opcode::ALIAS(rlist, rl));
        self.regs.end_statement();

        let ridx = self.regs.declare_internal()?;
        self.op(Opcode::LOAD_INT(ridx, 0));
        let rlen = self.regs.declare_internal()?;
        self.op(Opcode::ARRAY_SIZE(rlen, rlist));

        // The loop variable aliases the current element. An existing
        // lexical gets its own slot handle back after the loop; a
        // package variable (`$_` included) is `local`ized for the
        // loop's duration and rebound to each element.
        let (rvar, saved, package_sid) = match var {
            Some(name) if declares_var => {
                (self.regs.declare(Sigil::Scalar, name)?, None, None)
            }
            Some(name) => match self.regs.lookup(Sigil::Scalar, name) {
                Some(existing) => {
                    let rsave = self.regs.declare_internal()?;
                    self.op(Opcode::ALIAS(rsave, existing));
                    (existing, Some(rsave), None)
                }
                None => {
                    let sid = self.sid(&self.qualify(name))?;
                    (self.regs.declare_internal()?, None, Some(sid))
                }
            },
            None => {
                let sid = self.sid("main::_")?;
                (self.regs.declare_internal()?, None, Some(sid))
            }
        };
        if let Some(sid) = package_sid {
            // Scope exit restores the outer binding.
            self.slow(SlowOp::LocalSave, &[sid, 0]);
            self.local_count += 1;
            self.regs.note_local();
        }

        let cond_pc = self.pos();
        let rc = self.regs.declare_internal()?;
        self.op(Opcode::LT_NUM(rc, ridx, rlen));
        let exit = self.jump_fwd(|off| Opcode::GOTO_IF_FALSE(rc, off));

        let bind_pc = self.pos();
        self.op(Opcode::ARRAY_GET(rvar, rlist, ridx));
        if let Some(sid) = package_sid {
            // Rebind the localized slot to the element handle, so body
            // writes through the package variable reach the array.
            self.op(Opcode::PKG_BIND_SCALAR(sid, rvar));
        }

        self.push_loop(label, bind_pc)?;
        self.regs.push_scope();
        self.stmts(body)?;
        self.close_scope();

        let cont_pc = self.pos();
        self.op(Opcode::INC(ridx));
        self.jump_back(cond_pc);
        self.finish_loop(cont_pc)?;
        self.patch_here(exit);

        if let Some(rsave) = saved {
            self.op(Opcode::ALIAS(rvar, rsave));
        }
        self.close_scope();
        Ok(())
    }

    fn loop_exit(&mut self, which: LoopExit, label: Option<&str>) -> Result<(), CompileError> {
        let found = match label {
            None => self.loops.len().checked_sub(1),
            Some(wanted) => self
                .loops
                .iter()
                .rposition(|l| l.label.as_deref() == Some(wanted)),
        };
        let Some(at) = found else {
            // No lexically enclosing loop: signal the dynamic one.
            let make = match which {
                LoopExit::Last => Opcode::CREATE_LAST,
                LoopExit::Next => Opcode::CREATE_NEXT,
                LoopExit::Redo => Opcode::CREATE_REDO,
            };
            return self.control_value(make, label);
        };

        let pending = self.local_count - self.loops[at].entry_locals;
        if pending > 0 {
            self.slow(SlowOp::LocalRestore, &[pending as u16]);
        }
        match which {
            LoopExit::Last => {
                let site = self.jump_fwd(Opcode::GOTO);
                self.loops[at].last_sites.push(site);
            }
            LoopExit::Next => {
                let site = self.jump_fwd(Opcode::GOTO);
                self.loops[at].next_sites.push(site);
            }
            LoopExit::Redo => {
                let target = self.loops[at].redo_pc;
                self.jump_back(target);
            }
        }
        Ok(())
    }

    /// After a call in statement position: a returned control-flow value
    /// is routed to the innermost loop's dispatch block, or propagated
    /// to this body's own caller.
    fn cf_check(&mut self, rres: u16) -> Result<(), CompileError> {
        let rt = self.regs.temp()?;
        self.op(Opcode::IS_CONTROL_FLOW(rt, rres));
        let skip = self.jump_fwd(|off| Opcode::GOTO_IF_FALSE(rt, off));
        let innermost = self
            .loops
            .last()
            .map(|scope| (scope.cf_slot, scope.entry_locals));
        match innermost {
            Some((slot, entry_locals)) => {
                let pending = self.local_count - entry_locals;
                if pending > 0 {
                    self.slow(SlowOp::LocalRestore, &[pending as u16]);
                }
                self.op(Opcode::ALIAS(slot, rres));
                let site = self.jump_fwd(Opcode::GOTO);
                self.loops
                    .last_mut()
                    .expect("loop checked")
                    .cf_sites
                    .push(site);
            }
            None => {
                self.op(Opcode::RETURN(rres));
            }
        }
        self.patch_here(skip);
        Ok(())
    }

    /* NAMED OPERATORS */

    pub(crate) fn func_op(
        &mut self,
        name: &str,
        args: &[Node],
        line: u32,
        want: Want,
    ) -> Result<u16, CompileError> {
        match name {
            "print" | "say" => {
                let (base, n) = if args.is_empty() {
                    let sid = self.sid("main::_")?;
                    let base = self.regs.temp_block(1)?;
                    self.op(Opcode::PKG_GET_SCALAR(base, sid));
                    (base, 1)
                } else {
                    self.pack_items(args)?
                };
                self.op(if name == "print" {
                    Opcode::PRINT(n, base)
                } else {
                    Opcode::SAY(n, base)
                });
                let rd = self.regs.temp()?;
                self.op(Opcode::LOAD_BOOL(rd, 1));
                Ok(rd)
            }
            "die" | "warn" => {
                let rmsg = self.message_of(args, name)?;
                let k = self.location_const(line)?;
                self.op(if name == "die" {
                    Opcode::DIE(rmsg, k)
                } else {
                    Opcode::WARN(rmsg, k)
                });
                Ok(rmsg)
            }
            "push" | "unshift" => {
                let (first, rest) = args.split_first().ok_or_else(|| missing_args(self, name, line))?;
                let ra = self.array_operand(first)?;
                let (base, n) = self.pack_items(rest)?;
                self.op(if name == "push" {
                    Opcode::ARRAY_PUSH(ra, n, base)
                } else {
                    Opcode::ARRAY_UNSHIFT(ra, n, base)
                });
                let rd = self.regs.temp()?;
                self.op(Opcode::ARRAY_SIZE(rd, ra));
                Ok(rd)
            }
            "pop" | "shift" => {
                let ra = match args.first() {
                    Some(arg) => self.array_operand(arg)?,
                    None => crate::consts::REG_ARGS,
                };
                let rd = self.regs.temp()?;
                self.op(if name == "pop" {
                    Opcode::ARRAY_POP(rd, ra)
                } else {
                    Opcode::ARRAY_SHIFT(rd, ra)
                });
                Ok(rd)
            }
            "keys" | "values" => {
                let arg = args.first().ok_or_else(|| missing_args(self, name, line))?;
                let rh = self.hash_operand(arg)?;
                let rd = self.regs.temp()?;
                self.op(if name == "keys" {
                    Opcode::HASH_KEYS(rd, rh)
                } else {
                    Opcode::HASH_VALUES(rd, rh)
                });
                if want == Want::Scalar {
                    let rs = self.regs.temp()?;
                    self.op(Opcode::ARRAY_SIZE(rs, rd));
                    return Ok(rs);
                }
                Ok(rd)
            }
            "each" => {
                let arg = args.first().ok_or_else(|| missing_args(self, name, line))?;
                let rh = self.hash_operand(arg)?;
                let base = self.regs.temp_block(1)?;
                self.op(Opcode::ALIAS(base, rh));
                let rd = self.regs.temp()?;
                self.op(Opcode::CALL_BUILTIN(rd, Builtin::Each, 1, base, want.ctx_word()));
                Ok(rd)
            }
            "exists" | "delete" => {
                let arg = args.first().ok_or_else(|| missing_args(self, name, line))?;
                let (rc, rk) = match &arg.kind {
                    NodeKind::HElem { hash, key } => {
                        let rh = self.hash_operand(hash)?;
                        let rk = self.expr(key, Want::Scalar)?;
                        (rh, rk)
                    }
                    NodeKind::Elem { array, index } => {
                        let ra = self.array_operand(array)?;
                        let ri = self.expr(index, Want::Scalar)?;
                        (ra, ri)
                    }
                    _ => {
                        return Err(CompileError::Unsupported {
                            what: format!("{name} of a non-element"),
                            file: self.file.to_string(),
                            line,
                        })
                    }
                };
                let rd = self.regs.temp()?;
                self.op(if name == "exists" {
                    Opcode::HASH_EXISTS(rd, rc, rk)
                } else {
                    Opcode::HASH_DELETE(rd, rc, rk)
                });
                Ok(rd)
            }
            "defined" => {
                let rd = self.regs.temp()?;
                let rs = match args.first() {
                    Some(arg) => self.expr(arg, Want::Scalar)?,
                    None => {
                        let sid = self.sid("main::_")?;
                        let rt = self.regs.temp()?;
                        self.op(Opcode::PKG_GET_SCALAR(rt, sid));
                        rt
                    }
                };
                self.op(Opcode::DEFINED(rd, rs));
                Ok(rd)
            }
            "scalar" => {
                let arg = args.first().ok_or_else(|| missing_args(self, name, line))?;
                self.expr(arg, Want::Scalar)
            }
            "length" => {
                let arg = args.first().ok_or_else(|| missing_args(self, name, line))?;
                let rs = self.expr(arg, Want::Scalar)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::LENGTH(rd, rs));
                Ok(rd)
            }
            "substr" => {
                let rs = self.expr(&args[0], Want::Scalar)?;
                let ro = self.expr(&args[1], Want::Scalar)?;
                let rl = match args.get(2) {
                    Some(len) => self.expr(len, Want::Scalar)?,
                    None => {
                        let rl = self.regs.temp()?;
                        self.op(Opcode::LOAD_INT(rl, i32::MAX));
                        rl
                    }
                };
                let rd = self.regs.temp()?;
                self.op(Opcode::SUBSTR(rd, rs, ro, rl));
                Ok(rd)
            }
            "ref" => {
                let arg = args.first().ok_or_else(|| missing_args(self, name, line))?;
                let rs = self.expr(arg, Want::Scalar)?;
                let rd = self.regs.temp()?;
                self.op(Opcode::GET_TYPE(rd, rs));
                Ok(rd)
            }
            "bless" => {
                let mut all: Vec<Node> = args.to_vec();
                if all.len() == 1 {
                    all.push(Node::new(
                        NodeKind::Str(self.package.to_string()),
                        std::rc::Rc::clone(&self.file),
                        line,
                    ));
                }
                self.builtin_call(Builtin::Bless, &all, want)
            }
            "abs" => self.builtin_call(Builtin::Abs, args, want),
            "int" => self.builtin_call(Builtin::Int, args, want),
            "sqrt" => self.builtin_call(Builtin::Sqrt, args, want),
            "uc" => self.builtin_call(Builtin::Uc, args, want),
            "lc" => self.builtin_call(Builtin::Lc, args, want),
            "ucfirst" => self.builtin_call(Builtin::Ucfirst, args, want),
            "lcfirst" => self.builtin_call(Builtin::Lcfirst, args, want),
            "ord" => self.builtin_call(Builtin::Ord, args, want),
            "chr" => self.builtin_call(Builtin::Chr, args, want),
            "hex" => self.builtin_call(Builtin::Hex, args, want),
            "oct" => self.builtin_call(Builtin::Oct, args, want),
            "index" => self.builtin_call(Builtin::Index, args, want),
            "rindex" => self.builtin_call(Builtin::Rindex, args, want),
            "join" => self.builtin_call(Builtin::Join, args, want),
            "sprintf" => self.builtin_call(Builtin::Sprintf, args, want),
            "chomp" => self.builtin_call(Builtin::Chomp, args, want),
            "chop" => self.builtin_call(Builtin::Chop, args, want),
            "weaken" => self.builtin_call(Builtin::Weaken, args, want),
            "dualvar" => self.builtin_call(Builtin::Dualvar, args, want),
            "tr" => self.tr_op(args, line, want),
            "sort" => self.sort_op(args, line),
            "reverse" => {
                let rl = self.list_value(args, Want::List)?;
                let rd = self.regs.temp()?;
                self.slow(SlowOp::Reverse, &[rd, rl]);
                Ok(rd)
            }
            "splice" => {
                let ra = self.array_operand(&args[0])?;
                let roff = match args.get(1) {
                    Some(off) => self.expr(off, Want::Scalar)?,
                    None => {
                        let r = self.regs.temp()?;
                        self.op(Opcode::LOAD_INT(r, 0));
                        r
                    }
                };
                let rlen = match args.get(2) {
                    Some(len) => self.expr(len, Want::Scalar)?,
                    None => {
                        let r = self.regs.temp()?;
                        self.op(Opcode::LOAD_INT(r, i32::MAX));
                        r
                    }
                };
                let rest = if args.len() > 3 { &args[3..] } else { &[] };
                let (base, n) = self.pack_items(rest)?;
                let rd = self.regs.temp()?;
                self.slow(SlowOp::Splice, &[rd, ra, roff, rlen, n, base]);
                Ok(rd)
            }
            "sleep" => {
                let rs = match args.first() {
                    Some(arg) => self.expr(arg, Want::Scalar)?,
                    None => {
                        let r = self.regs.temp()?;
                        self.op(Opcode::LOAD_INT(r, 0));
                        r
                    }
                };
                let rd = self.regs.temp()?;
                self.slow(SlowOp::Sleep, &[rd, rs]);
                Ok(rd)
            }
            "caller" => {
                let rdepth = match args.first() {
                    Some(arg) => self.expr(arg, Want::Scalar)?,
                    None => {
                        let r = self.regs.temp()?;
                        self.op(Opcode::LOAD_INT(r, 0));
                        r
                    }
                };
                let rd = self.regs.temp()?;
                self.slow(SlowOp::Caller, &[rd, rdepth, want.ctx_word()]);
                Ok(rd)
            }
            "alarm" => {
                let rs = self.expr(
                    args.first().ok_or_else(|| missing_args(self, name, line))?,
                    Want::Scalar,
                )?;
                let rd = self.regs.temp()?;
                self.slow(SlowOp::Alarm, &[rd, rs]);
                Ok(rd)
            }
            "open" => {
                let (base, n) = self.pack_items(args)?;
                let rd = self.regs.temp()?;
                self.slow(SlowOp::Open, &[rd, n, base]);
                Ok(rd)
            }
            "close" | "readline" | "eof" | "tell" => {
                let rfh = self.expr(
                    args.first().ok_or_else(|| missing_args(self, name, line))?,
                    Want::Scalar,
                )?;
                let rd = self.regs.temp()?;
                let sub = match name {
                    "close" => SlowOp::Close,
                    "readline" => SlowOp::Readline,
                    "eof" => SlowOp::Eof,
                    _ => SlowOp::Tell,
                };
                self.slow(sub, &[rd, rfh]);
                Ok(rd)
            }
            "seek" => {
                let rfh = self.expr(&args[0], Want::Scalar)?;
                let rpos = self.expr(&args[1], Want::Scalar)?;
                let rwhence = self.expr(&args[2], Want::Scalar)?;
                let rd = self.regs.temp()?;
                self.slow(SlowOp::Seek, &[rd, rfh, rpos, rwhence]);
                Ok(rd)
            }
            "charnames" => {
                let rn = self.expr(
                    args.first().ok_or_else(|| missing_args(self, name, line))?,
                    Want::Scalar,
                )?;
                let rd = self.regs.temp()?;
                self.slow(SlowOp::Charname, &[rd, rn]);
                Ok(rd)
            }
            other => Err(CompileError::Unsupported {
                what: format!("operator '{other}'"),
                file: self.file.to_string(),
                line,
            }),
        }
    }

    fn builtin_call(
        &mut self,
        builtin: Builtin,
        args: &[Node],
        want: Want,
    ) -> Result<u16, CompileError> {
        let (base, n) = self.pack_args(args)?;
        let rd = self.regs.temp()?;
        self.op(Opcode::CALL_BUILTIN(rd, builtin, n, base, want.ctx_word()));
        Ok(rd)
    }

    /// `die`/`warn` message: one expression, or a concatenation.
    fn message_of(&mut self, args: &[Node], name: &str) -> Result<u16, CompileError> {
        match args {
            [] => {
                let rd = self.regs.temp()?;
                let sid = self.sid(if name == "die" { "Died" } else { "Warning: something's wrong" })?;
                self.op(Opcode::LOAD_STRING(rd, sid));
                Ok(rd)
            }
            [single] => self.expr(single, Want::Scalar),
            many => {
                let mut acc = self.expr(&many[0], Want::Scalar)?;
                for next in &many[1..] {
                    let rn = self.expr(next, Want::Scalar)?;
                    let rd = self.regs.temp()?;
                    self.op(Opcode::CONCAT(rd, acc, rn));
                    acc = rd;
                }
                Ok(acc)
            }
        }
    }

    /// `tr///`: the counting-only form never mutates, so it compiles to
    /// the read-only-safe builtin.
    fn tr_op(&mut self, args: &[Node], line: u32, want: Want) -> Result<u16, CompileError> {
        if args.len() < 2 {
            return Err(missing_args(self, "tr", line));
        }
        let replace_empty = args.len() < 3
            || matches!(&args[2].kind, NodeKind::Str(s) if s.is_empty());
        if replace_empty {
            let pair = [args[0].clone(), args[1].clone()];
            self.builtin_call(Builtin::TrCount, &pair, want)
        } else {
            self.builtin_call(Builtin::TrReplace, args, want)
        }
    }

    /// `sort LIST`, plus the two ubiquitous comparator idioms.
    fn sort_op(&mut self, args: &[Node], line: u32) -> Result<u16, CompileError> {
        let (flags, rest) = match args.first().map(|n| &n.kind) {
            Some(NodeKind::AnonSub { body }) => match numeric_comparator(body) {
                Some(flags) => (flags, &args[1..]),
                None => {
                    return Err(CompileError::Unsupported {
                        what: "sort comparator beyond <=> idioms".to_owned(),
                        file: self.file.to_string(),
                        line,
                    })
                }
            },
            _ => (0, args),
        };
        let rl = self.list_value(rest, Want::List)?;
        let rd = self.regs.temp()?;
        self.slow(SlowOp::Sort, &[rd, rl, flags]);
        Ok(rd)
    }
}

fn missing_args(body: &BodyCompiler<'_>, name: &str, line: u32) -> CompileError {
    CompileError::Unsupported {
        what: format!("'{name}' with no operands"),
        file: body.file.to_string(),
        line,
    }
}

fn is_callish(node: &Node) -> bool {
    matches!(
        node.kind,
        NodeKind::Call { .. }
            | NodeKind::CallRef { .. }
            | NodeKind::MethodCall { .. }
            | NodeKind::EvalBlock(_)
    )
}

fn return_want(node: &Node) -> Want {
    match &node.kind {
        NodeKind::List(_) => Want::List,
        NodeKind::Var {
            sigil: Sigil::Array | Sigil::Hash,
            ..
        } => Want::List,
        _ => Want::Scalar,
    }
}

/// Recognizes `sub { $a <=> $b }` (1) and `sub { $b <=> $a }` (2).
fn numeric_comparator(body: &[Node]) -> Option<u16> {
    let [stmt] = body else { return None };
    let NodeKind::Binary {
        op: BinOp::NumCmp,
        lhs,
        rhs,
    } = &stmt.kind
    else {
        return None;
    };
    match (&lhs.kind, &rhs.kind) {
        (
            NodeKind::Var { sigil: Sigil::Scalar, name: l },
            NodeKind::Var { sigil: Sigil::Scalar, name: r },
        ) if l == "a" && r == "b" => Some(1),
        (
            NodeKind::Var { sigil: Sigil::Scalar, name: l },
            NodeKind::Var { sigil: Sigil::Scalar, name: r },
        ) if l == "b" && r == "a" => Some(2),
        _ => None,
    }
}
