//! AST → bytecode compiler.
//!
//! One [`BodyCompiler`] per sub body: it owns the growing code buffer,
//! the constant and string pools, the register allocator, and the loop
//! stack. Nested sub expressions recurse into a fresh body compiler
//! whose upvalues were resolved by the capture analyzer first.

use std::rc::Rc;

use camel_asm::{CallContext, Opcode, SlowOp};
use camel_value::{CaptureSlot, Closure, CodeValue, CompiledCode, Scalar, Sigil};
use hashbrown::HashMap;

use crate::ast::{Node, NodeKind};
use crate::capture::{self, LexEnv};
use crate::consts::REG_USER_BASE;
use crate::error::CompileError;
use crate::VmParameters;

mod expr;
pub mod registers;
mod stmt;

use registers::RegisterAllocator;

/// Evaluation context requested from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Want {
    /// Result discarded.
    Void,
    /// A single scalar.
    Scalar,
    /// A list value.
    List,
}

impl Want {
    pub(crate) fn ctx_word(self) -> u16 {
        match self {
            Want::Void => CallContext::Void as u16,
            Want::Scalar => CallContext::Scalar as u16,
            Want::List => CallContext::List as u16,
        }
    }
}

/// Compiler facade: turns parsed trees into [`CompiledCode`].
#[derive(Debug, Clone)]
pub struct Compiler {
    params: VmParameters,
}

impl Compiler {
    /// Compiler with the given limits.
    pub fn new(params: VmParameters) -> Self {
        Self { params }
    }

    /// Compiles a program body (the top-level statements of a file or of
    /// an `eval STRING`).
    pub fn compile_program(
        &self,
        root: &Node,
        package: &str,
    ) -> Result<Rc<CompiledCode>, CompileError> {
        let stmts = Self::body_of(root);
        let body = BodyCompiler::new(
            &self.params,
            Rc::clone(&root.file),
            Rc::from(package),
            root.line,
            LexEnv::empty(),
            Vec::new(),
        );
        body.compile(&stmts, None, false)
    }

    fn body_of(root: &Node) -> Vec<Node> {
        match &root.kind {
            NodeKind::Block(stmts) => stmts.clone(),
            NodeKind::List(stmts) => stmts.clone(),
            _ => vec![root.clone()],
        }
    }

    /// Compiles an `eval STRING` body closing over the eval site's
    /// lexicals. Each binding names a register in the frame executing
    /// the eval; free names matching a binding become upvalues wired to
    /// that register.
    pub fn compile_eval(
        &self,
        root: &Node,
        package: &str,
        bindings: &[(Sigil, Rc<str>, u16)],
    ) -> Result<Rc<CompiledCode>, CompileError> {
        let stmts = Self::body_of(root);
        let visible = bindings
            .iter()
            .map(|(sigil, name, _)| (*sigil, Rc::clone(name)))
            .collect();
        let env = LexEnv::empty().enclosed_by(visible);

        let mut slots = capture::analyze(&stmts, &env);
        slots.retain(|slot| {
            bindings
                .iter()
                .any(|(sigil, name, _)| *sigil == slot.sigil && *name == slot.name)
        });
        for slot in &mut slots {
            slot.parent_register = bindings
                .iter()
                .find(|(sigil, name, _)| *sigil == slot.sigil && *name == slot.name)
                .map(|(_, _, reg)| *reg)
                .expect("retained above");
        }

        let body = BodyCompiler::new(
            &self.params,
            Rc::clone(&root.file),
            Rc::from(package),
            root.line,
            env,
            slots,
        );
        body.compile(&stmts, None, true)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(VmParameters::default())
    }
}

pub(crate) struct LoopScope {
    pub label: Option<Rc<str>>,
    /// Jump target for `redo`: the top of the body.
    pub redo_pc: usize,
    /// Patch sites for `next`; resolved to the continue point.
    pub next_sites: Vec<usize>,
    /// Patch sites for `last`; resolved to the loop exit.
    pub last_sites: Vec<usize>,
    /// Cumulative `local` count at loop entry, so loop exits can restore
    /// bindings made inside the body.
    pub entry_locals: usize,
    /// Register carrying a control-flow value into the dispatch block.
    pub cf_slot: u16,
    /// Jumps into this loop's control-flow dispatch block.
    pub cf_sites: Vec<usize>,
}

pub(crate) struct BodyCompiler<'p> {
    pub params: &'p VmParameters,
    pub file: Rc<str>,
    pub package: Rc<str>,
    pub source_line: u32,
    pub buf: Vec<u16>,
    pub constants: Vec<Scalar>,
    pub strings: Vec<Rc<str>>,
    string_ids: HashMap<Rc<str>, u16>,
    pub regs: RegisterAllocator,
    pub captures: Vec<CaptureSlot>,
    pub env: LexEnv,
    pub loops: Vec<LoopScope>,
    pub pc_lines: Vec<(u32, u32)>,
    cur_line: u32,
    pub local_count: usize,
}

impl<'p> BodyCompiler<'p> {
    pub fn new(
        params: &'p VmParameters,
        file: Rc<str>,
        package: Rc<str>,
        source_line: u32,
        env: LexEnv,
        captures: Vec<CaptureSlot>,
    ) -> Self {
        Self {
            params,
            file,
            package,
            source_line,
            buf: Vec::new(),
            constants: Vec::new(),
            strings: Vec::new(),
            string_ids: HashMap::new(),
            regs: RegisterAllocator::new(),
            captures,
            env,
            loops: Vec::new(),
            pc_lines: Vec::new(),
            cur_line: 0,
            local_count: 0,
        }
    }

    /// Compiles a statement list into a finished body.
    pub fn compile(
        mut self,
        stmts: &[Node],
        name: Option<(Rc<str>, Rc<str>)>,
        is_eval: bool,
    ) -> Result<Rc<CompiledCode>, CompileError> {
        // Upvalues land in the first user registers, in slot order.
        let caps = self.captures.clone();
        for (at, cap) in caps.iter().enumerate() {
            let reg = self.regs.declare(cap.sigil, &cap.name)?;
            debug_assert_eq!(reg, REG_USER_BASE + at as u16);
        }

        let last = self.stmts(stmts)?;
        match last {
            Some(reg) => self.op(Opcode::RETURN(reg)),
            None => {
                let reg = self.regs.temp()?;
                self.op(Opcode::LOAD_UNDEF(reg));
                self.op(Opcode::RETURN(reg));
            }
        }

        let (package_name, sub_name) = match name {
            Some((pkg, sub)) => (Some(pkg), Some(sub)),
            None => (None, None),
        };
        Ok(Rc::new(CompiledCode {
            code: self.buf,
            constants: self.constants,
            strings: self.strings,
            max_registers: self.regs.high_water(),
            source_name: self.file,
            source_line: self.source_line,
            pc_to_line: self.pc_lines,
            captured_slots: self.captures,
            package_name,
            sub_name,
            is_eval,
        }))
    }

    /* EMISSION PRIMITIVES */

    pub fn op(&mut self, op: Opcode) {
        op.write(&mut self.buf);
    }

    pub fn pos(&self) -> usize {
        self.buf.len()
    }

    /// Records the source line for the next emitted instruction.
    pub fn note_line(&mut self, line: u32) {
        if line != self.cur_line {
            self.cur_line = line;
            self.pc_lines.push((self.buf.len() as u32, line));
        }
    }

    /// Interns a string, returning its pool index.
    pub fn sid(&mut self, s: &str) -> Result<u16, CompileError> {
        if let Some(&found) = self.string_ids.get(s) {
            return Ok(found);
        }
        let id = u16::try_from(self.strings.len())
            .map_err(|_| CompileError::PoolOverflow { pool: "string" })?;
        let interned: Rc<str> = Rc::from(s);
        self.strings.push(Rc::clone(&interned));
        self.string_ids.insert(interned, id);
        Ok(id)
    }

    /// Adds a constant, returning its pool index.
    pub fn kid(&mut self, value: Scalar) -> Result<u16, CompileError> {
        let id = u16::try_from(self.constants.len())
            .map_err(|_| CompileError::PoolOverflow { pool: "constant" })?;
        self.constants.push(value);
        Ok(id)
    }

    /// The baked `" at FILE line N.\n"` suffix for `die`/`warn` at a line.
    pub fn location_const(&mut self, line: u32) -> Result<u16, CompileError> {
        let suffix = format!(" at {} line {}.\n", self.file, line);
        self.kid(Scalar::str(suffix.as_str()))
    }

    /// Emits a forward jump with a placeholder offset; returns the patch
    /// site. `make` builds the opcode from the placeholder offset.
    pub fn jump_fwd(&mut self, make: impl FnOnce(i32) -> Opcode) -> usize {
        self.op(make(0));
        self.buf.len() - 2
    }

    /// Resolves a forward jump to the current position.
    pub fn patch_here(&mut self, site: usize) {
        self.patch(site, self.buf.len());
    }

    /// Resolves a jump site to an absolute target. Offsets are relative
    /// to the pc just past the offset words, so 0 falls through.
    pub fn patch(&mut self, site: usize, target: usize) {
        let next = site as i64 + 2;
        let off = (target as i64 - next) as i32;
        let words = camel_asm::imm32_words(off);
        self.buf[site] = words[0];
        self.buf[site + 1] = words[1];
    }

    /// Emits an unconditional backward jump to a known target.
    pub fn jump_back(&mut self, target: usize) {
        let site = self.jump_fwd(Opcode::GOTO);
        self.patch(site, target);
    }

    /// Emits a slow-operation escape followed by its raw operand words.
    pub fn slow(&mut self, sub: SlowOp, operands: &[u16]) {
        debug_assert_eq!(operands.len(), sub.operand_words());
        self.op(Opcode::SLOW_OP(sub));
        self.buf.extend_from_slice(operands);
    }

    /* NESTED BODIES */

    /// Compiles a nested sub body, resolving its captures against this
    /// body's registers, and returns the constant-pool index of the
    /// resulting code value.
    pub fn nested_body(
        &mut self,
        stmts: &[Node],
        line: u32,
        name: Option<(Rc<str>, Rc<str>)>,
        is_eval: bool,
    ) -> Result<u16, CompileError> {
        // This body's own locals form the innermost enclosing level; its
        // captures resolve deeper, which is what keeps depth honest.
        let mut visible = self.regs.visible();
        visible.retain(|(sigil, name)| {
            !self
                .captures
                .iter()
                .any(|c| c.sigil == *sigil && c.name == *name)
        });
        let env = self.env.enclosed_by(visible);

        let mut slots = capture::analyze(stmts, &env);
        for slot in &mut slots {
            slot.parent_register = if slot.depth == 1 {
                self.regs.lookup(slot.sigil, &slot.name).ok_or_else(|| {
                    CompileError::Unsupported {
                        what: format!("capture of ${}", slot.name),
                        file: self.file.to_string(),
                        line,
                    }
                })?
            } else {
                // Transitivity guarantees this body captured it too.
                self.capture_register(slot.sigil, &slot.name)
                    .ok_or_else(|| CompileError::Unsupported {
                        what: format!("transitive capture of ${}", slot.name),
                        file: self.file.to_string(),
                        line,
                    })?
            };
        }

        let nested = BodyCompiler::new(
            self.params,
            Rc::clone(&self.file),
            Rc::clone(&self.package),
            line,
            env,
            slots,
        );
        let code = nested.compile(stmts, name, is_eval)?;
        self.kid(Scalar::code(Rc::new(CodeValue::Bytecode(Closure::plain(
            code,
        )))))
    }

    /// Serializes the lexicals visible at this point as
    /// `sigil·name·register` triples, one `;`-separated entry each, for
    /// the `eval STRING` scope word.
    pub fn scope_descriptor(&self) -> String {
        let mut out = String::new();
        for (sigil, name) in self.regs.visible() {
            let Some(reg) = self.regs.lookup(sigil, &name) else {
                continue;
            };
            let tag = match sigil {
                Sigil::Scalar => '$',
                Sigil::Array => '@',
                Sigil::Hash => '%',
            };
            out.push_str(&format!("{tag}{name}={reg};"));
        }
        out
    }

    /// Register where this body keeps its own capture of a name.
    pub fn capture_register(&self, sigil: Sigil, name: &str) -> Option<u16> {
        self.captures
            .iter()
            .position(|c| c.sigil == sigil && c.name.as_ref() == name)
            .map(|at| REG_USER_BASE + at as u16)
    }

    /// Fully qualifies a sub or package-variable name.
    pub fn qualify(&self, name: &str) -> String {
        crate::stash::Stash::qualify(&self.package, name).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;

    fn node(kind: NodeKind) -> Node {
        Node::new(kind, "t.pl", 1)
    }

    #[test]
    fn a_literal_statement_compiles_to_a_load_and_return() {
        let root = node(NodeKind::Block(vec![node(NodeKind::Number(
            "7".to_owned(),
        ))]));
        let code = Compiler::default()
            .compile_program(&root, "main")
            .expect("compiles");
        let listing = code.disassemble();
        assert!(listing.contains("load_int"), "listing: {listing}");
        assert!(listing.contains("return"), "listing: {listing}");
        assert!(code.max_registers >= 3);
        assert_eq!(code.source_name.as_ref(), "t.pl");
    }

    #[test]
    fn die_bakes_its_location_into_the_constant_pool() {
        let root = node(NodeKind::Block(vec![Node::new(
            NodeKind::FuncOp {
                name: "die".to_owned(),
                args: vec![Node::new(NodeKind::Str("x".to_owned()), "t.pl", 9)],
            },
            "t.pl",
            9,
        )]));
        let code = Compiler::default()
            .compile_program(&root, "main")
            .expect("compiles");
        let baked = code
            .constants
            .iter()
            .any(|c| c.get_string().as_ref() == " at t.pl line 9.\n");
        assert!(baked, "constants: {:?}", code.constants);
    }

    #[test]
    fn numbers_pick_their_natural_representation() {
        use super::expr::{number_value, Scalar0};
        assert!(matches!(number_value("42"), Scalar0::Int(42)));
        assert!(matches!(number_value("1_000"), Scalar0::Int(1000)));
        assert!(matches!(number_value("0x10"), Scalar0::Int(16)));
        assert!(matches!(number_value("0b101"), Scalar0::Int(5)));
        assert!(matches!(number_value("017"), Scalar0::Int(15)));
        assert!(matches!(number_value("2.5"), Scalar0::Double(_)));
        assert!(matches!(number_value("1e3"), Scalar0::Double(_)));
    }
}
