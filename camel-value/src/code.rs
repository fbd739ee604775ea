//! Compiled code objects and callable values.

use std::fmt;
use std::rc::Rc;

use camel_asm::{CallContext, CodeWord, ErrorKind, Opcode};

use crate::array::ArrayRef;
use crate::scalar::{Scalar, Slot};

/// Which shape of lexical a capture slot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sigil {
    /// `$name`
    Scalar,
    /// `@name`
    Array,
    /// `%name`
    Hash,
}

impl fmt::Display for Sigil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Self::Scalar => '$',
            Self::Array => '@',
            Self::Hash => '%',
        };
        write!(f, "{c}")
    }
}

/// One upvalue copied into a fresh register at call entry.
#[derive(Debug, Clone)]
pub struct CaptureSlot {
    /// Variable name without sigil.
    pub name: Rc<str>,
    /// How many enclosing sub bodies up the declaration lives.
    pub depth: u16,
    /// The variable's shape.
    pub sigil: Sigil,
    /// Register in the immediately enclosing body whose slot handle is
    /// snapshotted when the closure is created. For `depth > 1` this is
    /// the enclosing body's own capture register for the same name.
    pub parent_register: u16,
}

/// Immutable output of compiling one sub body.
#[derive(Debug, Clone)]
pub struct CompiledCode {
    /// The bytecode stream.
    pub code: Vec<CodeWord>,
    /// Scalars referenced by `LOAD_CONST`.
    pub constants: Vec<Scalar>,
    /// Interned strings referenced by name-carrying instructions.
    pub strings: Vec<Rc<str>>,
    /// Register slots this body needs.
    pub max_registers: u16,
    /// Source file name.
    pub source_name: Rc<str>,
    /// Line of the opening token.
    pub source_line: u32,
    /// Sparse pc → source line mapping, ascending by pc.
    pub pc_to_line: Vec<(u32, u32)>,
    /// Upvalues copied in at call entry, in register order.
    pub captured_slots: Vec<CaptureSlot>,
    /// Owning package, when registered as a named sub.
    pub package_name: Option<Rc<str>>,
    /// Sub name, when registered as a named sub.
    pub sub_name: Option<Rc<str>>,
    /// `true` for `eval BLOCK` bodies: errors unwinding out of a call
    /// stop here, land in `$@`, and execution resumes at the caller.
    pub is_eval: bool,
}

impl CompiledCode {
    /// Source line for a program counter, from the sparse table.
    pub fn line_for_pc(&self, pc: u32) -> u32 {
        match self.pc_to_line.binary_search_by_key(&pc, |&(p, _)| p) {
            Ok(at) => self.pc_to_line[at].1,
            Err(0) => self.source_line,
            Err(at) => self.pc_to_line[at - 1].1,
        }
    }

    /// `Package::name` when registered, `__ANON__` otherwise.
    pub fn qualified_name(&self) -> String {
        match (&self.package_name, &self.sub_name) {
            (Some(pkg), Some(name)) => format!("{pkg}::{name}"),
            (None, Some(name)) => format!("main::{name}"),
            _ => "__ANON__".to_owned(),
        }
    }

    /// Human-readable instruction listing, one instruction per line.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut pc = 0;
        while pc < self.code.len() {
            match Opcode::decode(&self.code, pc) {
                Ok((op, next)) => {
                    out.push_str(&format!("{pc:6}  {op}\n"));
                    pc = next;
                }
                Err(_) => {
                    out.push_str(&format!("{pc:6}  ??? {:#06x}\n", self.code[pc]));
                    pc += 1;
                }
            }
        }
        out
    }
}

/// A compiled body paired with the captured values snapshotted when its
/// closure was created. Named subs are closures with no captures.
#[derive(Debug, Clone)]
pub struct Closure {
    /// The shared compiled body.
    pub code: Rc<CompiledCode>,
    /// Captured slots, in `captured_slots` order. Shared, not copied:
    /// sibling closures over the same lexical see each other's writes.
    pub captured: Vec<Slot>,
}

impl Closure {
    /// Closure with no captured environment.
    pub fn plain(code: Rc<CompiledCode>) -> Self {
        Self {
            code,
            captured: Vec::new(),
        }
    }
}

/// Error surfaced by a host-native callable.
#[derive(Debug, Clone)]
pub struct HostError {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl HostError {
    /// Convenience constructor.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HostError {}

/// Host-native callable: receives the aliased argument array and the
/// calling context, exactly like a compiled body does.
pub type HostFn = Rc<dyn Fn(&ArrayRef, CallContext) -> Result<Slot, HostError>>;

/// A callable value: either interpreted bytecode or a host-native sub
/// registered under the same calling convention. The two are
/// interchangeable wherever a code value is expected.
#[derive(Clone)]
pub enum CodeValue {
    /// A compiled body plus captured environment.
    Bytecode(Closure),
    /// A host-native callable.
    Host(HostFn),
}

impl CodeValue {
    /// Wraps a compiled body with no captures.
    pub fn from_code(code: Rc<CompiledCode>) -> Rc<Self> {
        Rc::new(Self::Bytecode(Closure::plain(code)))
    }

    /// Wraps a host callable.
    pub fn from_host(f: HostFn) -> Rc<Self> {
        Rc::new(Self::Host(f))
    }

    /// The compiled body, when this is bytecode.
    pub fn closure(&self) -> Option<&Closure> {
        match self {
            Self::Bytecode(c) => Some(c),
            Self::Host(_) => None,
        }
    }
}

impl fmt::Debug for CodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytecode(c) => f.debug_tuple("Bytecode").field(&c.code.qualified_name()).finish(),
            Self::Host(_) => f.write_str("Host(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_with_lines(pairs: &[(u32, u32)]) -> CompiledCode {
        CompiledCode {
            code: Vec::new(),
            constants: Vec::new(),
            strings: Vec::new(),
            max_registers: 3,
            source_name: Rc::from("t.pl"),
            source_line: 1,
            pc_to_line: pairs.to_vec(),
            captured_slots: Vec::new(),
            package_name: None,
            sub_name: None,
            is_eval: false,
        }
    }

    #[test]
    fn line_lookup_takes_the_preceding_entry() {
        let code = code_with_lines(&[(0, 1), (10, 3), (25, 7)]);
        assert_eq!(code.line_for_pc(0), 1);
        assert_eq!(code.line_for_pc(9), 1);
        assert_eq!(code.line_for_pc(10), 3);
        assert_eq!(code.line_for_pc(24), 3);
        assert_eq!(code.line_for_pc(100), 7);
    }

    #[test]
    fn qualified_names() {
        let mut code = code_with_lines(&[]);
        assert_eq!(code.qualified_name(), "__ANON__");
        code.package_name = Some(Rc::from("Foo"));
        code.sub_name = Some(Rc::from("bar"));
        assert_eq!(code.qualified_name(), "Foo::bar");
    }
}
