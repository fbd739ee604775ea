/// Dense numeric representation of an opcode.
///
/// The catalog is numbered without gaps so the interpreter's dispatch
/// `match` lowers to a jump table. Everything below [`OpcodeRepr::SLOW_OP`]
/// is executed inline in the hot loop; `SLOW_OP` escapes to the cold
/// handler with a trailing sub-operation word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(non_camel_case_types, clippy::upper_case_acronyms, missing_docs)]
#[repr(u16)]
#[non_exhaustive]
pub enum OpcodeRepr {
    /// No operation.
    NOP = 0x00,
    /// Return the value in `rs` to the caller.
    RETURN = 0x01,
    /// Unconditional relative branch.
    GOTO = 0x02,
    /// Branch when the condition register is falsy.
    GOTO_IF_FALSE = 0x03,
    /// Branch when the condition register is truthy.
    GOTO_IF_TRUE = 0x04,
    /// Copy a register.
    MOVE = 0x05,
    /// Load a constant-pool entry.
    LOAD_CONST = 0x06,
    /// Load a signed 32-bit integer immediate.
    LOAD_INT = 0x07,
    /// Load an interned string.
    LOAD_STRING = 0x08,
    /// Load the undefined value.
    LOAD_UNDEF = 0x09,
    /// Load a boolean immediate.
    LOAD_BOOL = 0x0a,
    /// Read a package scalar slot.
    PKG_GET_SCALAR = 0x0b,
    /// Write a package scalar slot.
    PKG_SET_SCALAR = 0x0c,
    /// Read a package array slot.
    PKG_GET_ARRAY = 0x0d,
    /// Write a package array slot.
    PKG_SET_ARRAY = 0x0e,
    /// Read a package hash slot.
    PKG_GET_HASH = 0x0f,
    /// Write a package hash slot.
    PKG_SET_HASH = 0x10,
    /// Read a package code slot.
    PKG_GET_CODE = 0x11,
    /// Write a package code slot.
    PKG_SET_CODE = 0x12,
    /// Polymorphic addition.
    ADD = 0x13,
    /// Polymorphic subtraction.
    SUB = 0x14,
    /// Polymorphic multiplication.
    MUL = 0x15,
    /// Polymorphic division.
    DIV = 0x16,
    /// Polymorphic modulo.
    MOD = 0x17,
    /// Polymorphic exponentiation.
    POW = 0x18,
    /// Numeric negation.
    NEG = 0x19,
    /// Integer-specialized addition.
    ADD_INT = 0x1a,
    /// Integer-specialized subtraction.
    SUB_INT = 0x1b,
    /// Integer-specialized multiplication.
    MUL_INT = 0x1c,
    /// In-place increment, with string magic.
    INC = 0x1d,
    /// In-place decrement.
    DEC = 0x1e,
    /// String concatenation.
    CONCAT = 0x1f,
    /// String repetition.
    REPEAT = 0x20,
    /// Substring extraction.
    SUBSTR = 0x21,
    /// String length in characters.
    LENGTH = 0x22,
    /// Numeric equality.
    EQ_NUM = 0x23,
    /// Numeric inequality.
    NE_NUM = 0x24,
    /// Numeric less-than.
    LT_NUM = 0x25,
    /// Numeric greater-than.
    GT_NUM = 0x26,
    /// Numeric less-or-equal.
    LE_NUM = 0x27,
    /// Numeric greater-or-equal.
    GE_NUM = 0x28,
    /// Numeric three-way comparison.
    CMP_NUM = 0x29,
    /// String equality.
    EQ_STR = 0x2a,
    /// String inequality.
    NE_STR = 0x2b,
    /// String less-than.
    LT_STR = 0x2c,
    /// String greater-than.
    GT_STR = 0x2d,
    /// String less-or-equal.
    LE_STR = 0x2e,
    /// String greater-or-equal.
    GE_STR = 0x2f,
    /// String three-way comparison.
    CMP_STR = 0x30,
    /// Boolean negation.
    NOT = 0x31,
    /// Value-preserving logical and.
    AND = 0x32,
    /// Value-preserving logical or.
    OR = 0x33,
    /// Definedness test.
    DEFINED = 0x34,
    /// Build an array from consecutive registers.
    ARRAY_CREATE = 0x35,
    /// Indexed array read.
    ARRAY_GET = 0x36,
    /// Indexed array write.
    ARRAY_SET = 0x37,
    /// Append consecutive registers to an array.
    ARRAY_PUSH = 0x38,
    /// Remove and return the last element.
    ARRAY_POP = 0x39,
    /// Remove and return the first element.
    ARRAY_SHIFT = 0x3a,
    /// Prepend consecutive registers to an array.
    ARRAY_UNSHIFT = 0x3b,
    /// Element count of an array.
    ARRAY_SIZE = 0x3c,
    /// Build a hash from consecutive key/value registers.
    HASH_CREATE = 0x3d,
    /// Keyed hash read.
    HASH_GET = 0x3e,
    /// Keyed hash write.
    HASH_SET = 0x3f,
    /// Key existence test.
    HASH_EXISTS = 0x40,
    /// Key removal, returning the removed value.
    HASH_DELETE = 0x41,
    /// Key list of a hash.
    HASH_KEYS = 0x42,
    /// Value list of a hash.
    HASH_VALUES = 0x43,
    /// Call the code value in a register.
    CALL_SUB = 0x44,
    /// Resolve and call a method on the first argument.
    CALL_METHOD = 0x45,
    /// Call a named built-in operation.
    CALL_BUILTIN = 0x46,
    /// Snapshot captures and build a closure from a compiled body.
    MAKE_CLOSURE = 0x47,
    /// Tail-call the code value in a register, reusing the current frame.
    GOTO_SUB = 0x48,
    /// Coerce a list value to its scalar view.
    LIST_TO_SCALAR = 0x49,
    /// Wrap a scalar into a one-element list.
    SCALAR_TO_LIST = 0x4a,
    /// Synthesize a `last` control-flow value.
    CREATE_LAST = 0x4b,
    /// Synthesize a `next` control-flow value.
    CREATE_NEXT = 0x4c,
    /// Synthesize a `redo` control-flow value.
    CREATE_REDO = 0x4d,
    /// Synthesize a `goto LABEL` control-flow value.
    CREATE_GOTO = 0x4e,
    /// Test whether a register holds a control-flow value.
    IS_CONTROL_FLOW = 0x4f,
    /// Read the discriminant of a control-flow value.
    GET_CONTROL_FLOW_TYPE = 0x50,
    /// Read the target label of a control-flow value.
    GET_CONTROL_FLOW_LABEL = 0x51,
    /// Take a reference to a register.
    CREATE_REF = 0x52,
    /// Dereference as a specific kind.
    DEREF = 0x53,
    /// `ref()` classification of a value.
    GET_TYPE = 0x54,
    /// Print consecutive registers to standard output.
    PRINT = 0x55,
    /// Print with a trailing newline.
    SAY = 0x56,
    /// Raise a user exception with a pre-baked location.
    DIE = 0x57,
    /// Emit a warning with a pre-baked location.
    WARN = 0x58,
    /// Make a register share another's slot handle (argument packing,
    /// aliasing loops). `MOVE` copies the value; `ALIAS` shares identity.
    ALIAS = 0x59,
    /// Bind a package scalar slot to a register's handle.
    /// `PKG_SET_SCALAR` copies the value; this rebinds identity, which
    /// is how a package loop variable aliases the iterated elements.
    PKG_BIND_SCALAR = 0x5a,
    /// Escape to the cold-path handler; a sub-operation word follows.
    SLOW_OP = 0x5b,
}

/// Number of opcodes in the dense catalog.
pub const OPCODE_COUNT: u16 = OpcodeRepr::SLOW_OP as u16 + 1;

impl OpcodeRepr {
    /// `true` for opcodes dispatched inline in the interpreter's hot loop.
    pub const fn is_fast(self) -> bool {
        !matches!(self, Self::SLOW_OP)
    }

    /// Number of operand code words following the opcode word.
    ///
    /// [`OpcodeRepr::SLOW_OP`] reports only the sub-operation word here;
    /// the sub-operation's own operands are accounted by
    /// [`crate::SlowOp::operand_words`].
    pub const fn operand_words(self) -> usize {
        use OpcodeRepr::*;
        match self {
            NOP => 0,
            RETURN | LOAD_UNDEF | INC | DEC => 1,
            GOTO => 2,
            GOTO_IF_FALSE | GOTO_IF_TRUE | LOAD_INT => 3,
            MOVE | LOAD_CONST | LOAD_STRING | LOAD_BOOL => 2,
            PKG_GET_SCALAR | PKG_SET_SCALAR | PKG_GET_ARRAY | PKG_SET_ARRAY
            | PKG_GET_HASH | PKG_SET_HASH | PKG_GET_CODE | PKG_SET_CODE => 2,
            ADD | SUB | MUL | DIV | MOD | POW | ADD_INT | SUB_INT | MUL_INT => 3,
            NEG => 2,
            CONCAT | REPEAT => 3,
            SUBSTR => 4,
            LENGTH => 2,
            EQ_NUM | NE_NUM | LT_NUM | GT_NUM | LE_NUM | GE_NUM | CMP_NUM => 3,
            EQ_STR | NE_STR | LT_STR | GT_STR | LE_STR | GE_STR | CMP_STR => 3,
            NOT => 2,
            AND | OR => 3,
            DEFINED => 2,
            ARRAY_CREATE => 3,
            ARRAY_GET | ARRAY_SET => 3,
            ARRAY_PUSH | ARRAY_UNSHIFT => 3,
            ARRAY_POP | ARRAY_SHIFT | ARRAY_SIZE => 2,
            HASH_CREATE => 3,
            HASH_GET | HASH_SET | HASH_EXISTS | HASH_DELETE => 3,
            HASH_KEYS | HASH_VALUES => 2,
            CALL_SUB | CALL_METHOD | CALL_BUILTIN => 5,
            MAKE_CLOSURE => 2,
            GOTO_SUB => 1,
            LIST_TO_SCALAR | SCALAR_TO_LIST => 2,
            CREATE_LAST | CREATE_NEXT | CREATE_REDO | CREATE_GOTO => 2,
            IS_CONTROL_FLOW | GET_CONTROL_FLOW_TYPE | GET_CONTROL_FLOW_LABEL => 2,
            CREATE_REF | DEREF => 3,
            GET_TYPE => 2,
            PRINT | SAY => 2,
            DIE | WARN => 2,
            ALIAS | PKG_BIND_SCALAR => 2,
            SLOW_OP => 1,
        }
    }
}

/// The code word can't be mapped to any cataloged opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvalidOpcode;

impl core::fmt::Display for InvalidOpcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "invalid opcode word")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidOpcode {}

impl TryFrom<u16> for OpcodeRepr {
    type Error = InvalidOpcode;

    fn try_from(word: u16) -> Result<Self, InvalidOpcode> {
        use OpcodeRepr::*;
        Ok(match word {
            0x00 => NOP,
            0x01 => RETURN,
            0x02 => GOTO,
            0x03 => GOTO_IF_FALSE,
            0x04 => GOTO_IF_TRUE,
            0x05 => MOVE,
            0x06 => LOAD_CONST,
            0x07 => LOAD_INT,
            0x08 => LOAD_STRING,
            0x09 => LOAD_UNDEF,
            0x0a => LOAD_BOOL,
            0x0b => PKG_GET_SCALAR,
            0x0c => PKG_SET_SCALAR,
            0x0d => PKG_GET_ARRAY,
            0x0e => PKG_SET_ARRAY,
            0x0f => PKG_GET_HASH,
            0x10 => PKG_SET_HASH,
            0x11 => PKG_GET_CODE,
            0x12 => PKG_SET_CODE,
            0x13 => ADD,
            0x14 => SUB,
            0x15 => MUL,
            0x16 => DIV,
            0x17 => MOD,
            0x18 => POW,
            0x19 => NEG,
            0x1a => ADD_INT,
            0x1b => SUB_INT,
            0x1c => MUL_INT,
            0x1d => INC,
            0x1e => DEC,
            0x1f => CONCAT,
            0x20 => REPEAT,
            0x21 => SUBSTR,
            0x22 => LENGTH,
            0x23 => EQ_NUM,
            0x24 => NE_NUM,
            0x25 => LT_NUM,
            0x26 => GT_NUM,
            0x27 => LE_NUM,
            0x28 => GE_NUM,
            0x29 => CMP_NUM,
            0x2a => EQ_STR,
            0x2b => NE_STR,
            0x2c => LT_STR,
            0x2d => GT_STR,
            0x2e => LE_STR,
            0x2f => GE_STR,
            0x30 => CMP_STR,
            0x31 => NOT,
            0x32 => AND,
            0x33 => OR,
            0x34 => DEFINED,
            0x35 => ARRAY_CREATE,
            0x36 => ARRAY_GET,
            0x37 => ARRAY_SET,
            0x38 => ARRAY_PUSH,
            0x39 => ARRAY_POP,
            0x3a => ARRAY_SHIFT,
            0x3b => ARRAY_UNSHIFT,
            0x3c => ARRAY_SIZE,
            0x3d => HASH_CREATE,
            0x3e => HASH_GET,
            0x3f => HASH_SET,
            0x40 => HASH_EXISTS,
            0x41 => HASH_DELETE,
            0x42 => HASH_KEYS,
            0x43 => HASH_VALUES,
            0x44 => CALL_SUB,
            0x45 => CALL_METHOD,
            0x46 => CALL_BUILTIN,
            0x47 => MAKE_CLOSURE,
            0x48 => GOTO_SUB,
            0x49 => LIST_TO_SCALAR,
            0x4a => SCALAR_TO_LIST,
            0x4b => CREATE_LAST,
            0x4c => CREATE_NEXT,
            0x4d => CREATE_REDO,
            0x4e => CREATE_GOTO,
            0x4f => IS_CONTROL_FLOW,
            0x50 => GET_CONTROL_FLOW_TYPE,
            0x51 => GET_CONTROL_FLOW_LABEL,
            0x52 => CREATE_REF,
            0x53 => DEREF,
            0x54 => GET_TYPE,
            0x55 => PRINT,
            0x56 => SAY,
            0x57 => DIE,
            0x58 => WARN,
            0x59 => ALIAS,
            0x5a => PKG_BIND_SCALAR,
            0x5b => SLOW_OP,
            _ => return Err(InvalidOpcode),
        })
    }
}
