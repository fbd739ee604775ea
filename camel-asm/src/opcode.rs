use alloc::format;
use alloc::vec::Vec;
use core::fmt;

use crate::{
    imm32_from_words, imm32_words, Builtin, CodeWord, ConstId, Immediate32,
    RegisterId, SlowOp, StringId,
};

pub mod consts;

use consts::{InvalidOpcode, OpcodeRepr};

/// Target kind for reference creation and dereference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum RefKind {
    /// A scalar target.
    Scalar = 0,
    /// An array target.
    Array = 1,
    /// A hash target.
    Hash = 2,
    /// A code target.
    Code = 3,
    /// A typeglob target.
    Glob = 4,
}

impl TryFrom<u16> for RefKind {
    type Error = InvalidOpcode;

    fn try_from(word: u16) -> Result<Self, InvalidOpcode> {
        Ok(match word {
            0 => Self::Scalar,
            1 => Self::Array,
            2 => Self::Hash,
            3 => Self::Code,
            4 => Self::Glob,
            _ => return Err(InvalidOpcode),
        })
    }
}

/// Typed instruction representation.
///
/// The interpreter's hot loop reads raw code words directly; this enum is
/// the structured view used by the compiler for emission and by the
/// disassembler and tests for decoding. Operand order in each variant is
/// the encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(non_camel_case_types, clippy::upper_case_acronyms, missing_docs)]
pub enum Opcode {
    /// No operation.
    NOP,
    /// Returns `rs` to the caller.
    RETURN(RegisterId),
    /// Branches by the signed word offset, relative to the next instruction.
    GOTO(Immediate32),
    /// Branches when `rc` is falsy.
    GOTO_IF_FALSE(RegisterId, Immediate32),
    /// Branches when `rc` is truthy.
    GOTO_IF_TRUE(RegisterId, Immediate32),
    /// `rd = rs`.
    MOVE(RegisterId, RegisterId),
    /// `rd = constants[k]`.
    LOAD_CONST(RegisterId, ConstId),
    /// `rd = imm`.
    LOAD_INT(RegisterId, Immediate32),
    /// `rd = strings[s]`.
    LOAD_STRING(RegisterId, StringId),
    /// `rd = undef`.
    LOAD_UNDEF(RegisterId),
    /// `rd = imm != 0`.
    LOAD_BOOL(RegisterId, CodeWord),
    /// `rd = ${strings[s]}` resolved in the global stash.
    PKG_GET_SCALAR(RegisterId, StringId),
    /// `${strings[s]} = rs`.
    PKG_SET_SCALAR(StringId, RegisterId),
    /// `rd = @{strings[s]}`.
    PKG_GET_ARRAY(RegisterId, StringId),
    /// `@{strings[s]} = rs`.
    PKG_SET_ARRAY(StringId, RegisterId),
    /// `rd = %{strings[s]}`.
    PKG_GET_HASH(RegisterId, StringId),
    /// `%{strings[s]} = rs`.
    PKG_SET_HASH(StringId, RegisterId),
    /// `rd = &{strings[s]}`.
    PKG_GET_CODE(RegisterId, StringId),
    /// `&{strings[s]} = rs`.
    PKG_SET_CODE(StringId, RegisterId),
    /// `rd = ra + rb`.
    ADD(RegisterId, RegisterId, RegisterId),
    /// `rd = ra - rb`.
    SUB(RegisterId, RegisterId, RegisterId),
    /// `rd = ra * rb`.
    MUL(RegisterId, RegisterId, RegisterId),
    /// `rd = ra / rb`.
    DIV(RegisterId, RegisterId, RegisterId),
    /// `rd = ra % rb`.
    MOD(RegisterId, RegisterId, RegisterId),
    /// `rd = ra ** rb`.
    POW(RegisterId, RegisterId, RegisterId),
    /// `rd = -rs`.
    NEG(RegisterId, RegisterId),
    /// Integer-specialized `rd = ra + rb`.
    ADD_INT(RegisterId, RegisterId, RegisterId),
    /// Integer-specialized `rd = ra - rb`.
    SUB_INT(RegisterId, RegisterId, RegisterId),
    /// Integer-specialized `rd = ra * rb`.
    MUL_INT(RegisterId, RegisterId, RegisterId),
    /// In-place `++rd`, with string magic.
    INC(RegisterId),
    /// In-place `--rd`.
    DEC(RegisterId),
    /// `rd = ra . rb`.
    CONCAT(RegisterId, RegisterId, RegisterId),
    /// `rd = ra x rb`.
    REPEAT(RegisterId, RegisterId, RegisterId),
    /// `rd = substr(rs, ro, rl)`.
    SUBSTR(RegisterId, RegisterId, RegisterId, RegisterId),
    /// `rd = length(rs)`.
    LENGTH(RegisterId, RegisterId),
    /// `rd = ra == rb`.
    EQ_NUM(RegisterId, RegisterId, RegisterId),
    /// `rd = ra != rb`.
    NE_NUM(RegisterId, RegisterId, RegisterId),
    /// `rd = ra < rb`.
    LT_NUM(RegisterId, RegisterId, RegisterId),
    /// `rd = ra > rb`.
    GT_NUM(RegisterId, RegisterId, RegisterId),
    /// `rd = ra <= rb`.
    LE_NUM(RegisterId, RegisterId, RegisterId),
    /// `rd = ra >= rb`.
    GE_NUM(RegisterId, RegisterId, RegisterId),
    /// `rd = ra <=> rb`.
    CMP_NUM(RegisterId, RegisterId, RegisterId),
    /// `rd = ra eq rb`.
    EQ_STR(RegisterId, RegisterId, RegisterId),
    /// `rd = ra ne rb`.
    NE_STR(RegisterId, RegisterId, RegisterId),
    /// `rd = ra lt rb`.
    LT_STR(RegisterId, RegisterId, RegisterId),
    /// `rd = ra gt rb`.
    GT_STR(RegisterId, RegisterId, RegisterId),
    /// `rd = ra le rb`.
    LE_STR(RegisterId, RegisterId, RegisterId),
    /// `rd = ra ge rb`.
    GE_STR(RegisterId, RegisterId, RegisterId),
    /// `rd = ra cmp rb`.
    CMP_STR(RegisterId, RegisterId, RegisterId),
    /// `rd = !rs`.
    NOT(RegisterId, RegisterId),
    /// `rd = ra && rb`, preserving the deciding operand's value.
    AND(RegisterId, RegisterId, RegisterId),
    /// `rd = ra || rb`, preserving the deciding operand's value.
    OR(RegisterId, RegisterId, RegisterId),
    /// `rd = defined(rs)`.
    DEFINED(RegisterId, RegisterId),
    /// `rd = [r_first .. r_first+n)`.
    ARRAY_CREATE(RegisterId, CodeWord, RegisterId),
    /// `rd = ra[ri]`.
    ARRAY_GET(RegisterId, RegisterId, RegisterId),
    /// `ra[ri] = rs`.
    ARRAY_SET(RegisterId, RegisterId, RegisterId),
    /// Appends `n` consecutive registers starting at `r_first`.
    ARRAY_PUSH(RegisterId, CodeWord, RegisterId),
    /// `rd = pop ra`.
    ARRAY_POP(RegisterId, RegisterId),
    /// `rd = shift ra`.
    ARRAY_SHIFT(RegisterId, RegisterId),
    /// Prepends `n` consecutive registers starting at `r_first`.
    ARRAY_UNSHIFT(RegisterId, CodeWord, RegisterId),
    /// `rd = scalar(@ra)`.
    ARRAY_SIZE(RegisterId, RegisterId),
    /// `rd = {r_first .. r_first+n}` as key/value pairs.
    HASH_CREATE(RegisterId, CodeWord, RegisterId),
    /// `rd = rh{rk}`.
    HASH_GET(RegisterId, RegisterId, RegisterId),
    /// `rh{rk} = rs`.
    HASH_SET(RegisterId, RegisterId, RegisterId),
    /// `rd = exists rh{rk}`.
    HASH_EXISTS(RegisterId, RegisterId, RegisterId),
    /// `rd = delete rh{rk}`.
    HASH_DELETE(RegisterId, RegisterId, RegisterId),
    /// `rd = keys %rh`.
    HASH_KEYS(RegisterId, RegisterId),
    /// `rd = values %rh`.
    HASH_VALUES(RegisterId, RegisterId),
    /// `rd = rf->(r_first .. r_first+n)` in the context named by the
    /// trailing context word.
    CALL_SUB(RegisterId, RegisterId, CodeWord, RegisterId, CodeWord),
    /// `rd = r_first->method(...)` with the method name in `strings[s]`.
    CALL_METHOD(RegisterId, StringId, CodeWord, RegisterId, CodeWord),
    /// `rd = builtin(r_first .. r_first+n)`.
    CALL_BUILTIN(RegisterId, Builtin, CodeWord, RegisterId, CodeWord),
    /// `rd = closure(constants[k])`, snapshotting the current captures.
    MAKE_CLOSURE(RegisterId, ConstId),
    /// Replaces the executing body with `rf`, reusing `@_` and the frame.
    GOTO_SUB(RegisterId),
    /// `rd = scalar-view(rs)`.
    LIST_TO_SCALAR(RegisterId, RegisterId),
    /// `rd = (rs)`.
    SCALAR_TO_LIST(RegisterId, RegisterId),
    /// `rd = control-flow last, label strings[s]`.
    CREATE_LAST(RegisterId, StringId),
    /// `rd = control-flow next, label strings[s]`.
    CREATE_NEXT(RegisterId, StringId),
    /// `rd = control-flow redo, label strings[s]`.
    CREATE_REDO(RegisterId, StringId),
    /// `rd = control-flow goto, label strings[s]`.
    CREATE_GOTO(RegisterId, StringId),
    /// `rd = rs is a control-flow value`.
    IS_CONTROL_FLOW(RegisterId, RegisterId),
    /// `rd = discriminant of the control-flow value in rs`.
    GET_CONTROL_FLOW_TYPE(RegisterId, RegisterId),
    /// `rd = label of the control-flow value in rs`.
    GET_CONTROL_FLOW_LABEL(RegisterId, RegisterId),
    /// `rd = \rs` of the given kind.
    CREATE_REF(RegisterId, RegisterId, RefKind),
    /// `rd = *{rs}` dereferenced as the given kind.
    DEREF(RegisterId, RegisterId, RefKind),
    /// `rd = ref(rs)`.
    GET_TYPE(RegisterId, RegisterId),
    /// Prints `n` consecutive registers starting at `r_first`.
    PRINT(CodeWord, RegisterId),
    /// Prints with a trailing newline.
    SAY(CodeWord, RegisterId),
    /// Dies with `r_msg`, appending `constants[k]` when the message has no
    /// trailing newline.
    DIE(RegisterId, ConstId),
    /// Warns with `r_msg`, appending `constants[k]` when the message has no
    /// trailing newline.
    WARN(RegisterId, ConstId),
    /// `rd` shares `rs`'s slot handle.
    ALIAS(RegisterId, RegisterId),
    /// Binds the package scalar `strings[s]` to `rs`'s handle.
    PKG_BIND_SCALAR(StringId, RegisterId),
    /// Escapes to the cold-path handler.
    SLOW_OP(SlowOp),
}

impl Opcode {
    /// Dense numeric representation of this instruction's opcode.
    pub const fn repr(&self) -> OpcodeRepr {
        use Opcode::*;
        match self {
            NOP => OpcodeRepr::NOP,
            RETURN(..) => OpcodeRepr::RETURN,
            GOTO(..) => OpcodeRepr::GOTO,
            GOTO_IF_FALSE(..) => OpcodeRepr::GOTO_IF_FALSE,
            GOTO_IF_TRUE(..) => OpcodeRepr::GOTO_IF_TRUE,
            MOVE(..) => OpcodeRepr::MOVE,
            LOAD_CONST(..) => OpcodeRepr::LOAD_CONST,
            LOAD_INT(..) => OpcodeRepr::LOAD_INT,
            LOAD_STRING(..) => OpcodeRepr::LOAD_STRING,
            LOAD_UNDEF(..) => OpcodeRepr::LOAD_UNDEF,
            LOAD_BOOL(..) => OpcodeRepr::LOAD_BOOL,
            PKG_GET_SCALAR(..) => OpcodeRepr::PKG_GET_SCALAR,
            PKG_SET_SCALAR(..) => OpcodeRepr::PKG_SET_SCALAR,
            PKG_GET_ARRAY(..) => OpcodeRepr::PKG_GET_ARRAY,
            PKG_SET_ARRAY(..) => OpcodeRepr::PKG_SET_ARRAY,
            PKG_GET_HASH(..) => OpcodeRepr::PKG_GET_HASH,
            PKG_SET_HASH(..) => OpcodeRepr::PKG_SET_HASH,
            PKG_GET_CODE(..) => OpcodeRepr::PKG_GET_CODE,
            PKG_SET_CODE(..) => OpcodeRepr::PKG_SET_CODE,
            ADD(..) => OpcodeRepr::ADD,
            SUB(..) => OpcodeRepr::SUB,
            MUL(..) => OpcodeRepr::MUL,
            DIV(..) => OpcodeRepr::DIV,
            MOD(..) => OpcodeRepr::MOD,
            POW(..) => OpcodeRepr::POW,
            NEG(..) => OpcodeRepr::NEG,
            ADD_INT(..) => OpcodeRepr::ADD_INT,
            SUB_INT(..) => OpcodeRepr::SUB_INT,
            MUL_INT(..) => OpcodeRepr::MUL_INT,
            INC(..) => OpcodeRepr::INC,
            DEC(..) => OpcodeRepr::DEC,
            CONCAT(..) => OpcodeRepr::CONCAT,
            REPEAT(..) => OpcodeRepr::REPEAT,
            SUBSTR(..) => OpcodeRepr::SUBSTR,
            LENGTH(..) => OpcodeRepr::LENGTH,
            EQ_NUM(..) => OpcodeRepr::EQ_NUM,
            NE_NUM(..) => OpcodeRepr::NE_NUM,
            LT_NUM(..) => OpcodeRepr::LT_NUM,
            GT_NUM(..) => OpcodeRepr::GT_NUM,
            LE_NUM(..) => OpcodeRepr::LE_NUM,
            GE_NUM(..) => OpcodeRepr::GE_NUM,
            CMP_NUM(..) => OpcodeRepr::CMP_NUM,
            EQ_STR(..) => OpcodeRepr::EQ_STR,
            NE_STR(..) => OpcodeRepr::NE_STR,
            LT_STR(..) => OpcodeRepr::LT_STR,
            GT_STR(..) => OpcodeRepr::GT_STR,
            LE_STR(..) => OpcodeRepr::LE_STR,
            GE_STR(..) => OpcodeRepr::GE_STR,
            CMP_STR(..) => OpcodeRepr::CMP_STR,
            NOT(..) => OpcodeRepr::NOT,
            AND(..) => OpcodeRepr::AND,
            OR(..) => OpcodeRepr::OR,
            DEFINED(..) => OpcodeRepr::DEFINED,
            ARRAY_CREATE(..) => OpcodeRepr::ARRAY_CREATE,
            ARRAY_GET(..) => OpcodeRepr::ARRAY_GET,
            ARRAY_SET(..) => OpcodeRepr::ARRAY_SET,
            ARRAY_PUSH(..) => OpcodeRepr::ARRAY_PUSH,
            ARRAY_POP(..) => OpcodeRepr::ARRAY_POP,
            ARRAY_SHIFT(..) => OpcodeRepr::ARRAY_SHIFT,
            ARRAY_UNSHIFT(..) => OpcodeRepr::ARRAY_UNSHIFT,
            ARRAY_SIZE(..) => OpcodeRepr::ARRAY_SIZE,
            HASH_CREATE(..) => OpcodeRepr::HASH_CREATE,
            HASH_GET(..) => OpcodeRepr::HASH_GET,
            HASH_SET(..) => OpcodeRepr::HASH_SET,
            HASH_EXISTS(..) => OpcodeRepr::HASH_EXISTS,
            HASH_DELETE(..) => OpcodeRepr::HASH_DELETE,
            HASH_KEYS(..) => OpcodeRepr::HASH_KEYS,
            HASH_VALUES(..) => OpcodeRepr::HASH_VALUES,
            CALL_SUB(..) => OpcodeRepr::CALL_SUB,
            CALL_METHOD(..) => OpcodeRepr::CALL_METHOD,
            CALL_BUILTIN(..) => OpcodeRepr::CALL_BUILTIN,
            MAKE_CLOSURE(..) => OpcodeRepr::MAKE_CLOSURE,
            GOTO_SUB(..) => OpcodeRepr::GOTO_SUB,
            LIST_TO_SCALAR(..) => OpcodeRepr::LIST_TO_SCALAR,
            SCALAR_TO_LIST(..) => OpcodeRepr::SCALAR_TO_LIST,
            CREATE_LAST(..) => OpcodeRepr::CREATE_LAST,
            CREATE_NEXT(..) => OpcodeRepr::CREATE_NEXT,
            CREATE_REDO(..) => OpcodeRepr::CREATE_REDO,
            CREATE_GOTO(..) => OpcodeRepr::CREATE_GOTO,
            IS_CONTROL_FLOW(..) => OpcodeRepr::IS_CONTROL_FLOW,
            GET_CONTROL_FLOW_TYPE(..) => OpcodeRepr::GET_CONTROL_FLOW_TYPE,
            GET_CONTROL_FLOW_LABEL(..) => OpcodeRepr::GET_CONTROL_FLOW_LABEL,
            CREATE_REF(..) => OpcodeRepr::CREATE_REF,
            DEREF(..) => OpcodeRepr::DEREF,
            GET_TYPE(..) => OpcodeRepr::GET_TYPE,
            PRINT(..) => OpcodeRepr::PRINT,
            SAY(..) => OpcodeRepr::SAY,
            DIE(..) => OpcodeRepr::DIE,
            WARN(..) => OpcodeRepr::WARN,
            ALIAS(..) => OpcodeRepr::ALIAS,
            PKG_BIND_SCALAR(..) => OpcodeRepr::PKG_BIND_SCALAR,
            SLOW_OP(..) => OpcodeRepr::SLOW_OP,
        }
    }

    /// Appends this instruction's words to a code buffer.
    pub fn write(&self, buf: &mut Vec<CodeWord>) {
        use Opcode::*;
        buf.push(self.repr() as u16);
        match *self {
            NOP => {}
            RETURN(rs) | LOAD_UNDEF(rs) | INC(rs) | DEC(rs) | GOTO_SUB(rs) => {
                buf.push(rs);
            }
            GOTO(imm) => buf.extend_from_slice(&imm32_words(imm)),
            GOTO_IF_FALSE(rc, imm) | GOTO_IF_TRUE(rc, imm) => {
                buf.push(rc);
                buf.extend_from_slice(&imm32_words(imm));
            }
            LOAD_INT(rd, imm) => {
                buf.push(rd);
                buf.extend_from_slice(&imm32_words(imm));
            }
            MOVE(a, b)
            | LOAD_CONST(a, b)
            | LOAD_STRING(a, b)
            | LOAD_BOOL(a, b)
            | PKG_GET_SCALAR(a, b)
            | PKG_SET_SCALAR(a, b)
            | PKG_GET_ARRAY(a, b)
            | PKG_SET_ARRAY(a, b)
            | PKG_GET_HASH(a, b)
            | PKG_SET_HASH(a, b)
            | PKG_GET_CODE(a, b)
            | PKG_SET_CODE(a, b)
            | NEG(a, b)
            | LENGTH(a, b)
            | NOT(a, b)
            | DEFINED(a, b)
            | ARRAY_POP(a, b)
            | ARRAY_SHIFT(a, b)
            | ARRAY_SIZE(a, b)
            | HASH_KEYS(a, b)
            | HASH_VALUES(a, b)
            | MAKE_CLOSURE(a, b)
            | LIST_TO_SCALAR(a, b)
            | SCALAR_TO_LIST(a, b)
            | CREATE_LAST(a, b)
            | CREATE_NEXT(a, b)
            | CREATE_REDO(a, b)
            | CREATE_GOTO(a, b)
            | IS_CONTROL_FLOW(a, b)
            | GET_CONTROL_FLOW_TYPE(a, b)
            | GET_CONTROL_FLOW_LABEL(a, b)
            | GET_TYPE(a, b)
            | PRINT(a, b)
            | SAY(a, b)
            | DIE(a, b)
            | WARN(a, b)
            | ALIAS(a, b)
            | PKG_BIND_SCALAR(a, b) => {
                buf.push(a);
                buf.push(b);
            }
            ADD(a, b, c)
            | SUB(a, b, c)
            | MUL(a, b, c)
            | DIV(a, b, c)
            | MOD(a, b, c)
            | POW(a, b, c)
            | ADD_INT(a, b, c)
            | SUB_INT(a, b, c)
            | MUL_INT(a, b, c)
            | CONCAT(a, b, c)
            | REPEAT(a, b, c)
            | EQ_NUM(a, b, c)
            | NE_NUM(a, b, c)
            | LT_NUM(a, b, c)
            | GT_NUM(a, b, c)
            | LE_NUM(a, b, c)
            | GE_NUM(a, b, c)
            | CMP_NUM(a, b, c)
            | EQ_STR(a, b, c)
            | NE_STR(a, b, c)
            | LT_STR(a, b, c)
            | GT_STR(a, b, c)
            | LE_STR(a, b, c)
            | GE_STR(a, b, c)
            | CMP_STR(a, b, c)
            | AND(a, b, c)
            | OR(a, b, c)
            | ARRAY_CREATE(a, b, c)
            | ARRAY_GET(a, b, c)
            | ARRAY_SET(a, b, c)
            | ARRAY_PUSH(a, b, c)
            | ARRAY_UNSHIFT(a, b, c)
            | HASH_CREATE(a, b, c)
            | HASH_GET(a, b, c)
            | HASH_SET(a, b, c)
            | HASH_EXISTS(a, b, c)
            | HASH_DELETE(a, b, c) => {
                buf.push(a);
                buf.push(b);
                buf.push(c);
            }
            SUBSTR(a, b, c, d) => {
                buf.push(a);
                buf.push(b);
                buf.push(c);
                buf.push(d);
            }
            CALL_SUB(rd, rf, n, rf0, ctx) => {
                buf.push(rd);
                buf.push(rf);
                buf.push(n);
                buf.push(rf0);
                buf.push(ctx);
            }
            CALL_METHOD(rd, s, n, rf0, ctx) => {
                buf.push(rd);
                buf.push(s);
                buf.push(n);
                buf.push(rf0);
                buf.push(ctx);
            }
            CALL_BUILTIN(rd, b, n, rf0, ctx) => {
                buf.push(rd);
                buf.push(b as u16);
                buf.push(n);
                buf.push(rf0);
                buf.push(ctx);
            }
            CREATE_REF(rd, rs, kind) | DEREF(rd, rs, kind) => {
                buf.push(rd);
                buf.push(rs);
                buf.push(kind as u16);
            }
            SLOW_OP(sub) => buf.push(sub as u16),
        }
    }

    /// Decodes the instruction starting at `pc`, returning it together
    /// with the pc of the next instruction.
    ///
    /// Operands of a `SLOW_OP` sub-operation are skipped, not decoded;
    /// callers inspecting slow operands read the raw words.
    pub fn decode(code: &[CodeWord], pc: usize) -> Result<(Self, usize), InvalidOpcode> {
        use Opcode::*;
        let word = |i: usize| code.get(i).copied().ok_or(InvalidOpcode);
        let repr = OpcodeRepr::try_from(word(pc)?)?;
        let mut at = pc + 1;
        let mut reg = || -> Result<u16, InvalidOpcode> {
            let w = word(at)?;
            at += 1;
            Ok(w)
        };

        let op = match repr {
            OpcodeRepr::NOP => NOP,
            OpcodeRepr::RETURN => RETURN(reg()?),
            OpcodeRepr::GOTO => {
                let (lo, hi) = (reg()?, reg()?);
                GOTO(imm32_from_words(lo, hi))
            }
            OpcodeRepr::GOTO_IF_FALSE => {
                let rc = reg()?;
                let (lo, hi) = (reg()?, reg()?);
                GOTO_IF_FALSE(rc, imm32_from_words(lo, hi))
            }
            OpcodeRepr::GOTO_IF_TRUE => {
                let rc = reg()?;
                let (lo, hi) = (reg()?, reg()?);
                GOTO_IF_TRUE(rc, imm32_from_words(lo, hi))
            }
            OpcodeRepr::MOVE => MOVE(reg()?, reg()?),
            OpcodeRepr::LOAD_CONST => LOAD_CONST(reg()?, reg()?),
            OpcodeRepr::LOAD_INT => {
                let rd = reg()?;
                let (lo, hi) = (reg()?, reg()?);
                LOAD_INT(rd, imm32_from_words(lo, hi))
            }
            OpcodeRepr::LOAD_STRING => LOAD_STRING(reg()?, reg()?),
            OpcodeRepr::LOAD_UNDEF => LOAD_UNDEF(reg()?),
            OpcodeRepr::LOAD_BOOL => LOAD_BOOL(reg()?, reg()?),
            OpcodeRepr::PKG_GET_SCALAR => PKG_GET_SCALAR(reg()?, reg()?),
            OpcodeRepr::PKG_SET_SCALAR => PKG_SET_SCALAR(reg()?, reg()?),
            OpcodeRepr::PKG_GET_ARRAY => PKG_GET_ARRAY(reg()?, reg()?),
            OpcodeRepr::PKG_SET_ARRAY => PKG_SET_ARRAY(reg()?, reg()?),
            OpcodeRepr::PKG_GET_HASH => PKG_GET_HASH(reg()?, reg()?),
            OpcodeRepr::PKG_SET_HASH => PKG_SET_HASH(reg()?, reg()?),
            OpcodeRepr::PKG_GET_CODE => PKG_GET_CODE(reg()?, reg()?),
            OpcodeRepr::PKG_SET_CODE => PKG_SET_CODE(reg()?, reg()?),
            OpcodeRepr::ADD => ADD(reg()?, reg()?, reg()?),
            OpcodeRepr::SUB => SUB(reg()?, reg()?, reg()?),
            OpcodeRepr::MUL => MUL(reg()?, reg()?, reg()?),
            OpcodeRepr::DIV => DIV(reg()?, reg()?, reg()?),
            OpcodeRepr::MOD => MOD(reg()?, reg()?, reg()?),
            OpcodeRepr::POW => POW(reg()?, reg()?, reg()?),
            OpcodeRepr::NEG => NEG(reg()?, reg()?),
            OpcodeRepr::ADD_INT => ADD_INT(reg()?, reg()?, reg()?),
            OpcodeRepr::SUB_INT => SUB_INT(reg()?, reg()?, reg()?),
            OpcodeRepr::MUL_INT => MUL_INT(reg()?, reg()?, reg()?),
            OpcodeRepr::INC => INC(reg()?),
            OpcodeRepr::DEC => DEC(reg()?),
            OpcodeRepr::CONCAT => CONCAT(reg()?, reg()?, reg()?),
            OpcodeRepr::REPEAT => REPEAT(reg()?, reg()?, reg()?),
            OpcodeRepr::SUBSTR => SUBSTR(reg()?, reg()?, reg()?, reg()?),
            OpcodeRepr::LENGTH => LENGTH(reg()?, reg()?),
            OpcodeRepr::EQ_NUM => EQ_NUM(reg()?, reg()?, reg()?),
            OpcodeRepr::NE_NUM => NE_NUM(reg()?, reg()?, reg()?),
            OpcodeRepr::LT_NUM => LT_NUM(reg()?, reg()?, reg()?),
            OpcodeRepr::GT_NUM => GT_NUM(reg()?, reg()?, reg()?),
            OpcodeRepr::LE_NUM => LE_NUM(reg()?, reg()?, reg()?),
            OpcodeRepr::GE_NUM => GE_NUM(reg()?, reg()?, reg()?),
            OpcodeRepr::CMP_NUM => CMP_NUM(reg()?, reg()?, reg()?),
            OpcodeRepr::EQ_STR => EQ_STR(reg()?, reg()?, reg()?),
            OpcodeRepr::NE_STR => NE_STR(reg()?, reg()?, reg()?),
            OpcodeRepr::LT_STR => LT_STR(reg()?, reg()?, reg()?),
            OpcodeRepr::GT_STR => GT_STR(reg()?, reg()?, reg()?),
            OpcodeRepr::LE_STR => LE_STR(reg()?, reg()?, reg()?),
            OpcodeRepr::GE_STR => GE_STR(reg()?, reg()?, reg()?),
            OpcodeRepr::CMP_STR => CMP_STR(reg()?, reg()?, reg()?),
            OpcodeRepr::NOT => NOT(reg()?, reg()?),
            OpcodeRepr::AND => AND(reg()?, reg()?, reg()?),
            OpcodeRepr::OR => OR(reg()?, reg()?, reg()?),
            OpcodeRepr::DEFINED => DEFINED(reg()?, reg()?),
            OpcodeRepr::ARRAY_CREATE => ARRAY_CREATE(reg()?, reg()?, reg()?),
            OpcodeRepr::ARRAY_GET => ARRAY_GET(reg()?, reg()?, reg()?),
            OpcodeRepr::ARRAY_SET => ARRAY_SET(reg()?, reg()?, reg()?),
            OpcodeRepr::ARRAY_PUSH => ARRAY_PUSH(reg()?, reg()?, reg()?),
            OpcodeRepr::ARRAY_POP => ARRAY_POP(reg()?, reg()?),
            OpcodeRepr::ARRAY_SHIFT => ARRAY_SHIFT(reg()?, reg()?),
            OpcodeRepr::ARRAY_UNSHIFT => ARRAY_UNSHIFT(reg()?, reg()?, reg()?),
            OpcodeRepr::ARRAY_SIZE => ARRAY_SIZE(reg()?, reg()?),
            OpcodeRepr::HASH_CREATE => HASH_CREATE(reg()?, reg()?, reg()?),
            OpcodeRepr::HASH_GET => HASH_GET(reg()?, reg()?, reg()?),
            OpcodeRepr::HASH_SET => HASH_SET(reg()?, reg()?, reg()?),
            OpcodeRepr::HASH_EXISTS => HASH_EXISTS(reg()?, reg()?, reg()?),
            OpcodeRepr::HASH_DELETE => HASH_DELETE(reg()?, reg()?, reg()?),
            OpcodeRepr::HASH_KEYS => HASH_KEYS(reg()?, reg()?),
            OpcodeRepr::HASH_VALUES => HASH_VALUES(reg()?, reg()?),
            OpcodeRepr::CALL_SUB => CALL_SUB(reg()?, reg()?, reg()?, reg()?, reg()?),
            OpcodeRepr::CALL_METHOD => {
                CALL_METHOD(reg()?, reg()?, reg()?, reg()?, reg()?)
            }
            OpcodeRepr::CALL_BUILTIN => {
                let rd = reg()?;
                let b = Builtin::try_from(reg()?)?;
                CALL_BUILTIN(rd, b, reg()?, reg()?, reg()?)
            }
            OpcodeRepr::MAKE_CLOSURE => MAKE_CLOSURE(reg()?, reg()?),
            OpcodeRepr::GOTO_SUB => GOTO_SUB(reg()?),
            OpcodeRepr::LIST_TO_SCALAR => LIST_TO_SCALAR(reg()?, reg()?),
            OpcodeRepr::SCALAR_TO_LIST => SCALAR_TO_LIST(reg()?, reg()?),
            OpcodeRepr::CREATE_LAST => CREATE_LAST(reg()?, reg()?),
            OpcodeRepr::CREATE_NEXT => CREATE_NEXT(reg()?, reg()?),
            OpcodeRepr::CREATE_REDO => CREATE_REDO(reg()?, reg()?),
            OpcodeRepr::CREATE_GOTO => CREATE_GOTO(reg()?, reg()?),
            OpcodeRepr::IS_CONTROL_FLOW => IS_CONTROL_FLOW(reg()?, reg()?),
            OpcodeRepr::GET_CONTROL_FLOW_TYPE => GET_CONTROL_FLOW_TYPE(reg()?, reg()?),
            OpcodeRepr::GET_CONTROL_FLOW_LABEL => GET_CONTROL_FLOW_LABEL(reg()?, reg()?),
            OpcodeRepr::CREATE_REF => {
                let rd = reg()?;
                let rs = reg()?;
                CREATE_REF(rd, rs, RefKind::try_from(reg()?)?)
            }
            OpcodeRepr::DEREF => {
                let rd = reg()?;
                let rs = reg()?;
                DEREF(rd, rs, RefKind::try_from(reg()?)?)
            }
            OpcodeRepr::GET_TYPE => GET_TYPE(reg()?, reg()?),
            OpcodeRepr::PRINT => PRINT(reg()?, reg()?),
            OpcodeRepr::SAY => SAY(reg()?, reg()?),
            OpcodeRepr::DIE => DIE(reg()?, reg()?),
            OpcodeRepr::WARN => WARN(reg()?, reg()?),
            OpcodeRepr::ALIAS => ALIAS(reg()?, reg()?),
            OpcodeRepr::PKG_BIND_SCALAR => PKG_BIND_SCALAR(reg()?, reg()?),
            OpcodeRepr::SLOW_OP => {
                let sub = SlowOp::try_from(reg()?)?;
                at += sub.operand_words();
                SLOW_OP(sub)
            }
        };

        Ok((op, at))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Opcode::*;
        match *self {
            GOTO(imm) => write!(f, "goto {imm:+}"),
            GOTO_IF_FALSE(rc, imm) => write!(f, "goto_if_false r{rc}, {imm:+}"),
            GOTO_IF_TRUE(rc, imm) => write!(f, "goto_if_true r{rc}, {imm:+}"),
            LOAD_INT(rd, imm) => write!(f, "load_int r{rd}, {imm}"),
            CALL_BUILTIN(rd, b, n, rf0, ctx) => {
                write!(f, "call_builtin r{rd}, {b:?}, {n}, r{rf0}, {ctx}")
            }
            SLOW_OP(sub) => write!(f, "slow_op {sub:?}"),
            other => {
                let mut words = Vec::new();
                other.write(&mut words);
                let mnemonic = format!("{:?}", other.repr()).to_lowercase();
                write!(f, "{mnemonic}")?;
                for (i, w) in words.iter().skip(1).enumerate() {
                    if i == 0 {
                        write!(f, " {w}")?;
                    } else {
                        write!(f, ", {w}")?;
                    }
                }
                Ok(())
            }
        }
    }
}
