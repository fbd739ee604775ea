use crate::*;
use alloc::vec;
use alloc::vec::Vec;
use strum::IntoEnumIterator;

#[test]
fn opcode_catalog_is_dense() {
    // A gap would break jump-table lowering of the dispatch switch.
    for (expect, repr) in OpcodeRepr::iter().enumerate() {
        assert_eq!(expect as u16, repr as u16);
    }
    assert_eq!(
        OPCODE_COUNT as usize,
        OpcodeRepr::iter().count(),
        "catalog count drifted from SLOW_OP"
    );
}

#[test]
fn fast_slow_partition() {
    for repr in OpcodeRepr::iter() {
        assert_eq!(repr.is_fast(), repr != OpcodeRepr::SLOW_OP);
    }
}

#[test]
fn repr_word_round_trip() {
    for repr in OpcodeRepr::iter() {
        assert_eq!(Ok(repr), OpcodeRepr::try_from(repr as u16));
    }
    assert_eq!(Err(InvalidOpcode), OpcodeRepr::try_from(OPCODE_COUNT));
    assert_eq!(Err(InvalidOpcode), OpcodeRepr::try_from(u16::MAX));
}

#[test]
fn slow_op_word_round_trip() {
    for sub in SlowOp::iter() {
        assert_eq!(Ok(sub), SlowOp::try_from(sub as u16));
    }
    assert_eq!(Err(InvalidOpcode), SlowOp::try_from(0x7fff));
}

#[test]
fn builtin_word_round_trip() {
    for builtin in Builtin::iter() {
        assert_eq!(Ok(builtin), Builtin::try_from(builtin as u16));
    }
    assert_eq!(Err(InvalidOpcode), Builtin::try_from(0x7fff));
}

#[test]
fn error_kind_fallback_is_total() {
    for kind in ErrorKind::iter() {
        assert_eq!(kind, ErrorKind::from(kind as u16));
    }
    assert_eq!(ErrorKind::UnknownErrorKind, ErrorKind::from(0x7fff));
}

#[test]
fn imm32_word_split_round_trip() {
    for imm in [0, 1, -1, 42, -100_000, i32::MAX, i32::MIN] {
        let [lo, hi] = imm32_words(imm);
        assert_eq!(imm, imm32_from_words(lo, hi));
    }
}

#[test]
fn instruction_stream_round_trip() {
    let program = vec![
        Opcode::LOAD_INT(3, 10),
        Opcode::LOAD_INT(4, -32_768),
        Opcode::ADD(5, 3, 4),
        Opcode::GOTO_IF_FALSE(5, -9),
        Opcode::LOAD_STRING(6, 0),
        Opcode::CONCAT(6, 6, 5),
        Opcode::SUBSTR(7, 6, 3, 4),
        Opcode::CALL_SUB(8, 7, 2, 3, 1),
        Opcode::CALL_BUILTIN(9, Builtin::Join, 3, 5, 2),
        Opcode::CREATE_REF(10, 9, RefKind::Array),
        Opcode::MAKE_CLOSURE(11, 1),
        Opcode::DIE(11, 2),
        Opcode::SLOW_OP(SlowOp::Caller),
        Opcode::RETURN(8),
    ];

    let mut code = Vec::new();
    for op in &program {
        op.write(&mut code);
        if let Opcode::SLOW_OP(sub) = op {
            // Slow operands are opaque to the decoder; pad them out.
            code.extend(core::iter::repeat(0).take(sub.operand_words()));
        }
    }

    let mut pc = 0;
    let mut decoded = Vec::new();
    while pc < code.len() {
        let (op, next) = Opcode::decode(&code, pc).expect("well-formed stream");
        decoded.push(op);
        pc = next;
    }

    assert_eq!(program, decoded);
    assert_eq!(pc, code.len());
}

#[test]
fn operand_word_table_matches_encoder() {
    // Every fixed-shape opcode must report exactly the words it writes.
    let samples = [
        Opcode::NOP,
        Opcode::RETURN(1),
        Opcode::GOTO(7),
        Opcode::GOTO_IF_FALSE(3, -1),
        Opcode::GOTO_IF_TRUE(3, 1),
        Opcode::MOVE(3, 4),
        Opcode::LOAD_CONST(3, 0),
        Opcode::LOAD_INT(3, 5),
        Opcode::LOAD_STRING(3, 0),
        Opcode::LOAD_UNDEF(3),
        Opcode::LOAD_BOOL(3, 1),
        Opcode::PKG_GET_SCALAR(3, 0),
        Opcode::PKG_SET_SCALAR(0, 3),
        Opcode::ADD(3, 4, 5),
        Opcode::NEG(3, 4),
        Opcode::INC(3),
        Opcode::SUBSTR(3, 4, 5, 6),
        Opcode::CMP_STR(3, 4, 5),
        Opcode::ARRAY_CREATE(3, 2, 4),
        Opcode::HASH_DELETE(3, 4, 5),
        Opcode::CALL_METHOD(3, 0, 1, 4, 0),
        Opcode::CALL_BUILTIN(3, Builtin::Abs, 1, 4, 1),
        Opcode::ALIAS(3, 4),
        Opcode::PKG_BIND_SCALAR(0, 3),
        Opcode::GOTO_SUB(3),
        Opcode::CREATE_LAST(3, NO_LABEL),
        Opcode::DEREF(3, 4, RefKind::Hash),
        Opcode::PRINT(1, 3),
        Opcode::WARN(3, 0),
    ];

    for op in samples {
        let mut words = Vec::new();
        op.write(&mut words);
        assert_eq!(
            op.repr().operand_words(),
            words.len() - 1,
            "operand table mismatch for {op:?}"
        );
    }
}
