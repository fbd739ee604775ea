//! Control flow: loops, labels, and control-flow values crossing sub
//! boundaries. Programs are assembled as trees and run end to end.

mod common;

use std::rc::Rc;

use camel_asm::Opcode;
use camel_vm::ast::BinOp;
use camel_vm::prelude::*;
use common::{run_ok, B};
use quickcheck_macros::quickcheck;

#[test]
fn while_loop_counts() {
    // my $i = 0; while ($i < 5) { $i++ } print $i;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_s("i", Some(b.num("0"))),
            b.while_(
                b.bin(BinOp::NumLt, b.sv("i"), b.num("5")),
                vec![b.un(camel_vm::ast::UnOp::PostInc, b.sv("i"))],
            ),
            b.print(vec![b.sv("i")]),
        ],
    );
    assert_eq!(stdout, "5");
}

#[test]
fn for3_with_last_and_next() {
    // for (my $i = 0; $i < 10; $i++) {
    //   next if $i % 2; last if $i > 6; print $i;
    // }
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![b.for3(
            Some(b.my_s("i", Some(b.num("0")))),
            Some(b.bin(BinOp::NumLt, b.sv("i"), b.num("10"))),
            Some(b.un(camel_vm::ast::UnOp::PostInc, b.sv("i"))),
            vec![
                b.if_(
                    b.bin(BinOp::Mod, b.sv("i"), b.num("2")),
                    vec![b.next(None)],
                    None,
                ),
                b.if_(
                    b.bin(BinOp::NumGt, b.sv("i"), b.num("6")),
                    vec![b.last(None)],
                    None,
                ),
                b.print(vec![b.sv("i")]),
            ],
        )],
    );
    assert_eq!(stdout, "0246");
}

#[test]
fn labeled_last_exits_the_outer_loop() {
    // OUTER: while (1) { while (1) { last OUTER } } print "out";
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.while_labeled(
                "OUTER",
                b.num("1"),
                vec![b.while_(b.num("1"), vec![b.last(Some("OUTER"))])],
            ),
            b.print(vec![b.str_("out")]),
        ],
    );
    assert_eq!(stdout, "out");
}

#[test]
fn foreach_iterates_in_order() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![b.foreach(
            "x",
            b.list(vec![b.str_("a"), b.str_("b"), b.str_("c")]),
            vec![b.print(vec![b.sv("x")])],
        )],
    );
    assert_eq!(stdout, "abc");
}

#[test]
fn foreach_lexical_variable_aliases_the_elements() {
    // my @a = (1, 2, 3); foreach my $v (@a) { $v = $v * 2 }
    // print join(",", @a);
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_a(
                "a",
                Some(b.list(vec![b.num("1"), b.num("2"), b.num("3")])),
            ),
            b.foreach(
                "v",
                b.av("a"),
                vec![b.assign(b.sv("v"), b.bin(BinOp::Mul, b.sv("v"), b.num("2")))],
            ),
            b.print(vec![b.func("join", vec![b.str_(","), b.av("a")])]),
        ],
    );
    assert_eq!(stdout, "2,4,6");
}

#[test]
fn foreach_topic_variable_aliases_and_restores() {
    // $_ = "topic"; my @a = (1, 2, 3);
    // for (@a) { $_ = $_ * 2 }
    // print join(",", @a), "|", $_;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.assign(b.sv("_"), b.str_("topic")),
            b.my_a(
                "a",
                Some(b.list(vec![b.num("1"), b.num("2"), b.num("3")])),
            ),
            Node::new(
                camel_vm::ast::NodeKind::Foreach {
                    label: None,
                    var: None,
                    declares_var: false,
                    list: Box::new(b.av("a")),
                    body: vec![b.assign(
                        b.sv("_"),
                        b.bin(BinOp::Mul, b.sv("_"), b.num("2")),
                    )],
                },
                Rc::clone(&b.file),
                3,
            ),
            b.print(vec![
                b.func("join", vec![b.str_(","), b.av("a")]),
                b.str_("|"),
                b.sv("_"),
            ]),
        ],
    );
    // Writes through `$_` reach the array, and the outer `$_` binding
    // comes back when the loop ends.
    assert_eq!(stdout, "2,4,6|topic");
}

#[test]
fn loop_control_value_crosses_a_sub_boundary() {
    // The dynamic form: a sub executing `last` unwinds the loop that
    // called it, via a control-flow value inspected at the call site.
    // sub breaker { last }
    // while (1) { breaker(); print "unreached" } print "done";
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.sub_decl("breaker", vec![b.last(None)]),
            b.while_(
                b.num("1"),
                vec![
                    b.call("breaker", vec![]),
                    b.print(vec![b.str_("unreached")]),
                ],
            ),
            b.print(vec![b.str_("done")]),
        ],
    );
    assert_eq!(stdout, "done");
}

#[test]
fn labeled_control_value_skips_the_inner_loop() {
    // sub skip { next OUTER }
    // OUTER: foreach my $i (1, 2) {
    //   while (1) { skip(); }
    //   print "x";
    // }
    // print "end";
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.sub_decl("skip", vec![b.next(Some("OUTER"))]),
            Node::new(
                camel_vm::ast::NodeKind::Foreach {
                    label: Some("OUTER".to_owned()),
                    var: Some("i".to_owned()),
                    declares_var: true,
                    list: Box::new(b.list(vec![b.num("1"), b.num("2")])),
                    body: vec![
                        b.while_(b.num("1"), vec![b.call("skip", vec![])]),
                        b.print(vec![b.str_("x")]),
                    ],
                },
                Rc::clone(&b.file),
                2,
            ),
            b.print(vec![b.str_("end")]),
        ],
    );
    // `next OUTER` propagates past the inner while, so "x" never prints.
    assert_eq!(stdout, "end");
}

#[test]
fn ternary_and_logical_short_circuit() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            // print 0 ? "t" : "f";
            Node::new(
                camel_vm::ast::NodeKind::FuncOp {
                    name: "print".to_owned(),
                    args: vec![Node::new(
                        camel_vm::ast::NodeKind::Ternary {
                            cond: Box::new(b.num("0")),
                            then: Box::new(b.str_("t")),
                            els: Box::new(b.str_("f")),
                        },
                        Rc::clone(&b.file),
                        1,
                    )],
                },
                Rc::clone(&b.file),
                1,
            ),
            // print "" || "fallback";
            b.print(vec![b.logical(
                camel_vm::ast::LogOp::Or,
                b.str_(""),
                b.str_("fallback"),
            )]),
            // print defined-or over undef.
            b.print(vec![b.logical(
                camel_vm::ast::LogOp::DefinedOr,
                b.undef(),
                b.str_("default"),
            )]),
        ],
    );
    assert_eq!(stdout, "ffallbackdefault");
}

/* BYTECODE-LEVEL PROPERTIES */

fn run_raw(code: Vec<u16>, max_registers: u16) -> Slot {
    let compiled = Rc::new(CompiledCode {
        code,
        constants: Vec::new(),
        strings: Vec::new(),
        max_registers,
        source_name: Rc::from("raw"),
        source_line: 1,
        pc_to_line: Vec::new(),
        captured_slots: Vec::new(),
        package_name: None,
        sub_name: None,
        is_eval: false,
    });
    let mut engine = Engine::new();
    engine
        .execute(compiled, Vec::new(), camel_asm::CallContext::Scalar)
        .expect("raw program runs")
}

fn words(ops: &[Opcode]) -> Vec<u16> {
    let mut out = Vec::new();
    for op in ops {
        op.write(&mut out);
    }
    out
}

// LOAD_INT; RETURN round-trips the immediate.
#[quickcheck]
fn qc_load_int_round_trip(value: i32) -> bool {
    let result = run_raw(
        words(&[Opcode::LOAD_INT(3, value), Opcode::RETURN(3)]),
        4,
    );
    match result {
        Slot::Scalar(s) => s.borrow().get_int() == value as i64,
        _ => false,
    }
}

#[test]
fn list_to_scalar_is_identity_on_scalars() {
    let result = run_raw(
        words(&[
            Opcode::LOAD_INT(3, 42),
            Opcode::LIST_TO_SCALAR(4, 3),
            Opcode::RETURN(4),
        ]),
        5,
    );
    match result {
        Slot::Scalar(s) => assert_eq!(s.borrow().get_int(), 42),
        other => panic!("expected scalar, got {other:?}"),
    }
}

#[test]
fn scalar_list_round_trip_is_identity() {
    let result = run_raw(
        words(&[
            Opcode::LOAD_INT(3, 7),
            Opcode::SCALAR_TO_LIST(4, 3),
            Opcode::LIST_TO_SCALAR(5, 4),
            Opcode::RETURN(5),
        ]),
        6,
    );
    match result {
        Slot::Scalar(s) => assert_eq!(s.borrow().get_int(), 7),
        other => panic!("expected scalar, got {other:?}"),
    }
}
