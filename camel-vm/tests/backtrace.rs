//! Error propagation, `$@`, back-traces, and the top-level exit
//! contract.

mod common;

use camel_vm::prelude::*;
use common::{run_ok, B};

#[test]
fn die_in_eval_populates_errsv() {
    // sub a { b() } sub b { die "boom\n" } eval { a() }; print $@;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.at(1).sub_decl("a", vec![b.call("b", vec![])]),
            b.at(2)
                .sub_decl("b", vec![b.func("die", vec![b.str_("boom\n")])]),
            b.at(3).eval_block(vec![b.call("a", vec![])]),
            b.at(4).print(vec![b.sv("@")]),
        ],
    );
    // A message with its own newline is not decorated.
    assert_eq!(stdout, "boom\n");
}

#[test]
fn die_without_newline_gains_the_location() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.at(5)
                .eval_block(vec![b.at(5).func("die", vec![b.str_("oops")])]),
            b.print(vec![b.sv("@")]),
        ],
    );
    assert_eq!(stdout, "oops at t.pl line 5.\n");
}

#[test]
fn errsv_is_false_after_a_clean_eval() {
    // eval { 1 }; print "ok" unless $@;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.eval_block(vec![b.num("1")]),
            b.if_(
                b.un(camel_vm::ast::UnOp::Not, b.sv("@")),
                vec![b.print(vec![b.str_("ok")])],
                None,
            ),
        ],
    );
    assert_eq!(stdout, "ok");
}

#[test]
fn defined_errsv_iff_the_body_died() {
    // Frame-style property: for a closure that may die, $@ is truthy
    // exactly when it did.
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.sub_decl(
                "maybe",
                vec![b.if_(
                    b.elem(b.av("_"), b.num("0")),
                    vec![b.func("die", vec![b.str_("no\n")])],
                    None,
                )],
            ),
            b.eval_block(vec![b.call("maybe", vec![b.num("0")])]),
            b.print(vec![b.sv("@"), b.str_("|")]),
            b.eval_block(vec![b.call("maybe", vec![b.num("1")])]),
            b.print(vec![b.sv("@")]),
        ],
    );
    assert_eq!(stdout, "|no\n");
}

#[test]
fn uncaught_die_writes_the_trace_to_stderr_and_exits_nonzero() {
    let b = B::new();
    let mut engine = Engine::new();
    let err = engine.capture_stderr();

    let stmts = vec![
        b.at(1).sub_decl("a", vec![b.at(1).call("b", vec![])]),
        b.at(2)
            .sub_decl("b", vec![b.at(2).func("die", vec![b.str_("boom\n")])]),
        b.at(3).call("a", vec![]),
    ];
    let (_, _, status) = common::run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::UncaughtDie);

    let stderr = Engine::drain_capture(&err);
    assert!(stderr.starts_with("boom"), "got: {stderr}");
    assert!(stderr.contains("main::b called at t.pl line 2"), "got: {stderr}");
    assert!(stderr.contains("main::a called at t.pl line 1"), "got: {stderr}");
}

#[test]
fn nested_evals_catch_at_the_innermost_boundary() {
    // eval { eval { die "deep\n" }; print "in:", $@; die "outer\n" };
    // print "out:", $@;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.eval_block(vec![
                b.eval_block(vec![b.func("die", vec![b.str_("deep\n")])]),
                b.print(vec![b.str_("in:"), b.sv("@")]),
                b.func("die", vec![b.str_("outer\n")]),
            ]),
            b.print(vec![b.str_("out:"), b.sv("@")]),
        ],
    );
    assert_eq!(stdout, "in:deep\nout:outer\n");
}

#[test]
fn die_with_a_reference_payload_passes_through() {
    // eval { die { code => 7 } }; print ref($@), $@->{code};
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.eval_block(vec![b.func(
                "die",
                vec![Node::new(
                    camel_vm::ast::NodeKind::HashLit(vec![
                        b.str_("code"),
                        b.num("7"),
                    ]),
                    std::rc::Rc::clone(&b.file),
                    1,
                )],
            )]),
            b.print(vec![
                b.func("ref", vec![b.sv("@")]),
                b.helem(b.sv("@"), b.str_("code")),
            ]),
        ],
    );
    assert_eq!(stdout, "HASH7");
}

#[test]
fn warn_goes_to_stderr_and_execution_continues() {
    let b = B::new();
    let mut engine = Engine::new();
    let err = engine.capture_stderr();

    let stmts = vec![
        b.at(3).func("warn", vec![b.str_("careful")]),
        b.print(vec![b.str_("alive")]),
    ];
    let (_, stdout, status) = common::run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(stdout, "alive");
    assert_eq!(
        Engine::drain_capture(&err),
        "careful at t.pl line 3.\n"
    );
}
