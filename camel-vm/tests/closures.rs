//! Closure capture and sharing semantics.

mod common;

use camel_vm::ast::{BinOp, UnOp};
use camel_vm::prelude::*;
use common::{run_ok, B};

#[test]
fn counter_closure_keeps_state() {
    // my $n = 0; my $inc = sub { ++$n };
    // $inc->(); $inc->(); $inc->(); print $n;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.at(1).my_s("n", Some(b.num("0"))),
            b.at(2).my_s(
                "inc",
                Some(b.anon(vec![b.un(UnOp::PreInc, b.sv("n"))])),
            ),
            b.at(3).call_ref(b.sv("inc"), vec![]),
            b.at(3).call_ref(b.sv("inc"), vec![]),
            b.at(3).call_ref(b.sv("inc"), vec![]),
            b.at(4).print(vec![b.sv("n")]),
        ],
    );
    assert_eq!(stdout, "3");
}

#[test]
fn sibling_closures_share_the_boxed_slot() {
    // my $x = 1; my $f = sub { $x++ }; my $g = sub { $x };
    // $f->(); $f->(); print $g->();
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.at(1).my_s("x", Some(b.num("1"))),
            b.at(2)
                .my_s("f", Some(b.anon(vec![b.un(UnOp::PostInc, b.sv("x"))]))),
            b.at(3).my_s("g", Some(b.anon(vec![b.sv("x")]))),
            b.at(4).call_ref(b.sv("f"), vec![]),
            b.at(4).call_ref(b.sv("f"), vec![]),
            b.at(5).print(vec![b.call_ref(b.sv("g"), vec![])]),
        ],
    );
    assert_eq!(stdout, "3");
}

#[test]
fn nested_closures_capture_transitively() {
    // my $x = 5;
    // my $outer = sub { my $inner = sub { $x + 1 }; $inner->() };
    // print $outer->();
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.at(1).my_s("x", Some(b.num("5"))),
            b.at(2).my_s(
                "outer",
                Some(b.anon(vec![
                    b.my_s(
                        "inner",
                        Some(b.anon(vec![b.bin(BinOp::Add, b.sv("x"), b.num("1"))])),
                    ),
                    b.call_ref(b.sv("inner"), vec![]),
                ])),
            ),
            b.at(3).print(vec![b.call_ref(b.sv("outer"), vec![])]),
        ],
    );
    assert_eq!(stdout, "6");
}

#[test]
fn redeclaration_gets_a_fresh_slot() {
    // Closures over distinct incarnations of a loop lexical must not
    // share state.
    // my @subs;
    // foreach my $i (1, 2, 3) { my $v = $i * 10; push @subs, sub { $v } }
    // print $subs[0]->(), $subs[1]->(), $subs[2]->();
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.at(1).my_a("subs", None),
            b.at(2).foreach(
                "i",
                b.list(vec![b.num("1"), b.num("2"), b.num("3")]),
                vec![
                    b.my_s("v", Some(b.bin(BinOp::Mul, b.sv("i"), b.num("10")))),
                    b.func("push", vec![b.av("subs"), b.anon(vec![b.sv("v")])]),
                ],
            ),
            b.at(3).print(vec![
                b.call_ref(b.elem(b.av("subs"), b.num("0")), vec![]),
                b.call_ref(b.elem(b.av("subs"), b.num("1")), vec![]),
                b.call_ref(b.elem(b.av("subs"), b.num("2")), vec![]),
            ]),
        ],
    );
    assert_eq!(stdout, "102030");
}

#[test]
fn arguments_alias_the_caller() {
    // sub set { $_[0] = 42 } my $x = 0; set($x); print $x;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.at(1).sub_decl(
                "set",
                vec![b.assign(b.elem(b.av("_"), b.num("0")), b.num("42"))],
            ),
            b.at(2).my_s("x", Some(b.num("0"))),
            b.at(3).call("set", vec![b.sv("x")]),
            b.at(4).print(vec![b.sv("x")]),
        ],
    );
    assert_eq!(stdout, "42");
}

#[test]
fn list_arguments_flatten_into_args() {
    // sub count { scalar @_ } my @a = (1, 2, 3); print count(@a, 9);
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.at(1)
                .sub_decl("count", vec![b.func("scalar", vec![b.av("_")])]),
            b.at(2).my_a(
                "a",
                Some(b.list(vec![b.num("1"), b.num("2"), b.num("3")])),
            ),
            b.at(3).print(vec![b.call("count", vec![b.av("a"), b.num("9")])]),
        ],
    );
    assert_eq!(stdout, "4");
}
