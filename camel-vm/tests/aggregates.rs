//! Arrays, hashes, `local` dynamic scoping, the slow-op surface, and
//! signal delivery at opcode boundaries.

mod common;

use std::rc::Rc;

use camel_vm::ast::{BinOp, NodeKind};
use camel_vm::prelude::*;
use common::{run_ok, run_with, B};

#[test]
fn push_pop_shift_unshift() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_a("a", Some(b.list(vec![b.num("2"), b.num("3")]))),
            b.func("push", vec![b.av("a"), b.num("4")]),
            b.func("unshift", vec![b.av("a"), b.num("1")]),
            b.print(vec![b.func("join", vec![b.str_(","), b.av("a")])]),
            b.print(vec![
                b.str_("|"),
                b.func("pop", vec![b.av("a")]),
                b.func("shift", vec![b.av("a")]),
            ]),
        ],
    );
    assert_eq!(stdout, "1,2,3,4|41");
}

#[test]
fn negative_indices_and_sizes() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_a(
                "a",
                Some(b.list(vec![b.num("10"), b.num("20"), b.num("30")])),
            ),
            b.print(vec![
                b.elem(b.av("a"), b.num("-1")),
                b.str_("|"),
                b.func("scalar", vec![b.av("a")]),
            ]),
        ],
    );
    assert_eq!(stdout, "30|3");
}

#[test]
fn hash_keys_preserve_insertion_order() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_h(
                "h",
                Some(b.list(vec![
                    b.str_("one"),
                    b.num("1"),
                    b.str_("two"),
                    b.num("2"),
                    b.str_("three"),
                    b.num("3"),
                ])),
            ),
            b.print(vec![b.func("join", vec![b.str_(","), b.func("keys", vec![b.hv("h")])])]),
        ],
    );
    assert_eq!(stdout, "one,two,three");
}

#[test]
fn hash_exists_and_delete() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_h("h", Some(b.list(vec![b.str_("k"), b.num("5")]))),
            b.print(vec![
                b.func("exists", vec![b.helem(b.hv("h"), b.str_("k"))]),
                b.str_("|"),
                b.func("delete", vec![b.helem(b.hv("h"), b.str_("k"))]),
                b.str_("|"),
                b.func("exists", vec![b.helem(b.hv("h"), b.str_("k"))]),
            ]),
        ],
    );
    assert_eq!(stdout, "1|5|");
}

#[test]
fn each_walks_every_pair_once() {
    // while (my ($k, $v) = each %h) { ... } — lowered directly here.
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_h(
                "h",
                Some(b.list(vec![b.str_("a"), b.num("1"), b.str_("b"), b.num("2")])),
            ),
            b.my_a("pair", Some(b.func("each", vec![b.hv("h")]))),
            b.print(vec![
                b.elem(b.av("pair"), b.num("0")),
                b.elem(b.av("pair"), b.num("1")),
            ]),
            b.assign(b.av("pair"), b.func("each", vec![b.hv("h")])),
            b.print(vec![
                b.elem(b.av("pair"), b.num("0")),
                b.elem(b.av("pair"), b.num("1")),
            ]),
            b.assign(b.av("pair"), b.func("each", vec![b.hv("h")])),
            b.print(vec![b.str_("|"), b.func("scalar", vec![b.av("pair")])]),
        ],
    );
    assert_eq!(stdout, "a1b2|0");
}

#[test]
fn splice_replaces_a_middle_range() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_a(
                "a",
                Some(b.list(vec![
                    b.num("1"),
                    b.num("2"),
                    b.num("3"),
                    b.num("4"),
                ])),
            ),
            b.my_a(
                "gone",
                Some(b.func(
                    "splice",
                    vec![b.av("a"), b.num("1"), b.num("2"), b.num("9")],
                )),
            ),
            b.print(vec![
                b.func("join", vec![b.str_(","), b.av("a")]),
                b.str_("|"),
                b.func("join", vec![b.str_(","), b.av("gone")]),
            ]),
        ],
    );
    assert_eq!(stdout, "1,9,4|2,3");
}

#[test]
fn sort_and_reverse() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_a(
                "words",
                Some(b.list(vec![b.str_("pear"), b.str_("apple"), b.str_("fig")])),
            ),
            b.print(vec![b.func(
                "join",
                vec![b.str_(","), b.func("sort", vec![b.av("words")])],
            )]),
            // Numeric comparator idiom: sub { $a <=> $b }.
            b.my_a(
                "nums",
                Some(b.list(vec![b.num("10"), b.num("2"), b.num("33")])),
            ),
            b.print(vec![
                b.str_("|"),
                b.func(
                    "join",
                    vec![
                        b.str_(","),
                        b.func(
                            "sort",
                            vec![
                                b.anon(vec![b.bin(BinOp::NumCmp, b.sv("a"), b.sv("b"))]),
                                b.av("nums"),
                            ],
                        ),
                    ],
                ),
                b.str_("|"),
                b.func(
                    "join",
                    vec![b.str_(","), b.func("reverse", vec![b.av("nums")])],
                ),
            ]),
        ],
    );
    assert_eq!(stdout, "apple,fig,pear|2,10,33|33,2,10");
}

#[test]
fn local_rebinds_a_package_variable_dynamically() {
    // $x = "outer"; sub show { print $main::x }
    // sub wrap { local $x = "inner"; show() } wrap(); show();
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.assign(b.sv("main::x"), b.str_("outer")),
            b.sub_decl("show", vec![b.print(vec![b.sv("main::x"), b.str_(";")])]),
            b.sub_decl(
                "wrap",
                vec![
                    Node::new(
                        NodeKind::Local {
                            sigil: Sigil::Scalar,
                            name: "main::x".to_owned(),
                            init: Some(Box::new(b.str_("inner"))),
                        },
                        Rc::clone(&b.file),
                        3,
                    ),
                    b.call("show", vec![]),
                ],
            ),
            b.call("wrap", vec![]),
            b.call("show", vec![]),
        ],
    );
    assert_eq!(stdout, "inner;outer;");
}

#[test]
fn local_unwinds_when_the_frame_dies() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.assign(b.sv("main::x"), b.str_("outer")),
            b.sub_decl(
                "boom",
                vec![
                    Node::new(
                        NodeKind::Local {
                            sigil: Sigil::Scalar,
                            name: "main::x".to_owned(),
                            init: Some(Box::new(b.str_("inner"))),
                        },
                        Rc::clone(&b.file),
                        2,
                    ),
                    b.func("die", vec![b.str_("bye\n")]),
                ],
            ),
            b.eval_block(vec![b.call("boom", vec![])]),
            b.print(vec![b.sv("main::x")]),
        ],
    );
    assert_eq!(stdout, "outer");
}

#[test]
fn sprintf_formats_the_common_conversions() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![b.print(vec![b.func(
            "sprintf",
            vec![
                b.str_("%s=%03d (%x) %.2f"),
                b.str_("n"),
                b.num("7"),
                b.num("255"),
                b.num("2.5"),
            ],
        )])],
    );
    assert_eq!(stdout, "n=007 (ff) 2.50");
}

#[test]
fn in_memory_filehandles_round_trip() {
    // open my $fh, '<', \$data; read it line by line.
    let b = B::new();
    let stmts = vec![
        b.my_s("data", Some(b.str_("alpha\nbeta\n"))),
        b.my_s("fh", None),
        b.func(
            "open",
            vec![
                b.sv("fh"),
                b.str_("<"),
                Node::new(
                    NodeKind::TakeRef {
                        kind: camel_vm::ast::DerefKind::Scalar,
                        operand: Box::new(b.sv("data")),
                    },
                    Rc::clone(&b.file),
                    3,
                ),
            ],
        ),
        b.my_s("line", Some(b.func("readline", vec![b.sv("fh")]))),
        b.print(vec![b.sv("line")]),
        b.assign(b.sv("line"), b.func("readline", vec![b.sv("fh")])),
        b.print(vec![b.sv("line")]),
        b.func("close", vec![b.sv("fh")]),
    ];
    let stdout = run_ok(&b, stmts);
    assert_eq!(stdout, "alpha\nbeta\n");
}

#[test]
fn signals_are_delivered_at_opcode_boundaries() {
    // %SIG handler dies; the death is observed by the surrounding eval
    // at the next boundary.
    let b = B::new();
    let mut engine = Engine::new();
    engine.register_host_sub(
        "main::ring",
        Engine::host_fn(|_args, _ctx| {
            Err(camel_value::HostError::new(
                camel_asm::ErrorKind::Die,
                "ring\n",
            ))
        }),
    );
    // Install the handler as %SIG{USR1}, and a host sub that queues the
    // signal mid-program; delivery happens at the next opcode boundary.
    let signals = engine.interpreter().signals();
    engine.register_host_sub(
        "main::raise_usr1",
        Engine::host_fn(move |_args, _ctx| {
            signals.raise("USR1");
            Ok(Slot::fresh())
        }),
    );
    {
        let interp = engine.interpreter();
        let handler = interp.stash().code_slot("main::ring").expect("registered");
        let sig = interp.stash().hash_slot("main::SIG");
        sig.borrow_mut()
            .set("USR1", &Scalar::code(handler))
            .unwrap();
    }

    let stmts = vec![
        b.eval_block(vec![
            b.call("raise_usr1", vec![]),
            b.num("1"),
            b.num("2"),
        ]),
        b.print(vec![b.sv("@")]),
    ];
    let (_, stdout, status) = run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(stdout, "ring\n");
}
