//! Packages, method dispatch, inheritance, and operator overloading.

mod common;

use std::rc::Rc;

use camel_vm::ast::BinOp;
use camel_vm::prelude::*;
use camel_value::OverloadOp;
use common::{run_ok, run_with, B};

#[test]
fn method_dispatch_on_a_blessed_reference() {
    // package Counter; sub value { $_[0]->{n} }
    // package main;
    // my $obj = bless { n => 41 }, 'Counter'; print $obj->value;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.package("Counter"),
            b.sub_decl(
                "value",
                vec![b.helem(b.elem(b.av("_"), b.num("0")), b.str_("n"))],
            ),
            b.package("main"),
            b.my_s(
                "obj",
                Some(b.func(
                    "bless",
                    vec![
                        Node::new(
                            camel_vm::ast::NodeKind::HashLit(vec![
                                b.str_("n"),
                                b.num("41"),
                            ]),
                            Rc::clone(&b.file),
                            4,
                        ),
                        b.str_("Counter"),
                    ],
                )),
            ),
            b.print(vec![b.method(b.sv("obj"), "value", vec![])]),
        ],
    );
    assert_eq!(stdout, "41");
}

#[test]
fn class_methods_dispatch_on_the_name() {
    // package Greeter; sub hello { "hi, " . $_[1] }
    // package main; print Greeter->hello("camel");
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.package("Greeter"),
            b.sub_decl(
                "hello",
                vec![b.bin(
                    BinOp::Concat,
                    b.str_("hi, "),
                    b.elem(b.av("_"), b.num("1")),
                )],
            ),
            b.package("main"),
            b.print(vec![b.method(b.str_("Greeter"), "hello", vec![b.str_("camel")])]),
        ],
    );
    assert_eq!(stdout, "hi, camel");
}

#[test]
fn methods_resolve_through_isa() {
    // @Dog::ISA = ('Animal'); Animal::speak exists, Dog inherits it.
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.package("Animal"),
            b.sub_decl("speak", vec![b.str_("generic noise")]),
            b.package("main"),
            b.assign(b.av("Dog::ISA"), b.list(vec![b.str_("Animal")])),
            b.print(vec![b.method(b.str_("Dog"), "speak", vec![])]),
        ],
    );
    assert_eq!(stdout, "generic noise");
}

#[test]
fn super_resolves_past_the_own_class() {
    // Animal::speak, Dog::speak calls SUPER::speak and decorates it.
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.package("Animal"),
            b.sub_decl("speak", vec![b.str_("noise")]),
            b.package("main"),
            b.assign(b.av("Dog::ISA"), b.list(vec![b.str_("Animal")])),
            b.package("Dog"),
            b.sub_decl(
                "speak",
                vec![b.bin(
                    BinOp::Concat,
                    b.str_("woof+"),
                    b.method(b.elem(b.av("_"), b.num("0")), "SUPER::speak", vec![]),
                )],
            ),
            b.package("main"),
            b.print(vec![b.method(b.str_("Dog"), "speak", vec![])]),
        ],
    );
    assert_eq!(stdout, "woof+noise");
}

#[test]
fn isa_mutation_invalidates_the_method_cache() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.package("A"),
            b.sub_decl("who", vec![b.str_("A")]),
            b.package("B"),
            b.sub_decl("who", vec![b.str_("B")]),
            b.package("main"),
            b.assign(b.av("Kid::ISA"), b.list(vec![b.str_("A")])),
            b.print(vec![b.method(b.str_("Kid"), "who", vec![])]),
            // Repointing @ISA must be observed by the next lookup.
            b.assign(b.av("Kid::ISA"), b.list(vec![b.str_("B")])),
            b.print(vec![b.method(b.str_("Kid"), "who", vec![])]),
        ],
    );
    assert_eq!(stdout, "AB");
}

#[test]
fn missing_methods_die_with_the_class_name() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.eval_block(vec![b.method(b.str_("Ghost"), "rattle", vec![])]),
            b.print(vec![b.sv("@")]),
        ],
    );
    assert!(
        stdout.contains("Can't locate object method \"rattle\" via package \"Ghost\""),
        "got: {stdout}"
    );
}

#[test]
fn overloaded_addition_dispatches_to_the_handler() {
    // A class with `+` overloaded; $obj + 5 consults it, with fallback
    // ordering left-then-right.
    let b = B::new();
    let mut engine = Engine::new();
    engine.interpreter().stash().install_overload(
        "Money",
        OverloadOp::Add,
        camel_value::CodeValue::from_host(Engine::host_scalar_fn(|args| {
            // ($self, $other, $swapped)
            let other = args.get(1).map(|s| s.get_int()).unwrap_or(0);
            Scalar::int(1000 + other)
        })),
    );

    let stmts = vec![
        b.my_s(
            "m",
            Some(b.func(
                "bless",
                vec![
                    Node::new(
                        camel_vm::ast::NodeKind::HashLit(vec![]),
                        Rc::clone(&b.file),
                        1,
                    ),
                    b.str_("Money"),
                ],
            )),
        ),
        b.print(vec![
            b.bin(BinOp::Add, b.sv("m"), b.num("5")),
            b.str_(","),
            b.bin(BinOp::Add, b.num("7"), b.sv("m")),
        ]),
    ];
    let (_, stdout, status) = run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(stdout, "1005,1007");
}

#[test]
fn overloaded_stringification() {
    let b = B::new();
    let mut engine = Engine::new();
    engine.interpreter().stash().install_overload(
        "Tag",
        OverloadOp::Stringify,
        camel_value::CodeValue::from_host(Engine::host_scalar_fn(|_args| {
            Scalar::str("<tag>")
        })),
    );

    let stmts = vec![
        b.my_s(
            "t",
            Some(b.func(
                "bless",
                vec![
                    Node::new(
                        camel_vm::ast::NodeKind::HashLit(vec![]),
                        Rc::clone(&b.file),
                        1,
                    ),
                    b.str_("Tag"),
                ],
            )),
        ),
        b.print(vec![b.sv("t")]),
    ];
    let (_, stdout, status) = run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(stdout, "<tag>");
}

#[test]
fn host_subs_are_callable_like_bytecode() {
    // The cross-backend seam: a host-native sub registered in the stash
    // is called with the same convention, aliasing included.
    let b = B::new();
    let mut engine = Engine::new();
    engine.register_host_sub(
        "main::double",
        Engine::host_scalar_fn(|args| {
            Scalar::int(args.first().map(|s| s.get_int()).unwrap_or(0) * 2)
        }),
    );

    let stmts = vec![b.print(vec![b.call("double", vec![b.num("21")])])];
    let (_, stdout, status) = run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(stdout, "42");
}
