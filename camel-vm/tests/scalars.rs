//! Scalar semantics through the full compile-and-execute path.

mod common;

use camel_vm::ast::BinOp;
use camel_vm::prelude::*;
use common::{run, run_ok, B};

#[test]
fn arithmetic_on_a_numeric_string_yields_an_integer() {
    // my $x = "10"; $y = $x + 5; print $y;
    let b = B::new();
    let stmts = vec![
        b.at(1).my_s("x", Some(b.str_("10"))),
        b.at(2).assign(
            b.sv("main::y"),
            b.bin(BinOp::Add, b.sv("x"), b.num("5")),
        ),
        b.at(3).print(vec![b.sv("main::y")]),
    ];
    let (mut engine, stdout, status) = run(&b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(stdout, "15");

    // The result's active tag is the integer, not a string.
    let y = engine.global_scalar("main::y");
    assert!(matches!(y.borrow().value(), ScalarValue::Int(15)));
}

#[test]
fn string_increment_is_magic() {
    // my $s = "Az"; $s++; print $s;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_s("s", Some(b.str_("Az"))),
            b.un(camel_vm::ast::UnOp::PostInc, b.sv("s")),
            b.print(vec![b.sv("s")]),
        ],
    );
    assert_eq!(stdout, "Ba");
}

#[test]
fn concat_and_repeat() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_s("s", Some(b.bin(BinOp::Concat, b.str_("foo"), b.str_("bar")))),
            b.print(vec![b.bin(BinOp::Repeat, b.sv("s"), b.num("2"))]),
        ],
    );
    assert_eq!(stdout, "foobarfoobar");
}

#[test]
fn division_by_zero_is_caught_by_eval() {
    // eval { 1 / 0 }; print $@;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.at(1)
                .eval_block(vec![b.bin(BinOp::Div, b.num("1"), b.num("0"))]),
            b.at(2).print(vec![b.sv("@")]),
        ],
    );
    assert!(
        stdout.starts_with("Illegal division by zero"),
        "got: {stdout}"
    );
    assert!(stdout.contains(" at t.pl line 1"), "got: {stdout}");
}

#[test]
fn readonly_scalar_allows_counting_tr_only() {
    // my $s = "abcABC"; lock_readonly($s);
    // my $n = ($s =~ tr/A-Z//); print $n;
    let b = B::new();
    let mut engine = Engine::new();
    engine.register_host_sub(
        "main::lock_readonly",
        Engine::host_fn(|args, _ctx| {
            if let Some(handle) = args.borrow().get(0) {
                Engine::lock_readonly(&handle);
            }
            Ok(Slot::fresh())
        }),
    );

    let stmts = vec![
        b.at(1).my_s("s", Some(b.str_("abcABC"))),
        b.at(2).call("lock_readonly", vec![b.sv("s")]),
        b.at(3)
            .my_s("n", Some(b.func("tr", vec![b.sv("s"), b.str_("A-Z")]))),
        b.at(4).print(vec![b.sv("n")]),
        // A write, by contrast, must die with the read-only error.
        b.at(5).eval_block(vec![b.assign(b.sv("s"), b.num("1"))]),
        b.at(6).print(vec![b.sv("@")]),
    ];
    let (_, stdout, status) = common::run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert!(stdout.starts_with('3'), "got: {stdout}");
    assert!(
        stdout.contains("Modification of a read-only value"),
        "got: {stdout}"
    );
}

#[test]
fn references_stringify_with_kind_and_address() {
    // my @a; my $r = \@a; print ref($r), "|", $r;
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_a("a", None),
            b.my_s(
                "r",
                Some(Node::new(
                    camel_vm::ast::NodeKind::TakeRef {
                        kind: camel_vm::ast::DerefKind::Array,
                        operand: Box::new(b.av("a")),
                    },
                    std::rc::Rc::clone(&b.file),
                    2,
                )),
            ),
            b.print(vec![b.func("ref", vec![b.sv("r")]), b.str_("|"), b.sv("r")]),
        ],
    );
    let (kind, rest) = stdout.split_once('|').expect("separator");
    assert_eq!(kind, "ARRAY");
    assert!(rest.starts_with("ARRAY(0x"), "got: {rest}");
}

#[test]
fn blessed_references_report_their_class() {
    // my $obj = bless {}, 'Camel::Counter'; print ref($obj);
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_s(
                "obj",
                Some(b.func(
                    "bless",
                    vec![
                        Node::new(
                            camel_vm::ast::NodeKind::HashLit(vec![]),
                            std::rc::Rc::clone(&b.file),
                            1,
                        ),
                        b.str_("Camel::Counter"),
                    ],
                )),
            ),
            b.print(vec![b.func("ref", vec![b.sv("obj")])]),
        ],
    );
    assert_eq!(stdout, "Camel::Counter");
}

#[test]
fn undef_and_defined() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![
            b.my_s("u", None),
            b.print(vec![
                b.func("defined", vec![b.sv("u")]),
                b.str_(","),
                b.func("defined", vec![b.num("0")]),
            ]),
        ],
    );
    // Undef is false-and-empty; 0 is defined.
    assert_eq!(stdout, ",1");
}

#[test]
fn numeric_comparison_three_way() {
    let b = B::new();
    let stdout = run_ok(
        &b,
        vec![b.print(vec![
            b.bin(BinOp::NumCmp, b.num("1"), b.num("2")),
            b.str_(","),
            b.bin(BinOp::NumCmp, b.num("2"), b.num("2")),
            b.str_(","),
            b.bin(BinOp::NumCmp, b.num("3"), b.num("2")),
        ])],
    );
    assert_eq!(stdout, "-1,0,1");
}
