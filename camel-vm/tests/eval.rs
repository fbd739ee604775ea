//! `eval STRING`: runtime compilation, lexical visibility, the source
//! cache, and error capture in `$@`.

mod common;

use std::rc::Rc;

use camel_vm::ast::{BinOp, NodeKind};
use camel_vm::prelude::*;
use common::{run_with, StubParser, B};

fn add_parser() -> StubParser {
    StubParser::new()
        .on("$x + 32", |file, line| {
            let b = || Rc::clone(&file);
            Node::new(
                NodeKind::Binary {
                    op: BinOp::Add,
                    lhs: Box::new(Node::new(
                        NodeKind::Var {
                            sigil: Sigil::Scalar,
                            name: "x".to_owned(),
                        },
                        b(),
                        line,
                    )),
                    rhs: Box::new(Node::new(
                        NodeKind::Number("32".to_owned()),
                        b(),
                        line,
                    )),
                },
                Rc::clone(&file),
                line,
            )
        })
        .on("die \"inside\\n\"", |file, line| {
            Node::new(
                NodeKind::FuncOp {
                    name: "die".to_owned(),
                    args: vec![Node::new(
                        NodeKind::Str("inside\n".to_owned()),
                        Rc::clone(&file),
                        line,
                    )],
                },
                Rc::clone(&file),
                line,
            )
        })
}

#[test]
fn eval_string_sees_the_lexical_scope() {
    // my $x = 10; my $r = eval "$x + 32"; print $r;
    let b = B::new();
    let mut engine = Engine::new();
    engine.set_parser(Rc::new(add_parser()));

    let stmts = vec![
        b.at(1).my_s("x", Some(b.num("10"))),
        b.at(2).my_s("r", Some(b.eval_str(b.str_("$x + 32")))),
        b.at(3).print(vec![b.sv("r")]),
    ];
    let (_, stdout, status) = run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(stdout, "42");
}

#[test]
fn a_repeated_eval_site_hits_the_compilation_cache() {
    // The same site runs twice: one miss compiles, one hit reuses.
    // my $x = 1; foreach my $i (1, 2) { print eval "$x + 32" }
    let b = B::new();
    let mut engine = Engine::new();
    engine.set_parser(Rc::new(add_parser()));

    let stmts = vec![
        b.my_s("x", Some(b.num("1"))),
        b.foreach(
            "i",
            b.list(vec![b.num("1"), b.num("2")]),
            vec![b.print(vec![b.eval_str(b.str_("$x + 32"))])],
        ),
    ];
    let (mut engine, stdout, status) = run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(stdout, "3333");

    let (hits, misses) = engine.interpreter().eval_cache_stats();
    assert_eq!(hits, 1);
    assert_eq!(misses, 1);
}

#[test]
fn die_inside_eval_string_lands_in_errsv() {
    // my $r = eval 'die "inside\n"'; print defined $r ? "def" : "undef", "|", $@;
    let b = B::new();
    let mut engine = Engine::new();
    engine.set_parser(Rc::new(add_parser()));

    let stmts = vec![
        b.my_s("r", Some(b.eval_str(b.str_("die \"inside\\n\"")))),
        b.print(vec![
            Node::new(
                NodeKind::Ternary {
                    cond: Box::new(b.func("defined", vec![b.sv("r")])),
                    then: Box::new(b.str_("def")),
                    els: Box::new(b.str_("undef")),
                },
                Rc::clone(&b.file),
                2,
            ),
            b.str_("|"),
            b.sv("@"),
        ]),
    ];
    let (_, stdout, status) = run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(stdout, "undef|inside\n");
}

#[test]
fn compile_failure_sets_errsv_and_returns_undef() {
    // An unparseable string must not abort the program.
    let b = B::new();
    let mut engine = Engine::new();
    engine.set_parser(Rc::new(add_parser()));

    let stmts = vec![
        b.my_s("r", Some(b.eval_str(b.str_("not a program")))),
        b.print(vec![
            b.func("defined", vec![b.sv("r")]),
            b.str_("|"),
            b.sv("@"),
        ]),
    ];
    let (_, stdout, status) = run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    let (defined, err) = stdout.split_once('|').expect("separator");
    assert_eq!(defined, "");
    assert!(err.contains("syntax error"), "got: {err}");
}

#[test]
fn eval_without_a_parser_reports_the_missing_collaborator() {
    let b = B::new();
    let stmts = vec![
        b.my_s("r", Some(b.eval_str(b.str_("$x + 32")))),
        b.print(vec![b.sv("@")]),
    ];
    let (_, stdout, status) = common::run(&b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert!(stdout.contains("no source parser installed"), "got: {stdout}");
}

#[test]
fn successful_eval_clears_errsv() {
    let b = B::new();
    let mut engine = Engine::new();
    engine.set_parser(Rc::new(add_parser()));

    let stmts = vec![
        b.my_s("x", Some(b.num("1"))),
        // First eval dies, second succeeds; $@ must end up empty.
        b.eval_str(b.str_("die \"inside\\n\"")),
        b.my_s("r", Some(b.eval_str(b.str_("$x + 32")))),
        b.print(vec![b.str_("["), b.sv("@"), b.str_("]"), b.sv("r")]),
    ];
    let (_, stdout, status) = run_with(engine, &b, stmts);
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(stdout, "[]33");
}
