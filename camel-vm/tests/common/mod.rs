//! Shared helpers: a terse tree builder standing in for the external
//! parser, a stub `SourceParser` for `eval STRING`, and an engine
//! harness that captures output.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use camel_vm::ast::{BinOp, LogOp, NodeKind, UnOp};
use camel_vm::error::CompileError;
use camel_vm::prelude::*;

/// Tree builder with a sticky current line.
pub struct B {
    pub file: Rc<str>,
    line: Cell<u32>,
}

impl B {
    pub fn new() -> Self {
        Self {
            file: Rc::from("t.pl"),
            line: Cell::new(1),
        }
    }

    pub fn at(&self, line: u32) -> &Self {
        self.line.set(line);
        self
    }

    fn mk(&self, kind: NodeKind) -> Node {
        Node::new(kind, Rc::clone(&self.file), self.line.get())
    }

    pub fn num(&self, text: &str) -> Node {
        self.mk(NodeKind::Number(text.to_owned()))
    }

    pub fn str_(&self, text: &str) -> Node {
        self.mk(NodeKind::Str(text.to_owned()))
    }

    pub fn undef(&self) -> Node {
        self.mk(NodeKind::Undef)
    }

    pub fn sv(&self, name: &str) -> Node {
        self.mk(NodeKind::Var {
            sigil: Sigil::Scalar,
            name: name.to_owned(),
        })
    }

    pub fn av(&self, name: &str) -> Node {
        self.mk(NodeKind::Var {
            sigil: Sigil::Array,
            name: name.to_owned(),
        })
    }

    pub fn hv(&self, name: &str) -> Node {
        self.mk(NodeKind::Var {
            sigil: Sigil::Hash,
            name: name.to_owned(),
        })
    }

    pub fn my_s(&self, name: &str, init: Option<Node>) -> Node {
        self.mk(NodeKind::My {
            targets: vec![(Sigil::Scalar, name.to_owned())],
            parenthesized: false,
            init: init.map(Box::new),
        })
    }

    pub fn my_a(&self, name: &str, init: Option<Node>) -> Node {
        self.mk(NodeKind::My {
            targets: vec![(Sigil::Array, name.to_owned())],
            parenthesized: false,
            init: init.map(Box::new),
        })
    }

    pub fn my_h(&self, name: &str, init: Option<Node>) -> Node {
        self.mk(NodeKind::My {
            targets: vec![(Sigil::Hash, name.to_owned())],
            parenthesized: false,
            init: init.map(Box::new),
        })
    }

    pub fn my_list(&self, names: &[&str], init: Node) -> Node {
        self.mk(NodeKind::My {
            targets: names
                .iter()
                .map(|n| (Sigil::Scalar, (*n).to_owned()))
                .collect(),
            parenthesized: true,
            init: Some(Box::new(init)),
        })
    }

    pub fn assign(&self, target: Node, value: Node) -> Node {
        self.mk(NodeKind::Assign {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn bin(&self, op: BinOp, lhs: Node, rhs: Node) -> Node {
        self.mk(NodeKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn logical(&self, op: LogOp, lhs: Node, rhs: Node) -> Node {
        self.mk(NodeKind::Logical {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn un(&self, op: UnOp, operand: Node) -> Node {
        self.mk(NodeKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn list(&self, items: Vec<Node>) -> Node {
        self.mk(NodeKind::List(items))
    }

    pub fn elem(&self, array: Node, index: Node) -> Node {
        self.mk(NodeKind::Elem {
            array: Box::new(array),
            index: Box::new(index),
        })
    }

    pub fn helem(&self, hash: Node, key: Node) -> Node {
        self.mk(NodeKind::HElem {
            hash: Box::new(hash),
            key: Box::new(key),
        })
    }

    pub fn func(&self, name: &str, args: Vec<Node>) -> Node {
        self.mk(NodeKind::FuncOp {
            name: name.to_owned(),
            args,
        })
    }

    pub fn print(&self, args: Vec<Node>) -> Node {
        self.func("print", args)
    }

    pub fn call(&self, name: &str, args: Vec<Node>) -> Node {
        self.mk(NodeKind::Call {
            name: name.to_owned(),
            args,
        })
    }

    pub fn call_ref(&self, callee: Node, args: Vec<Node>) -> Node {
        self.mk(NodeKind::CallRef {
            callee: Box::new(callee),
            args,
        })
    }

    pub fn method(&self, invocant: Node, method: &str, args: Vec<Node>) -> Node {
        self.mk(NodeKind::MethodCall {
            invocant: Box::new(invocant),
            method: method.to_owned(),
            args,
        })
    }

    pub fn sub_decl(&self, name: &str, body: Vec<Node>) -> Node {
        self.mk(NodeKind::SubDecl {
            name: name.to_owned(),
            body,
        })
    }

    pub fn anon(&self, body: Vec<Node>) -> Node {
        self.mk(NodeKind::AnonSub { body })
    }

    pub fn ret(&self, value: Option<Node>) -> Node {
        self.mk(NodeKind::Return(value.map(Box::new)))
    }

    pub fn if_(&self, cond: Node, then: Vec<Node>, els: Option<Vec<Node>>) -> Node {
        self.mk(NodeKind::If {
            branches: vec![(cond, then)],
            els,
        })
    }

    pub fn while_(&self, cond: Node, body: Vec<Node>) -> Node {
        self.mk(NodeKind::While {
            label: None,
            cond: Box::new(cond),
            body,
        })
    }

    pub fn while_labeled(&self, label: &str, cond: Node, body: Vec<Node>) -> Node {
        self.mk(NodeKind::While {
            label: Some(label.to_owned()),
            cond: Box::new(cond),
            body,
        })
    }

    pub fn foreach(&self, var: &str, list: Node, body: Vec<Node>) -> Node {
        self.mk(NodeKind::Foreach {
            label: None,
            var: Some(var.to_owned()),
            declares_var: true,
            list: Box::new(list),
            body,
        })
    }

    pub fn for3(
        &self,
        init: Option<Node>,
        cond: Option<Node>,
        step: Option<Node>,
        body: Vec<Node>,
    ) -> Node {
        self.mk(NodeKind::For3 {
            label: None,
            init: init.map(Box::new),
            cond: cond.map(Box::new),
            step: step.map(Box::new),
            body,
        })
    }

    pub fn last(&self, label: Option<&str>) -> Node {
        self.mk(NodeKind::Last(label.map(str::to_owned)))
    }

    pub fn next(&self, label: Option<&str>) -> Node {
        self.mk(NodeKind::Next(label.map(str::to_owned)))
    }

    pub fn eval_block(&self, body: Vec<Node>) -> Node {
        self.mk(NodeKind::EvalBlock(body))
    }

    pub fn eval_str(&self, source: Node) -> Node {
        self.mk(NodeKind::EvalString(Box::new(source)))
    }

    pub fn goto_sub(&self, name: &str) -> Node {
        self.mk(NodeKind::GotoSub(Box::new(self.call(name, vec![]))))
    }

    pub fn wantarray(&self) -> Node {
        self.mk(NodeKind::Wantarray)
    }

    pub fn package(&self, name: &str) -> Node {
        self.mk(NodeKind::Package(name.to_owned()))
    }

    pub fn block(&self, stmts: Vec<Node>) -> Node {
        self.mk(NodeKind::Block(stmts))
    }
}

/// Stub parser mapping known source strings to prebuilt trees; stands in
/// for the out-of-scope real parser in `eval STRING` tests.
pub struct StubParser {
    entries: HashMap<String, Box<dyn Fn(Rc<str>, u32) -> Node>>,
}

impl StubParser {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn on(
        mut self,
        source: &str,
        build: impl Fn(Rc<str>, u32) -> Node + 'static,
    ) -> Self {
        self.entries.insert(source.to_owned(), Box::new(build));
        self
    }
}

impl SourceParser for StubParser {
    fn parse(&self, source: &str, file: &str, line: u32) -> Result<Node, CompileError> {
        match self.entries.get(source) {
            Some(build) => Ok(build(Rc::from(file), line)),
            None => Err(CompileError::Syntax {
                message: "unknown test source".to_owned(),
                file: file.to_owned(),
                line,
            }),
        }
    }
}

/// Compiles and runs a program body, returning the engine, the captured
/// stdout, and the exit status.
pub fn run(b: &B, stmts: Vec<Node>) -> (Engine, String, ExitStatus) {
    run_with(Engine::new(), b, stmts)
}

pub fn run_with(mut engine: Engine, b: &B, stmts: Vec<Node>) -> (Engine, String, ExitStatus) {
    let out = engine.capture_stdout();
    let root = b.block(stmts);
    let code = engine.compile_tree(&root).expect("program compiles");
    let (status, _) = engine.run_main(code);
    let stdout = Engine::drain_capture(&out);
    (engine, stdout, status)
}

/// Runs and asserts clean completion, returning stdout.
pub fn run_ok(b: &B, stmts: Vec<Node>) -> String {
    let (_, stdout, status) = run(b, stmts);
    assert_eq!(status, ExitStatus::Success, "program failed: {stdout}");
    stdout
}
