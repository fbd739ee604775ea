//! Closure capture analysis.
//!
//! Before a sub body is compiled, its free lexical names are classified:
//! names declared inside the body are locals and ignored; names declared
//! in an enclosing body become captured upvalues; package-qualified and
//! special global names resolve through the stash at runtime and are
//! never captured. The walk descends into nested sub bodies, so a name
//! only used two levels down still surfaces as a capture of this body —
//! that transitivity is what lets every closure find its upvalues in its
//! immediate parent.

use std::rc::Rc;

use camel_value::{CaptureSlot, Sigil};

use crate::ast::{Node, NodeKind};

/// The lexicals visible where a sub expression appears: one level per
/// enclosing body, innermost first, each mapping `(sigil, name)` pairs.
#[derive(Debug, Clone, Default)]
pub struct LexEnv {
    levels: Vec<Vec<(Sigil, Rc<str>)>>,
}

impl LexEnv {
    /// No enclosing bodies (a program's top level).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Extends the chain with the directly enclosing body's visible
    /// lexicals.
    pub fn enclosed_by(&self, visible: Vec<(Sigil, Rc<str>)>) -> Self {
        let mut levels = Vec::with_capacity(self.levels.len() + 1);
        levels.push(visible);
        levels.extend(self.levels.iter().cloned());
        Self { levels }
    }

    /// Innermost enclosing level declaring the name, 1-based.
    fn find(&self, sigil: Sigil, name: &str) -> Option<u16> {
        self.levels.iter().enumerate().find_map(|(at, level)| {
            level
                .iter()
                .any(|(s, n)| *s == sigil && n.as_ref() == name)
                .then_some(at as u16 + 1)
        })
    }
}

/// Walks a sub body and returns its ordered upvalue list.
///
/// `parent_register` is left at its default here; the emitting compiler
/// fills it in when it resolves each name against its own registers.
pub fn analyze(body: &[Node], env: &LexEnv) -> Vec<CaptureSlot> {
    let mut walker = Walker {
        env,
        scopes: vec![Vec::new()],
        captures: Vec::new(),
    };
    for stmt in body {
        walker.walk(stmt);
    }
    walker.captures
}

/// Always resolved through the stash, never captured.
pub fn is_global_name(name: &str) -> bool {
    name.contains("::")
        || matches!(name, "_" | "@" | "!" | "0" | "a" | "b" | "ENV" | "ARGV" | "INC" | "SIG")
        || name.chars().all(|c| c.is_ascii_digit())
        || name.chars().next().is_some_and(|c| !c.is_ascii_alphabetic() && c != '_')
}

struct Walker<'a> {
    env: &'a LexEnv,
    scopes: Vec<Vec<(Sigil, Rc<str>)>>,
    captures: Vec<CaptureSlot>,
}

impl Walker<'_> {
    fn declare(&mut self, sigil: Sigil, name: &str) {
        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .push((sigil, Rc::from(name)));
    }

    fn is_local(&self, sigil: Sigil, name: &str) -> bool {
        self.scopes
            .iter()
            .any(|scope| scope.iter().any(|(s, n)| *s == sigil && n.as_ref() == name))
    }

    fn reference(&mut self, sigil: Sigil, name: &str) {
        if is_global_name(name) || self.is_local(sigil, name) {
            return;
        }
        let Some(depth) = self.env.find(sigil, name) else {
            // Neither lexical nor enclosing: a package variable.
            return;
        };
        let already = self
            .captures
            .iter()
            .any(|c| c.sigil == sigil && c.name.as_ref() == name);
        if !already {
            self.captures.push(CaptureSlot {
                name: Rc::from(name),
                depth,
                sigil,
                parent_register: 0,
            });
        }
    }

    fn walk_all(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.walk(node);
        }
    }

    fn walk_block(&mut self, nodes: &[Node]) {
        self.scopes.push(Vec::new());
        self.walk_all(nodes);
        self.scopes.pop();
    }

    fn walk(&mut self, node: &Node) {
        match &node.kind {
            NodeKind::Number(_) | NodeKind::Str(_) | NodeKind::Undef | NodeKind::Wantarray => {}
            NodeKind::Var { sigil, name } => self.reference(*sigil, name),
            NodeKind::Elem { array, index } => {
                self.walk(array);
                self.walk(index);
            }
            NodeKind::HElem { hash, key } => {
                self.walk(hash);
                self.walk(key);
            }
            NodeKind::My { targets, init, .. } => {
                if let Some(init) = init {
                    // The initializer sees the outer bindings.
                    self.walk(init);
                }
                for (sigil, name) in targets {
                    self.declare(*sigil, name);
                }
            }
            NodeKind::Local { init, .. } => {
                if let Some(init) = init {
                    self.walk(init);
                }
            }
            NodeKind::Assign { target, value } => {
                self.walk(value);
                self.walk(target);
            }
            NodeKind::Binary { lhs, rhs, .. } | NodeKind::Logical { lhs, rhs, .. } => {
                self.walk(lhs);
                self.walk(rhs);
            }
            NodeKind::Unary { operand, .. } => self.walk(operand),
            NodeKind::Ternary { cond, then, els } => {
                self.walk(cond);
                self.walk(then);
                self.walk(els);
            }
            NodeKind::List(items) | NodeKind::ArrayLit(items) | NodeKind::HashLit(items) => {
                self.walk_all(items);
            }
            NodeKind::Block(stmts) | NodeKind::EvalBlock(stmts) => self.walk_block(stmts),
            NodeKind::If { branches, els } => {
                for (cond, body) in branches {
                    self.walk(cond);
                    self.walk_block(body);
                }
                if let Some(els) = els {
                    self.walk_block(els);
                }
            }
            NodeKind::While { cond, body, .. } => {
                self.walk(cond);
                self.walk_block(body);
            }
            NodeKind::For3 {
                init,
                cond,
                step,
                body,
                ..
            } => {
                self.scopes.push(Vec::new());
                if let Some(init) = init {
                    self.walk(init);
                }
                if let Some(cond) = cond {
                    self.walk(cond);
                }
                if let Some(step) = step {
                    self.walk(step);
                }
                self.walk_all(body);
                self.scopes.pop();
            }
            NodeKind::Foreach {
                var,
                declares_var,
                list,
                body,
                ..
            } => {
                self.walk(list);
                self.scopes.push(Vec::new());
                if let (Some(name), true) = (var, *declares_var) {
                    self.declare(Sigil::Scalar, name);
                } else if let Some(name) = var {
                    self.reference(Sigil::Scalar, name);
                }
                self.walk_all(body);
                self.scopes.pop();
            }
            NodeKind::SubDecl { body, .. } | NodeKind::AnonSub { body } => {
                // A nested sub's free names are free here too, unless
                // this body declares them.
                self.walk_block(body);
            }
            NodeKind::Call { args, .. } | NodeKind::FuncOp { args, .. } => {
                self.walk_all(args);
            }
            NodeKind::CallRef { callee, args } => {
                self.walk(callee);
                self.walk_all(args);
            }
            NodeKind::MethodCall {
                invocant, args, ..
            } => {
                self.walk(invocant);
                self.walk_all(args);
            }
            NodeKind::Return(value) => {
                if let Some(value) = value {
                    self.walk(value);
                }
            }
            NodeKind::Last(_) | NodeKind::Next(_) | NodeKind::Redo(_) => {}
            NodeKind::GotoSub(target) => self.walk(target),
            NodeKind::EvalString(expr) => self.walk(expr),
            NodeKind::Package(_) => {}
            NodeKind::TakeRef { operand, .. } | NodeKind::Deref { operand, .. } => {
                self.walk(operand)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build;

    fn file() -> Rc<str> {
        Rc::from("t.pl")
    }

    fn body_using(names: &[&str]) -> Vec<Node> {
        let f = file();
        names
            .iter()
            .map(|n| build::scalar_var(n, &f, 1))
            .collect()
    }

    #[test]
    fn enclosing_lexicals_are_captured() {
        let env = LexEnv::empty()
            .enclosed_by(vec![(Sigil::Scalar, Rc::from("x")), (Sigil::Array, Rc::from("xs"))]);
        let captures = analyze(&body_using(&["x", "y"]), &env);
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].name.as_ref(), "x");
        assert_eq!(captures[0].depth, 1);
        assert_eq!(captures[0].sigil, Sigil::Scalar);
    }

    #[test]
    fn locals_shadow_enclosing_names() {
        let f = file();
        let env = LexEnv::empty().enclosed_by(vec![(Sigil::Scalar, Rc::from("x"))]);
        let body = vec![
            build::at(
                NodeKind::My {
                    targets: vec![(Sigil::Scalar, "x".to_owned())],
                    parenthesized: false,
                    init: None,
                },
                &f,
                1,
            ),
            build::scalar_var("x", &f, 2),
        ];
        assert!(analyze(&body, &env).is_empty());
    }

    #[test]
    fn specials_are_never_captured() {
        let env = LexEnv::empty().enclosed_by(vec![
            (Sigil::Scalar, Rc::from("_")),
            (Sigil::Scalar, Rc::from("1")),
        ]);
        assert!(analyze(&body_using(&["_", "1", "@"]), &env).is_empty());
    }

    #[test]
    fn nested_sub_usage_counts_as_free_here() {
        let f = file();
        let env = LexEnv::empty().enclosed_by(vec![(Sigil::Scalar, Rc::from("x"))]);
        let body = vec![build::at(
            NodeKind::AnonSub {
                body: vec![build::scalar_var("x", &f, 2)],
            },
            &f,
            1,
        )];
        let captures = analyze(&body, &env);
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].name.as_ref(), "x");
    }

    #[test]
    fn depth_counts_enclosing_bodies() {
        let env = LexEnv::empty()
            .enclosed_by(vec![(Sigil::Scalar, Rc::from("outer"))])
            .enclosed_by(vec![(Sigil::Scalar, Rc::from("inner"))]);
        let captures = analyze(&body_using(&["outer", "inner"]), &env);
        let outer = captures.iter().find(|c| c.name.as_ref() == "outer").unwrap();
        let inner = captures.iter().find(|c| c.name.as_ref() == "inner").unwrap();
        assert_eq!(inner.depth, 1);
        assert_eq!(outer.depth, 2);
    }
}
