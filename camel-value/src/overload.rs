//! Per-class operator overload tables.
//!
//! A blessed reference whose class installed overload entries routes
//! binary operators through these tables before the default
//! numeric/string behavior. Dispatch order is the left operand's class,
//! then the right's, then an installed `nomethod`, then the default.

use std::rc::Rc;

use hashbrown::HashMap;

use crate::code::CodeValue;

/// Overloadable operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OverloadOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    Concat,
    Repeat,
    NumEq,
    NumNe,
    NumLt,
    NumGt,
    NumLe,
    NumGe,
    NumCmp,
    StrEq,
    StrNe,
    StrLt,
    StrGt,
    StrLe,
    StrGe,
    StrCmp,
    /// `bool` conversion.
    Bool,
    /// `""` conversion.
    Stringify,
    /// `0+` conversion.
    Numify,
    /// `${}` dereference.
    DerefScalar,
    /// `@{}` dereference.
    DerefArray,
    /// `%{}` dereference.
    DerefHash,
    /// `&{}` dereference.
    DerefCode,
    /// Last-resort handler consulted when the operator itself is absent.
    Nomethod,
}

impl OverloadOp {
    /// The key as written in an `use overload` list.
    pub fn symbol(self) -> &'static str {
        use OverloadOp::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Mod => "%",
            Pow => "**",
            Neg => "neg",
            Concat => ".",
            Repeat => "x",
            NumEq => "==",
            NumNe => "!=",
            NumLt => "<",
            NumGt => ">",
            NumLe => "<=",
            NumGe => ">=",
            NumCmp => "<=>",
            StrEq => "eq",
            StrNe => "ne",
            StrLt => "lt",
            StrGt => "gt",
            StrLe => "le",
            StrGe => "ge",
            StrCmp => "cmp",
            Bool => "bool",
            Stringify => "\"\"",
            Numify => "0+",
            DerefScalar => "${}",
            DerefArray => "@{}",
            DerefHash => "%{}",
            DerefCode => "&{}",
            Nomethod => "nomethod",
        }
    }

    /// Parses an `use overload` key.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        use OverloadOp::*;
        Some(match symbol {
            "+" => Add,
            "-" => Sub,
            "*" => Mul,
            "/" => Div,
            "%" => Mod,
            "**" => Pow,
            "neg" => Neg,
            "." => Concat,
            "x" => Repeat,
            "==" => NumEq,
            "!=" => NumNe,
            "<" => NumLt,
            ">" => NumGt,
            "<=" => NumLe,
            ">=" => NumGe,
            "<=>" => NumCmp,
            "eq" => StrEq,
            "ne" => StrNe,
            "lt" => StrLt,
            "gt" => StrGt,
            "le" => StrLe,
            "ge" => StrGe,
            "cmp" => StrCmp,
            "bool" => Bool,
            "\"\"" => Stringify,
            "0+" => Numify,
            "${}" => DerefScalar,
            "@{}" => DerefArray,
            "%{}" => DerefHash,
            "&{}" => DerefCode,
            "nomethod" => Nomethod,
            _ => return None,
        })
    }
}

/// The overload entries one class installed.
#[derive(Debug, Clone, Default)]
pub struct OverloadTable {
    entries: HashMap<OverloadOp, Rc<CodeValue>>,
}

impl OverloadTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces a handler.
    pub fn install(&mut self, op: OverloadOp, handler: Rc<CodeValue>) {
        self.entries.insert(op, handler);
    }

    /// Handler for an operator, if installed.
    pub fn get(&self, op: OverloadOp) -> Option<&Rc<CodeValue>> {
        self.entries.get(&op)
    }

    /// The `nomethod` fallback, if installed.
    pub fn nomethod(&self) -> Option<&Rc<CodeValue>> {
        self.entries.get(&OverloadOp::Nomethod)
    }

    /// `true` when no handlers are installed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_round_trip() {
        for op in [
            OverloadOp::Add,
            OverloadOp::Concat,
            OverloadOp::NumCmp,
            OverloadOp::Stringify,
            OverloadOp::DerefHash,
            OverloadOp::Nomethod,
        ] {
            assert_eq!(OverloadOp::from_symbol(op.symbol()), Some(op));
        }
        assert_eq!(OverloadOp::from_symbol("~~"), None);
    }
}
