//! Typeglobs: named five-slot containers.

use std::cell::RefCell;
use std::rc::Rc;

use crate::array::ArrayRef;
use crate::code::CodeValue;
use crate::hash::HashRef;
use crate::io::IoRef;
use crate::scalar::ScalarRef;

/// Shared handle to a typeglob.
pub type GlobRef = Rc<RefCell<Glob>>;

/// A named container with one optional slot per value kind.
#[derive(Debug, Clone, Default)]
pub struct Glob {
    name: Rc<str>,
    /// `$name`
    pub scalar: Option<ScalarRef>,
    /// `@name`
    pub array: Option<ArrayRef>,
    /// `%name`
    pub hash: Option<HashRef>,
    /// `&name`
    pub code: Option<Rc<CodeValue>>,
    /// The filehandle slot.
    pub io: Option<IoRef>,
}

impl Glob {
    /// Empty glob with a fully-qualified name.
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Shared handle around an empty named glob.
    pub fn new_ref(name: impl Into<Rc<str>>) -> GlobRef {
        Rc::new(RefCell::new(Self::new(name)))
    }

    /// Fully-qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aliasing assignment (`*x = *y`): adopts every populated slot of
    /// the source, sharing the underlying containers.
    pub fn alias_from(&mut self, other: &Glob) {
        if let Some(s) = &other.scalar {
            self.scalar = Some(Rc::clone(s));
        }
        if let Some(a) = &other.array {
            self.array = Some(Rc::clone(a));
        }
        if let Some(h) = &other.hash {
            self.hash = Some(Rc::clone(h));
        }
        if let Some(c) = &other.code {
            self.code = Some(Rc::clone(c));
        }
        if let Some(io) = &other.io {
            self.io = Some(Rc::clone(io));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::Scalar;
    use crate::scalar_ref;

    #[test]
    fn alias_shares_containers() {
        let mut source = Glob::new("main::x");
        source.scalar = Some(scalar_ref(Scalar::int(5)));

        let mut target = Glob::new("main::y");
        target.alias_from(&source);

        source
            .scalar
            .as_ref()
            .unwrap()
            .borrow_mut()
            .assign(&Scalar::int(9))
            .unwrap();
        assert_eq!(target.scalar.unwrap().borrow().get_int(), 9);
    }

    #[test]
    fn alias_keeps_unrelated_slots() {
        let mut target = Glob::new("main::y");
        target.array = Some(crate::Array::new_ref());

        let source = Glob::new("main::x");
        target.alias_from(&source);
        assert!(target.array.is_some());
    }
}
