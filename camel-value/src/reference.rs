//! Strong and weak reference values.
//!
//! References are shared interior-mutable handles; cycles are legal and
//! broken by demoting one edge to a [`WeakReference`], which never keeps
//! its target alive.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::array::{Array, ArrayRef};
use crate::code::CodeValue;
use crate::glob::{Glob, GlobRef};
use crate::hash::{Hash, HashRef};
use crate::io::{FileHandle, IoRef};
use crate::scalar::{Scalar, ScalarRef};

/// What a reference points at.
#[derive(Debug, Clone)]
pub enum RefTarget {
    /// `\$x`
    Scalar(ScalarRef),
    /// `\@x`
    Array(ArrayRef),
    /// `\%x`
    Hash(HashRef),
    /// `\&x`
    Code(Rc<CodeValue>),
    /// `\*x`
    Glob(GlobRef),
    /// A filehandle.
    Io(IoRef),
}

impl RefTarget {
    /// The KIND part of the reference description.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "SCALAR",
            Self::Array(_) => "ARRAY",
            Self::Hash(_) => "HASH",
            Self::Code(_) => "CODE",
            Self::Glob(_) => "GLOB",
            Self::Io(_) => "IO",
        }
    }

    /// Stable address of the shared target, for stringification.
    pub fn address(&self) -> usize {
        match self {
            Self::Scalar(r) => Rc::as_ptr(r) as usize,
            Self::Array(r) => Rc::as_ptr(r) as usize,
            Self::Hash(r) => Rc::as_ptr(r) as usize,
            Self::Code(r) => Rc::as_ptr(r) as *const u8 as usize,
            Self::Glob(r) => Rc::as_ptr(r) as usize,
            Self::Io(r) => Rc::as_ptr(r) as usize,
        }
    }
}

/// A strong reference scalar payload.
#[derive(Debug, Clone)]
pub struct Reference {
    target: RefTarget,
    class: Option<Rc<str>>,
}

impl Reference {
    /// Unblessed reference to a target.
    pub fn new(target: RefTarget) -> Self {
        Self { target, class: None }
    }

    /// Reference to a scalar handle.
    pub fn to_scalar(s: ScalarRef) -> Self {
        Self::new(RefTarget::Scalar(s))
    }

    /// Reference to an array handle.
    pub fn to_array(a: ArrayRef) -> Self {
        Self::new(RefTarget::Array(a))
    }

    /// Reference to a hash handle.
    pub fn to_hash(h: HashRef) -> Self {
        Self::new(RefTarget::Hash(h))
    }

    /// Reference to a code value.
    pub fn to_code(c: Rc<CodeValue>) -> Self {
        Self::new(RefTarget::Code(c))
    }

    /// The referent.
    pub fn target(&self) -> &RefTarget {
        &self.target
    }

    /// The blessed class, if any.
    pub fn class(&self) -> Option<&Rc<str>> {
        self.class.as_ref()
    }

    /// Attaches a class name.
    pub fn bless(&mut self, class: Rc<str>) {
        self.class = Some(class);
    }

    /// `ref()` result: the class when blessed, the kind otherwise.
    pub fn type_name(&self) -> Rc<str> {
        match &self.class {
            Some(class) => Rc::clone(class),
            None => Rc::from(self.target.kind_name()),
        }
    }

    /// Referent address, shared by every handle to the same target.
    pub fn address(&self) -> usize {
        self.target.address()
    }

    /// Canonical stringification: `CLASS=KIND(0xADDR)` when blessed,
    /// `KIND(0xADDR)` otherwise.
    pub fn describe(&self) -> String {
        let kind = self.target.kind_name();
        let addr = self.address();
        match &self.class {
            Some(class) => format!("{class}={kind}(0x{addr:x})"),
            None => format!("{kind}(0x{addr:x})"),
        }
    }

    /// Demote to a weak reference on the same target.
    pub fn downgrade(&self) -> WeakReference {
        let target = match &self.target {
            RefTarget::Scalar(r) => WeakTarget::Scalar(Rc::downgrade(r)),
            RefTarget::Array(r) => WeakTarget::Array(Rc::downgrade(r)),
            RefTarget::Hash(r) => WeakTarget::Hash(Rc::downgrade(r)),
            RefTarget::Code(r) => WeakTarget::Code(Rc::downgrade(r)),
            RefTarget::Glob(r) => WeakTarget::Glob(Rc::downgrade(r)),
            RefTarget::Io(r) => WeakTarget::Io(Rc::downgrade(r)),
        };
        WeakReference {
            target,
            class: self.class.clone(),
        }
    }
}

/// Weak counterpart of [`RefTarget`].
#[derive(Debug, Clone)]
pub enum WeakTarget {
    #[allow(missing_docs)]
    Scalar(Weak<RefCell<Scalar>>),
    #[allow(missing_docs)]
    Array(Weak<RefCell<Array>>),
    #[allow(missing_docs)]
    Hash(Weak<RefCell<Hash>>),
    #[allow(missing_docs)]
    Code(Weak<CodeValue>),
    #[allow(missing_docs)]
    Glob(Weak<RefCell<Glob>>),
    #[allow(missing_docs)]
    Io(Weak<RefCell<FileHandle>>),
}

/// A weak reference scalar payload; never keeps its target alive.
#[derive(Debug, Clone)]
pub struct WeakReference {
    target: WeakTarget,
    class: Option<Rc<str>>,
}

impl WeakReference {
    /// Recover a strong reference while the target is still alive.
    pub fn upgrade(&self) -> Option<Reference> {
        let target = match &self.target {
            WeakTarget::Scalar(w) => RefTarget::Scalar(w.upgrade()?),
            WeakTarget::Array(w) => RefTarget::Array(w.upgrade()?),
            WeakTarget::Hash(w) => RefTarget::Hash(w.upgrade()?),
            WeakTarget::Code(w) => RefTarget::Code(w.upgrade()?),
            WeakTarget::Glob(w) => RefTarget::Glob(w.upgrade()?),
            WeakTarget::Io(w) => RefTarget::Io(w.upgrade()?),
        };
        Some(Reference {
            target,
            class: self.class.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar_ref;

    #[test]
    fn describe_blessed_and_plain() {
        let target = scalar_ref(Scalar::int(1));
        let mut r = Reference::to_scalar(target);
        assert!(r.describe().starts_with("SCALAR(0x"));
        assert_eq!(r.type_name().as_ref(), "SCALAR");

        r.bless(Rc::from("Foo::Bar"));
        assert!(r.describe().starts_with("Foo::Bar=SCALAR(0x"));
        assert_eq!(r.type_name().as_ref(), "Foo::Bar");
    }

    #[test]
    fn weak_reference_dies_with_target() {
        let target = scalar_ref(Scalar::int(1));
        let strong = Reference::to_scalar(Rc::clone(&target));
        let weak = strong.downgrade();
        assert!(weak.upgrade().is_some());

        drop(strong);
        drop(target);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn shared_targets_share_addresses() {
        let target = scalar_ref(Scalar::int(1));
        let a = Reference::to_scalar(Rc::clone(&target));
        let b = Reference::to_scalar(target);
        assert_eq!(a.address(), b.address());
    }
}
