//! The Perl array aggregate.

use std::cell::RefCell;
use std::rc::Rc;

use crate::scalar::{Scalar, ScalarRef};
use crate::{scalar_ref, undef_ref};

/// Shared handle to an array.
pub type ArrayRef = Rc<RefCell<Array>>;

/// Ordered sequence of scalar handles.
///
/// Elements are handles, not values: aliasing an element (as `@_` does
/// with caller arguments) lets writes through one handle show up through
/// every other.
#[derive(Debug, Clone, Default)]
pub struct Array {
    elems: Vec<ScalarRef>,
}

impl Array {
    /// Empty array.
    pub fn new() -> Self {
        Self::default()
    }

    /// Array owning fresh handles around the given values.
    pub fn from_scalars(values: Vec<Scalar>) -> Self {
        Self {
            elems: values.into_iter().map(scalar_ref).collect(),
        }
    }

    /// Array sharing the given handles.
    pub fn from_refs(elems: Vec<ScalarRef>) -> Self {
        Self { elems }
    }

    /// Shared handle around an empty array.
    pub fn new_ref() -> ArrayRef {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// `true` when empty.
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Resolve an index, counting from the end when negative.
    fn resolve(&self, index: i64) -> Option<usize> {
        if index >= 0 {
            Some(index as usize)
        } else {
            let back = index.unsigned_abs() as usize;
            self.elems.len().checked_sub(back)
        }
    }

    /// Element handle at an index; `None` out of range.
    pub fn get(&self, index: i64) -> Option<ScalarRef> {
        let at = self.resolve(index)?;
        self.elems.get(at).cloned()
    }

    /// Element handle at an index, extending with undef as needed so the
    /// handle can be written through (lvalue access).
    pub fn get_or_extend(&mut self, index: i64) -> Option<ScalarRef> {
        let at = self.resolve(index)?;
        while self.elems.len() <= at {
            self.elems.push(undef_ref());
        }
        Some(Rc::clone(&self.elems[at]))
    }

    /// Copies a value into the element at an index, autovivifying
    /// intermediate elements.
    pub fn set(&mut self, index: i64, value: &Scalar) -> Result<(), camel_asm::ErrorKind> {
        match self.get_or_extend(index) {
            Some(slot) => slot.borrow_mut().assign(value),
            None => Ok(()),
        }
    }

    /// `exists $a[i]`.
    pub fn exists(&self, index: i64) -> bool {
        self.resolve(index)
            .map(|at| at < self.elems.len())
            .unwrap_or(false)
    }

    /// `delete $a[i]`: vacates the element, shrinking when it was last.
    pub fn delete(&mut self, index: i64) -> Option<ScalarRef> {
        let at = self.resolve(index)?;
        if at >= self.elems.len() {
            return None;
        }
        if at == self.elems.len() - 1 {
            self.elems.pop()
        } else {
            let old = std::mem::replace(&mut self.elems[at], undef_ref());
            Some(old)
        }
    }

    /// Appends handles.
    pub fn push(&mut self, values: impl IntoIterator<Item = ScalarRef>) {
        self.elems.extend(values);
    }

    /// Removes and returns the last handle.
    pub fn pop(&mut self) -> Option<ScalarRef> {
        self.elems.pop()
    }

    /// Removes and returns the first handle.
    pub fn shift(&mut self) -> Option<ScalarRef> {
        if self.elems.is_empty() {
            None
        } else {
            Some(self.elems.remove(0))
        }
    }

    /// Prepends handles, preserving their order.
    pub fn unshift(&mut self, values: Vec<ScalarRef>) {
        self.elems.splice(0..0, values);
    }

    /// `splice @a, off, len, LIST`: replaces the range, returning the
    /// removed handles. Offsets resolve like element indices; the range
    /// is clamped to the array.
    pub fn splice(
        &mut self,
        offset: i64,
        length: i64,
        replacement: Vec<ScalarRef>,
    ) -> Vec<ScalarRef> {
        let len = self.elems.len();
        let start = if offset >= 0 {
            (offset as usize).min(len)
        } else {
            len.saturating_sub(offset.unsigned_abs() as usize)
        };
        let count = if length >= 0 {
            (length as usize).min(len - start)
        } else {
            // Negative length keeps that many trailing elements.
            let keep = length.unsigned_abs() as usize;
            (len - start).saturating_sub(keep)
        };
        self.elems.splice(start..start + count, replacement).collect()
    }

    /// Replaces the whole contents.
    pub fn replace(&mut self, elems: Vec<ScalarRef>) {
        self.elems = elems;
    }

    /// Removes all elements.
    pub fn clear(&mut self) {
        self.elems.clear();
    }

    /// Element handles in order.
    pub fn iter(&self) -> impl Iterator<Item = &ScalarRef> {
        self.elems.iter()
    }

    /// Clones the handle list.
    pub fn to_vec(&self) -> Vec<ScalarRef> {
        self.elems.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(values: &[i64]) -> Array {
        Array::from_scalars(values.iter().copied().map(Scalar::int).collect())
    }

    fn ints(a: &Array) -> Vec<i64> {
        a.iter().map(|s| s.borrow().get_int()).collect()
    }

    #[test]
    fn negative_indexing() {
        let a = nums(&[1, 2, 3]);
        assert_eq!(a.get(-1).unwrap().borrow().get_int(), 3);
        assert_eq!(a.get(-3).unwrap().borrow().get_int(), 1);
        assert!(a.get(-4).is_none());
    }

    #[test]
    fn store_extends_with_undef() {
        let mut a = nums(&[1]);
        a.set(3, &Scalar::int(9)).unwrap();
        assert_eq!(a.len(), 4);
        assert!(!a.get(1).unwrap().borrow().is_defined());
        assert_eq!(a.get(3).unwrap().borrow().get_int(), 9);
    }

    #[test]
    fn delete_shrinks_only_from_the_tail() {
        let mut a = nums(&[1, 2, 3]);
        a.delete(1);
        assert_eq!(a.len(), 3);
        assert!(!a.get(1).unwrap().borrow().is_defined());
        a.delete(2);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn splice_replaces_a_range() {
        let mut a = nums(&[1, 2, 3, 4, 5]);
        let removed = a.splice(
            1,
            2,
            vec![scalar_ref(Scalar::int(9))],
        );
        assert_eq!(removed.len(), 2);
        assert_eq!(ints(&a), vec![1, 9, 4, 5]);
    }

    #[test]
    fn splice_negative_offset_and_length() {
        let mut a = nums(&[1, 2, 3, 4, 5]);
        // Remove from -3 up to keeping the last element.
        let removed = a.splice(-3, -1, vec![]);
        assert_eq!(removed.len(), 2);
        assert_eq!(ints(&a), vec![1, 2, 5]);
    }

    #[test]
    fn aliased_elements_observe_writes() {
        let shared = scalar_ref(Scalar::int(1));
        let a = Array::from_refs(vec![Rc::clone(&shared)]);
        shared.borrow_mut().assign(&Scalar::int(7)).unwrap();
        assert_eq!(a.get(0).unwrap().borrow().get_int(), 7);
    }
}
