//! The Perl hash aggregate.
//!
//! Key order is insertion order, which keeps `keys`/`values`/`each`
//! deterministic; the `each` cursor is per-hash state.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::scalar::{Scalar, ScalarRef};
use crate::{scalar_ref, undef_ref};

/// Shared handle to a hash.
pub type HashRef = Rc<RefCell<Hash>>;

/// String-keyed map of scalar handles.
#[derive(Debug, Clone, Default)]
pub struct Hash {
    map: IndexMap<Rc<str>, ScalarRef>,
    each_pos: usize,
}

impl Hash {
    /// Empty hash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle around an empty hash.
    pub fn new_ref() -> HashRef {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` when empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Value handle for a key.
    pub fn get(&self, key: &str) -> Option<ScalarRef> {
        self.map.get(key).cloned()
    }

    /// Value handle for a key, inserting undef when absent so the handle
    /// can be written through (lvalue access).
    pub fn get_or_insert(&mut self, key: &str) -> ScalarRef {
        if let Some(existing) = self.map.get(key) {
            return Rc::clone(existing);
        }
        let fresh = undef_ref();
        self.map.insert(Rc::from(key), Rc::clone(&fresh));
        fresh
    }

    /// Copies a value under a key.
    pub fn set(&mut self, key: &str, value: &Scalar) -> Result<(), camel_asm::ErrorKind> {
        self.get_or_insert(key).borrow_mut().assign(value)
    }

    /// Shares a handle under a key (aliasing store).
    pub fn set_ref(&mut self, key: &str, value: ScalarRef) {
        self.map.insert(Rc::from(key), value);
    }

    /// `exists $h{k}`.
    pub fn exists(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// `delete $h{k}`, returning the removed handle.
    ///
    /// Uses the order-preserving removal so iteration order of the
    /// surviving entries is unchanged.
    pub fn delete(&mut self, key: &str) -> Option<ScalarRef> {
        let removed = self.map.shift_remove(key);
        if removed.is_some() {
            self.each_pos = 0;
        }
        removed
    }

    /// Keys in insertion order. Resets the `each` cursor, as enumerating
    /// the whole hash does.
    pub fn keys(&mut self) -> Vec<Rc<str>> {
        self.each_pos = 0;
        self.map.keys().cloned().collect()
    }

    /// Values in insertion order. Resets the `each` cursor.
    pub fn values(&mut self) -> Vec<ScalarRef> {
        self.each_pos = 0;
        self.map.values().cloned().collect()
    }

    /// One `(key, value)` step of the per-hash iterator; `None` at the
    /// end, after which the cursor rewinds.
    pub fn each(&mut self) -> Option<(Rc<str>, ScalarRef)> {
        match self.map.get_index(self.each_pos) {
            Some((k, v)) => {
                self.each_pos += 1;
                Some((Rc::clone(k), Rc::clone(v)))
            }
            None => {
                self.each_pos = 0;
                None
            }
        }
    }

    /// Replaces the whole contents from a flat key/value list.
    pub fn replace_from_pairs(&mut self, pairs: Vec<(Rc<str>, ScalarRef)>) {
        self.map.clear();
        self.each_pos = 0;
        for (k, v) in pairs {
            self.map.insert(k, v);
        }
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.map.clear();
        self.each_pos = 0;
    }

    /// Entry iterator in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &ScalarRef)> {
        self.map.iter()
    }
}

/// Builds a hash from an even-length list the way list assignment does:
/// later duplicates win, order of first insertion is kept.
pub fn hash_from_list(values: Vec<ScalarRef>) -> Hash {
    let mut hash = Hash::new();
    let mut it = values.into_iter();
    while let Some(key) = it.next() {
        let key_str = key.borrow().get_string();
        let value = it
            .next()
            .unwrap_or_else(|| scalar_ref(Scalar::undef()));
        // Re-point an existing entry rather than re-inserting, keeping
        // the first occurrence's position.
        if hash.exists(&key_str) {
            let slot = hash.get_or_insert(&key_str);
            let value = value.borrow().clone();
            let _ = slot.borrow_mut().assign(&value);
        } else {
            hash.set_ref(&key_str, value);
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_preserved() {
        let mut h = Hash::new();
        for key in ["one", "two", "three"] {
            h.set(key, &Scalar::int(1)).unwrap();
        }
        let keys: Vec<_> = h.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["one", "two", "three"]);
    }

    #[test]
    fn each_walks_once_then_rewinds() {
        let mut h = Hash::new();
        h.set("a", &Scalar::int(1)).unwrap();
        h.set("b", &Scalar::int(2)).unwrap();

        let mut seen = Vec::new();
        while let Some((k, _)) = h.each() {
            seen.push(k.to_string());
        }
        assert_eq!(seen, vec!["a", "b"]);
        // Cursor rewound; a new walk starts from the beginning.
        assert_eq!(h.each().unwrap().0.as_ref(), "a");
    }

    #[test]
    fn delete_keeps_survivor_order() {
        let mut h = Hash::new();
        for key in ["a", "b", "c"] {
            h.set(key, &Scalar::int(0)).unwrap();
        }
        h.delete("b");
        let keys: Vec<_> = h.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn pairs_with_duplicate_keys_keep_first_position() {
        let mut h = hash_from_list(vec![
            scalar_ref(Scalar::str("x")),
            scalar_ref(Scalar::int(1)),
            scalar_ref(Scalar::str("y")),
            scalar_ref(Scalar::int(2)),
            scalar_ref(Scalar::str("x")),
            scalar_ref(Scalar::int(3)),
        ]);
        assert_eq!(h.get("x").unwrap().borrow().get_int(), 3);
        let keys: Vec<_> = h.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["x", "y"]);
    }
}
