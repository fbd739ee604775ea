//! The package stash: process-wide named storage.
//!
//! Fully-qualified names map to typeglobs with up to five slots. Sub
//! registration, glob aliasing, `local` dynamic bindings, and MRO-cached
//! method lookup all live here. "Process-wide" means per interpreter
//! instance; nothing here is host-global.

use std::rc::Rc;

use camel_asm::ErrorKind;
use camel_value::{
    Array, ArrayRef, CodeValue, Glob, GlobRef, Hash, HashRef, OverloadOp, OverloadTable,
    Scalar, ScalarRef, Sigil,
};
use hashbrown::HashMap;

use crate::error::VmError;

/// A saved dynamic binding, restored when its `local` goes out of scope.
#[derive(Debug)]
struct LocalSave {
    name: Rc<str>,
    saved: SavedBinding,
}

#[derive(Debug)]
enum SavedBinding {
    Scalar(Option<ScalarRef>),
    Array(Option<ArrayRef>),
    Hash(Option<HashRef>),
}

/// Name → typeglob storage with the caches hanging off it.
#[derive(Debug, Default)]
pub struct Stash {
    globs: HashMap<Rc<str>, GlobRef>,
    mro_cache: HashMap<Rc<str>, Rc<Vec<Rc<str>>>>,
    method_cache: HashMap<(Rc<str>, Rc<str>), Option<Rc<CodeValue>>>,
    overloads: HashMap<Rc<str>, OverloadTable>,
    locals: Vec<LocalSave>,
}

impl Stash {
    /// Empty stash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Qualifies a name against a package: already-qualified names pass
    /// through, punctuation and all-caps handle names live in `main`.
    pub fn qualify(package: &str, name: &str) -> Rc<str> {
        if name.contains("::") {
            return Rc::from(name);
        }
        if is_special_name(name) {
            return Rc::from(format!("main::{name}").as_str());
        }
        Rc::from(format!("{package}::{name}").as_str())
    }

    /// The glob for a fully-qualified name, created on first touch.
    pub fn glob(&mut self, name: &str) -> GlobRef {
        if let Some(existing) = self.globs.get(name) {
            return Rc::clone(existing);
        }
        let fresh = Glob::new_ref(name);
        self.globs.insert(Rc::from(name), Rc::clone(&fresh));
        fresh
    }

    /// The glob for a name, if it exists.
    pub fn lookup_glob(&self, name: &str) -> Option<GlobRef> {
        self.globs.get(name).cloned()
    }

    /// Scalar slot, autovivified.
    pub fn scalar_slot(&mut self, name: &str) -> ScalarRef {
        let glob = self.glob(name);
        let mut glob = glob.borrow_mut();
        match &glob.scalar {
            Some(s) => Rc::clone(s),
            None => {
                let fresh = camel_value::undef_ref();
                glob.scalar = Some(Rc::clone(&fresh));
                fresh
            }
        }
    }

    /// Array slot, autovivified.
    pub fn array_slot(&mut self, name: &str) -> ArrayRef {
        let glob = self.glob(name);
        let mut glob = glob.borrow_mut();
        match &glob.array {
            Some(a) => Rc::clone(a),
            None => {
                let fresh = Array::new_ref();
                glob.array = Some(Rc::clone(&fresh));
                fresh
            }
        }
    }

    /// Hash slot, autovivified.
    pub fn hash_slot(&mut self, name: &str) -> HashRef {
        let glob = self.glob(name);
        let mut glob = glob.borrow_mut();
        match &glob.hash {
            Some(h) => Rc::clone(h),
            None => {
                let fresh = Hash::new_ref();
                glob.hash = Some(Rc::clone(&fresh));
                fresh
            }
        }
    }

    /// Code slot, when populated.
    pub fn code_slot(&self, name: &str) -> Option<Rc<CodeValue>> {
        self.globs
            .get(name)
            .and_then(|g| g.borrow().code.as_ref().cloned())
    }

    /// Copies a value into a package scalar.
    pub fn set_scalar(&mut self, name: &str, value: &Scalar) -> Result<(), ErrorKind> {
        self.scalar_slot(name).borrow_mut().assign(value)
    }

    /// Installs a code value under a fully-qualified name.
    ///
    /// Any sub (re)definition can shadow a cached method resolution, so
    /// the method cache is dropped wholesale.
    pub fn set_code(&mut self, name: &str, code: Rc<CodeValue>) {
        let glob = self.glob(name);
        glob.borrow_mut().code = Some(code);
        self.method_cache.clear();
    }

    /// Replaces a package array's contents, invalidating MRO state when
    /// an `@ISA` was written.
    pub fn set_array_contents(&mut self, name: &str, elems: Vec<ScalarRef>) {
        self.array_slot(name).borrow_mut().replace(elems);
        if name.ends_with("::ISA") {
            self.invalidate_mro();
        }
    }

    /// Typeglob aliasing: `*target = *source`.
    pub fn alias_glob(&mut self, target: &str, source: &str) {
        let source = self.glob(source);
        let target = self.glob(target);
        let source = source.borrow();
        target.borrow_mut().alias_from(&source);
        // An alias can rebind @ISA or a method name.
        self.invalidate_mro();
    }

    /// Drops every MRO-derived cache. Called on any `@ISA` mutation.
    pub fn invalidate_mro(&mut self) {
        self.mro_cache.clear();
        self.method_cache.clear();
    }

    /* MRO */

    /// C3 linearization of a class, cached until `@ISA` changes.
    pub fn mro(&mut self, class: &str) -> Result<Rc<Vec<Rc<str>>>, VmError> {
        if let Some(cached) = self.mro_cache.get(class) {
            return Ok(Rc::clone(cached));
        }
        let mut visiting = Vec::new();
        let linear = self.linearize(&Rc::from(class), &mut visiting)?;
        self.mro_cache.insert(Rc::from(class), Rc::clone(&linear));
        Ok(linear)
    }

    fn parents(&self, class: &str) -> Vec<Rc<str>> {
        let name = format!("{class}::ISA");
        match self.lookup_glob(&name).and_then(|g| g.borrow().array.clone()) {
            Some(isa) => isa
                .borrow()
                .iter()
                .map(|s| s.borrow().get_string())
                .collect(),
            None => Vec::new(),
        }
    }

    fn linearize(
        &self,
        class: &Rc<str>,
        visiting: &mut Vec<Rc<str>>,
    ) -> Result<Rc<Vec<Rc<str>>>, VmError> {
        if visiting.iter().any(|c| c == class) {
            return Err(VmError::new(
                ErrorKind::Die,
                format!("Recursive inheritance detected in package '{class}'\n"),
            ));
        }
        visiting.push(Rc::clone(class));

        let parents = self.parents(class);
        let mut sequences: Vec<Vec<Rc<str>>> = Vec::new();
        for parent in &parents {
            sequences.push(self.linearize(parent, visiting)?.as_ref().clone());
        }
        sequences.push(parents.clone());
        visiting.pop();

        let mut result = vec![Rc::clone(class)];
        result.extend(c3_merge(sequences, class)?);
        Ok(Rc::new(result))
    }

    /// Method resolution through the MRO, cached per (class, method).
    pub fn lookup_method(
        &mut self,
        class: &str,
        method: &str,
    ) -> Result<Option<Rc<CodeValue>>, VmError> {
        let key = (Rc::from(class), Rc::from(method));
        if let Some(cached) = self.method_cache.get(&key) {
            return Ok(cached.clone());
        }
        let mro = self.mro(class)?;
        let mut found = None;
        for ancestor in mro.iter() {
            if let Some(code) = self.code_slot(&format!("{ancestor}::{method}")) {
                found = Some(code);
                break;
            }
        }
        self.method_cache.insert(key, found.clone());
        Ok(found)
    }

    /// `SUPER::method` resolution, relative to the calling class's MRO.
    pub fn lookup_super_method(
        &mut self,
        calling_class: &str,
        method: &str,
    ) -> Result<Option<Rc<CodeValue>>, VmError> {
        let mro = self.mro(calling_class)?;
        for ancestor in mro.iter().skip(1) {
            if let Some(code) = self.code_slot(&format!("{ancestor}::{method}")) {
                return Ok(Some(code));
            }
        }
        Ok(None)
    }

    /* OVERLOAD */

    /// Installs an overload handler for a class.
    pub fn install_overload(&mut self, class: &str, op: OverloadOp, handler: Rc<CodeValue>) {
        self.overloads
            .entry(Rc::from(class))
            .or_default()
            .install(op, handler);
    }

    /// `true` when the class (or an ancestor) installed any overloads.
    pub fn has_overloads(&mut self, class: &str) -> bool {
        if self.overloads.contains_key(class) {
            return true;
        }
        match self.mro(class) {
            Ok(mro) => mro.iter().any(|c| self.overloads.contains_key(c.as_ref())),
            Err(_) => false,
        }
    }

    /// Resolves an overload handler through the class's MRO.
    pub fn resolve_overload(&mut self, class: &str, op: OverloadOp) -> Option<Rc<CodeValue>> {
        if let Some(found) = self.overloads.get(class).and_then(|t| t.get(op)) {
            return Some(Rc::clone(found));
        }
        let mro = self.mro(class).ok()?;
        for ancestor in mro.iter().skip(1) {
            if let Some(found) = self
                .overloads
                .get(ancestor.as_ref())
                .and_then(|t| t.get(op))
            {
                return Some(Rc::clone(found));
            }
        }
        None
    }

    /* LOCAL */

    /// Current `local` stack depth, for unwind watermarks.
    pub fn local_depth(&self) -> usize {
        self.locals.len()
    }

    /// `local` a package variable: save the current slot and install a
    /// fresh one.
    pub fn local_save(&mut self, name: &str, sigil: Sigil) {
        let glob = self.glob(name);
        let mut glob = glob.borrow_mut();
        let saved = match sigil {
            Sigil::Scalar => {
                let old = glob.scalar.take();
                glob.scalar = Some(camel_value::undef_ref());
                SavedBinding::Scalar(old)
            }
            Sigil::Array => {
                let old = glob.array.take();
                glob.array = Some(Array::new_ref());
                SavedBinding::Array(old)
            }
            Sigil::Hash => {
                let old = glob.hash.take();
                glob.hash = Some(Hash::new_ref());
                SavedBinding::Hash(old)
            }
        };
        self.locals.push(LocalSave {
            name: Rc::from(name),
            saved,
        });
    }

    /// Restores the `n` most recent dynamic bindings.
    pub fn local_restore(&mut self, n: usize) {
        for _ in 0..n {
            let Some(save) = self.locals.pop() else { break };
            self.restore_one(save);
        }
    }

    /// Restores down to a watermark; used when unwinding past frames.
    pub fn unwind_locals(&mut self, watermark: usize) {
        while self.locals.len() > watermark {
            let save = self.locals.pop().expect("len checked");
            self.restore_one(save);
        }
    }

    fn restore_one(&mut self, save: LocalSave) {
        let glob = self.glob(&save.name);
        let mut glob = glob.borrow_mut();
        match save.saved {
            SavedBinding::Scalar(old) => glob.scalar = old,
            SavedBinding::Array(old) => {
                let is_isa = save.name.ends_with("::ISA");
                glob.array = old;
                if is_isa {
                    drop(glob);
                    self.invalidate_mro();
                }
            }
            SavedBinding::Hash(old) => glob.hash = old,
        }
    }
}

/// Punctuation variables and bareword handles always live in `main`.
fn is_special_name(name: &str) -> bool {
    matches!(
        name,
        "_" | "@" | "!" | "0" | "a" | "b" | "ARGV" | "ENV" | "INC" | "SIG" | "STDIN"
            | "STDOUT" | "STDERR"
    ) || name.chars().all(|c| c.is_ascii_digit())
        || name.chars().next().is_some_and(|c| !c.is_ascii_alphabetic() && c != '_')
}

/// C3 merge of parent linearizations.
fn c3_merge(
    mut sequences: Vec<Vec<Rc<str>>>,
    class: &str,
) -> Result<Vec<Rc<str>>, VmError> {
    let mut result = Vec::new();
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Ok(result);
        }
        // A head is good when it appears in no other sequence's tail.
        let candidate = sequences
            .iter()
            .map(|s| &s[0])
            .find(|head| {
                sequences
                    .iter()
                    .all(|s| !s[1..].iter().any(|c| c == *head))
            })
            .cloned();
        match candidate {
            Some(head) => {
                result.push(Rc::clone(&head));
                for s in sequences.iter_mut() {
                    if s[0] == head {
                        s.remove(0);
                    }
                }
            }
            None => {
                return Err(VmError::new(
                    ErrorKind::Die,
                    format!(
                        "Inconsistent hierarchy during C3 merge of class '{class}'\n"
                    ),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_isa(stash: &mut Stash, class: &str, parents: &[&str]) {
        let elems = parents
            .iter()
            .map(|p| camel_value::scalar_ref(Scalar::str(*p)))
            .collect();
        stash.set_array_contents(&format!("{class}::ISA"), elems);
    }

    fn host_sub(tag: i64) -> Rc<CodeValue> {
        CodeValue::from_host(Rc::new(move |_args, _ctx| {
            Ok(camel_value::Slot::Scalar(camel_value::scalar_ref(
                Scalar::int(tag),
            )))
        }))
    }

    #[test]
    fn qualification_rules() {
        assert_eq!(Stash::qualify("Foo", "bar").as_ref(), "Foo::bar");
        assert_eq!(Stash::qualify("Foo", "Baz::qux").as_ref(), "Baz::qux");
        assert_eq!(Stash::qualify("Foo", "_").as_ref(), "main::_");
        assert_eq!(Stash::qualify("Foo", "@").as_ref(), "main::@");
        assert_eq!(Stash::qualify("Foo", "1").as_ref(), "main::1");
        assert_eq!(Stash::qualify("Foo", "ENV").as_ref(), "main::ENV");
    }

    #[test]
    fn c3_diamond() {
        let mut stash = Stash::new();
        set_isa(&mut stash, "D", &["B", "C"]);
        set_isa(&mut stash, "B", &["A"]);
        set_isa(&mut stash, "C", &["A"]);

        let mro = stash.mro("D").unwrap();
        let names: Vec<_> = mro.iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["D", "B", "C", "A"]);
    }

    #[test]
    fn mro_cache_invalidated_on_isa_write() {
        let mut stash = Stash::new();
        set_isa(&mut stash, "B", &["A"]);
        assert_eq!(stash.mro("B").unwrap().len(), 2);

        set_isa(&mut stash, "B", &["A", "C"]);
        let names: Vec<_> = stash.mro("B").unwrap().iter().map(|c| c.to_string()).collect();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn method_resolution_walks_ancestors() {
        let mut stash = Stash::new();
        set_isa(&mut stash, "B", &["A"]);
        stash.set_code("A::speak", host_sub(1));

        let found = stash.lookup_method("B", "speak").unwrap();
        assert!(found.is_some());
        // Shadow in the subclass; the registration dropped the cache.
        stash.set_code("B::speak", host_sub(2));
        let again = stash.lookup_method("B", "speak").unwrap().unwrap();
        let one = stash.code_slot("B::speak").unwrap();
        assert!(Rc::ptr_eq(&again, &one));
    }

    #[test]
    fn super_skips_the_class_itself() {
        let mut stash = Stash::new();
        set_isa(&mut stash, "B", &["A"]);
        stash.set_code("A::speak", host_sub(1));
        stash.set_code("B::speak", host_sub(2));

        let found = stash.lookup_super_method("B", "speak").unwrap().unwrap();
        let parent = stash.code_slot("A::speak").unwrap();
        assert!(Rc::ptr_eq(&found, &parent));
    }

    #[test]
    fn recursive_isa_is_an_error() {
        let mut stash = Stash::new();
        set_isa(&mut stash, "A", &["B"]);
        set_isa(&mut stash, "B", &["A"]);
        assert!(stash.mro("A").is_err());
    }

    #[test]
    fn local_save_and_restore() {
        let mut stash = Stash::new();
        stash.set_scalar("main::x", &Scalar::int(1)).unwrap();
        let outer = stash.scalar_slot("main::x");

        stash.local_save("main::x", Sigil::Scalar);
        stash.set_scalar("main::x", &Scalar::int(99)).unwrap();
        assert_eq!(stash.scalar_slot("main::x").borrow().get_int(), 99);
        // The saved container is untouched.
        assert_eq!(outer.borrow().get_int(), 1);

        stash.local_restore(1);
        assert_eq!(stash.scalar_slot("main::x").borrow().get_int(), 1);
    }

    #[test]
    fn unwind_restores_to_watermark() {
        let mut stash = Stash::new();
        stash.set_scalar("main::x", &Scalar::int(1)).unwrap();
        let mark = stash.local_depth();
        stash.local_save("main::x", Sigil::Scalar);
        stash.local_save("main::y", Sigil::Scalar);
        stash.unwind_locals(mark);
        assert_eq!(stash.local_depth(), mark);
        assert_eq!(stash.scalar_slot("main::x").borrow().get_int(), 1);
    }
}
