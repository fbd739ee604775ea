//! The tagged polymorphic Perl scalar.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use camel_asm::ErrorKind;

use crate::array::ArrayRef;
use crate::code::CodeValue;
use crate::coerce;
use crate::control::ControlFlow;
use crate::glob::GlobRef;
use crate::hash::HashRef;
use crate::reference::{Reference, WeakReference};

bitflags::bitflags! {
    /// Per-scalar state bits, independent of the active tag.
    pub struct ScalarFlags: u8 {
        /// Mutation attempts fail with [`ErrorKind::ReadOnly`].
        const READONLY = 0x01;
        /// The string payload carries character (not byte) semantics.
        const UTF8 = 0x02;
        /// Both views of an explicitly constructed dualvar are live.
        const DUALVAR = 0x04;
    }
}

/// Cached numeric interpretation of a string payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumView {
    /// The numeric view is integral.
    Int(i64),
    /// The numeric view needs a double.
    Double(f64),
}

impl NumView {
    /// Integer projection, truncating toward zero.
    pub fn as_int(self) -> i64 {
        match self {
            Self::Int(i) => i,
            Self::Double(d) => coerce::double_to_int(d),
        }
    }

    /// Floating projection.
    pub fn as_double(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Double(d) => d,
        }
    }
}

/// Handle to a compiled regular expression.
///
/// The regex engine itself is an external collaborator; the core only
/// moves the handle around and surfaces it through `ref()` as `Regexp`.
#[derive(Debug, Clone)]
pub struct RegexValue {
    /// Source pattern text.
    pub pattern: Rc<str>,
    /// Modifier letters as written.
    pub flags: Rc<str>,
}

/// A scalar whose reads and writes are routed through user-supplied
/// methods. Dispatch happens in the interpreter; the value model only
/// stores the tied object.
#[derive(Debug, Clone)]
pub struct TiedScalar {
    /// The blessed object implementing the tie protocol.
    pub handler: Scalar,
}

/// Active tag and payload of a [`Scalar`].
#[derive(Debug, Clone)]
pub enum ScalarValue {
    /// The unique undefined value.
    Undef,
    /// 64-bit signed integer.
    Int(i64),
    /// IEEE-754 double, NaN and infinities included.
    Double(f64),
    /// Immutable string payload.
    Str(Rc<str>),
    /// Distinct from `Int` 0/1 so `is_bool` can tell them apart.
    Bool(bool),
    /// Version-string literal; compares bytewise.
    VString(Rc<str>),
    /// A code value, as found in typeglob code slots.
    Code(Rc<CodeValue>),
    /// A typeglob handle.
    Glob(GlobRef),
    /// A compiled-regex handle.
    Regex(Rc<RegexValue>),
    /// Strong reference, optionally blessed.
    Ref(Reference),
    /// Weak reference; reads as undef once the target is gone.
    WeakRef(WeakReference),
    /// Reads and writes dispatch through the tied handler.
    Tied(Rc<RefCell<TiedScalar>>),
    /// Non-local control-flow signal travelling up the interpreter stack.
    ControlFlow(ControlFlow),
}

/// Shared, interior-mutable handle to a scalar.
///
/// Registers, aggregate elements, and closure captures all share scalars
/// through this handle, which is what makes `@_` aliasing and closure
/// capture semantics fall out naturally.
pub type ScalarRef = Rc<RefCell<Scalar>>;

/// A register or capture slot: scalars, arrays, and hashes are the three
/// shapes a lexical can take.
#[derive(Debug, Clone)]
pub enum Slot {
    /// A `$scalar` slot.
    Scalar(ScalarRef),
    /// An `@array` slot.
    Array(ArrayRef),
    /// A `%hash` slot.
    Hash(HashRef),
}

impl Slot {
    /// Fresh slot holding an undefined scalar.
    pub fn fresh() -> Self {
        Self::Scalar(crate::undef_ref())
    }

    /// The scalar handle, if this slot holds one.
    pub fn as_scalar(&self) -> Option<&ScalarRef> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// The array handle, if this slot holds one.
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The hash handle, if this slot holds one.
    pub fn as_hash(&self) -> Option<&HashRef> {
        match self {
            Self::Hash(h) => Some(h),
            _ => None,
        }
    }
}

/// The unit polymorphic Perl value.
#[derive(Debug, Clone)]
pub struct Scalar {
    value: ScalarValue,
    num_cache: Cell<Option<NumView>>,
    flags: ScalarFlags,
}

impl Default for Scalar {
    fn default() -> Self {
        Self::undef()
    }
}

impl Scalar {
    /// The undefined value.
    pub fn undef() -> Self {
        Self::from_value(ScalarValue::Undef)
    }

    /// Integer scalar.
    pub fn int(i: i64) -> Self {
        Self::from_value(ScalarValue::Int(i))
    }

    /// Double scalar.
    pub fn double(d: f64) -> Self {
        Self::from_value(ScalarValue::Double(d))
    }

    /// String scalar.
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::from_value(ScalarValue::Str(s.into()))
    }

    /// Boolean scalar.
    pub fn bool_(b: bool) -> Self {
        Self::from_value(ScalarValue::Bool(b))
    }

    /// Version-string scalar.
    pub fn vstring(s: impl Into<Rc<str>>) -> Self {
        Self::from_value(ScalarValue::VString(s.into()))
    }

    /// Code-value scalar.
    pub fn code(code: Rc<CodeValue>) -> Self {
        Self::from_value(ScalarValue::Code(code))
    }

    /// Typeglob scalar.
    pub fn glob(glob: GlobRef) -> Self {
        Self::from_value(ScalarValue::Glob(glob))
    }

    /// Compiled-regex scalar.
    pub fn regex(pattern: impl Into<Rc<str>>, flags: impl Into<Rc<str>>) -> Self {
        Self::from_value(ScalarValue::Regex(Rc::new(RegexValue {
            pattern: pattern.into(),
            flags: flags.into(),
        })))
    }

    /// Strong reference scalar.
    pub fn reference(r: Reference) -> Self {
        Self::from_value(ScalarValue::Ref(r))
    }

    /// Weak reference scalar.
    pub fn weak(w: WeakReference) -> Self {
        Self::from_value(ScalarValue::WeakRef(w))
    }

    /// Control-flow signal scalar.
    pub fn control(cf: ControlFlow) -> Self {
        Self::from_value(ScalarValue::ControlFlow(cf))
    }

    /// Explicit dualvar: both views stay live until a mutating op.
    pub fn dualvar(num: NumView, s: impl Into<Rc<str>>) -> Self {
        Self {
            value: ScalarValue::Str(s.into()),
            num_cache: Cell::new(Some(num)),
            flags: ScalarFlags::DUALVAR,
        }
    }

    fn from_value(value: ScalarValue) -> Self {
        Self {
            value,
            num_cache: Cell::new(None),
            flags: ScalarFlags::empty(),
        }
    }

    /// Active tag and payload.
    pub fn value(&self) -> &ScalarValue {
        &self.value
    }

    /// State bits.
    pub fn flags(&self) -> ScalarFlags {
        self.flags
    }

    /// `true` when the read-only bit is set.
    pub fn is_readonly(&self) -> bool {
        self.flags.contains(ScalarFlags::READONLY)
    }

    /// Marks the scalar read-only.
    pub fn lock_readonly(&mut self) {
        self.flags.insert(ScalarFlags::READONLY);
    }

    /// Clears the read-only bit.
    pub fn unlock_readonly(&mut self) {
        self.flags.remove(ScalarFlags::READONLY);
    }

    /// `true` unless the tag is `Undef` (or a dead weak reference).
    pub fn is_defined(&self) -> bool {
        match &self.value {
            ScalarValue::Undef => false,
            ScalarValue::WeakRef(w) => w.upgrade().is_some(),
            _ => true,
        }
    }

    /// `true` only for the distinguished boolean values.
    pub fn is_bool(&self) -> bool {
        matches!(self.value, ScalarValue::Bool(_))
    }

    /// `true` when this scalar carries a non-local control-flow signal.
    pub fn is_control_flow(&self) -> bool {
        matches!(self.value, ScalarValue::ControlFlow(_))
    }

    /// The control-flow payload, if any.
    pub fn control_flow(&self) -> Option<&ControlFlow> {
        match &self.value {
            ScalarValue::ControlFlow(cf) => Some(cf),
            _ => None,
        }
    }

    /// Cached numeric view, if one is live.
    pub fn num_cache(&self) -> Option<NumView> {
        self.num_cache.get()
    }

    /// Replaces the payload, failing on read-only scalars and dropping
    /// any cached numeric view.
    pub fn set_value(&mut self, value: ScalarValue) -> Result<(), ErrorKind> {
        if self.is_readonly() {
            return Err(ErrorKind::ReadOnly);
        }
        self.value = value;
        self.num_cache.set(None);
        self.flags.remove(ScalarFlags::DUALVAR);
        Ok(())
    }

    /// Assignment: copies the source's payload and live views, keeping
    /// this scalar's identity (and its shared handle) intact.
    pub fn assign(&mut self, src: &Scalar) -> Result<(), ErrorKind> {
        if self.is_readonly() {
            return Err(ErrorKind::ReadOnly);
        }
        self.value = src.value.clone();
        self.num_cache.set(src.num_cache.get());
        self.flags = src.flags & !ScalarFlags::READONLY;
        Ok(())
    }

    /// Integer view. Strings parse a leading signed number and truncate
    /// toward zero; the parse is cached so the dualvar views stay in sync.
    pub fn get_int(&self) -> i64 {
        match &self.value {
            ScalarValue::Undef => 0,
            ScalarValue::Int(i) => *i,
            ScalarValue::Double(d) => coerce::double_to_int(*d),
            ScalarValue::Str(s) | ScalarValue::VString(s) => self.cached_num(s).as_int(),
            ScalarValue::Bool(b) => *b as i64,
            ScalarValue::Ref(r) => r.address() as i64,
            ScalarValue::WeakRef(w) => {
                w.upgrade().map(|r| r.address() as i64).unwrap_or(0)
            }
            ScalarValue::Code(c) => Rc::as_ptr(c) as i64,
            _ => 0,
        }
    }

    /// Floating view, by the same rules as [`Scalar::get_int`].
    pub fn get_double(&self) -> f64 {
        match &self.value {
            ScalarValue::Undef => 0.0,
            ScalarValue::Int(i) => *i as f64,
            ScalarValue::Double(d) => *d,
            ScalarValue::Str(s) | ScalarValue::VString(s) => self.cached_num(s).as_double(),
            ScalarValue::Bool(b) => *b as i64 as f64,
            ScalarValue::Ref(r) => r.address() as f64,
            ScalarValue::WeakRef(w) => {
                w.upgrade().map(|r| r.address() as f64).unwrap_or(0.0)
            }
            ScalarValue::Code(c) => Rc::as_ptr(c) as usize as f64,
            _ => 0.0,
        }
    }

    fn cached_num(&self, s: &str) -> NumView {
        if let Some(view) = self.num_cache.get() {
            return view;
        }
        let view = coerce::parse_numeric_prefix(s);
        self.num_cache.set(Some(view));
        view
    }

    /// Canonical stringification.
    pub fn get_string(&self) -> Rc<str> {
        match &self.value {
            ScalarValue::Undef => Rc::from(""),
            ScalarValue::Int(i) => Rc::from(i.to_string().as_str()),
            ScalarValue::Double(d) => Rc::from(coerce::double_to_string(*d).as_str()),
            ScalarValue::Str(s) | ScalarValue::VString(s) => Rc::clone(s),
            ScalarValue::Bool(b) => Rc::from(if *b { "1" } else { "" }),
            ScalarValue::Ref(r) => Rc::from(r.describe().as_str()),
            ScalarValue::WeakRef(w) => match w.upgrade() {
                Some(r) => Rc::from(r.describe().as_str()),
                None => Rc::from(""),
            },
            ScalarValue::Code(c) => {
                Rc::from(format!("CODE(0x{:x})", Rc::as_ptr(c) as usize).as_str())
            }
            ScalarValue::Glob(g) => Rc::from(format!("*{}", g.borrow().name()).as_str()),
            ScalarValue::Regex(r) => {
                Rc::from(format!("(?^{}:{})", r.flags, r.pattern).as_str())
            }
            ScalarValue::Tied(_) => Rc::from(""),
            ScalarValue::ControlFlow(cf) => Rc::from(cf.describe().as_str()),
        }
    }

    /// Perl truthiness: undef, `""`, `"0"`, and numeric zero are false.
    pub fn truthy(&self) -> bool {
        match &self.value {
            ScalarValue::Undef => false,
            ScalarValue::Int(i) => *i != 0,
            ScalarValue::Double(d) => *d != 0.0,
            ScalarValue::Str(s) | ScalarValue::VString(s) => {
                !s.is_empty() && s.as_ref() != "0"
            }
            ScalarValue::Bool(b) => *b,
            ScalarValue::WeakRef(w) => w.upgrade().is_some(),
            ScalarValue::ControlFlow(_) => true,
            _ => true,
        }
    }

    /// `ref()` classification: the blessed class if any, the reference
    /// kind otherwise, `""` for non-references.
    pub fn ref_type_name(&self) -> Rc<str> {
        match &self.value {
            ScalarValue::Ref(r) => r.type_name(),
            ScalarValue::WeakRef(w) => match w.upgrade() {
                Some(r) => r.type_name(),
                None => Rc::from(""),
            },
            ScalarValue::Code(_) => Rc::from("CODE"),
            ScalarValue::Regex(_) => Rc::from("Regexp"),
            _ => Rc::from(""),
        }
    }

    /// Attaches a class to a reference value.
    pub fn bless(&mut self, class: impl Into<Rc<str>>) -> Result<(), ErrorKind> {
        if self.is_readonly() {
            return Err(ErrorKind::ReadOnly);
        }
        match &mut self.value {
            ScalarValue::Ref(r) => {
                r.bless(class.into());
                Ok(())
            }
            _ => Err(ErrorKind::TypeError),
        }
    }

    /// Demotes a strong reference to a weak one in place.
    pub fn weaken(&mut self) -> Result<(), ErrorKind> {
        match &self.value {
            ScalarValue::Ref(r) => {
                let weak = r.downgrade();
                self.value = ScalarValue::WeakRef(weak);
                self.num_cache.set(None);
                Ok(())
            }
            ScalarValue::WeakRef(_) => Ok(()),
            _ => Err(ErrorKind::TypeError),
        }
    }

    /// In-place increment. Strings of the form `[A-Za-z]*[0-9]*` get the
    /// magic string increment; everything else increments numerically.
    pub fn increment(&mut self) -> Result<(), ErrorKind> {
        if self.is_readonly() {
            return Err(ErrorKind::ReadOnly);
        }
        let next = match &self.value {
            ScalarValue::Str(s) if coerce::is_magic_incrementable(s) => {
                ScalarValue::Str(Rc::from(coerce::magic_increment(s).as_str()))
            }
            ScalarValue::Int(i) => match i.checked_add(1) {
                Some(v) => ScalarValue::Int(v),
                None => ScalarValue::Double(*i as f64 + 1.0),
            },
            ScalarValue::Undef => ScalarValue::Int(1),
            _ => {
                let view = NumView::Double(self.get_double() + 1.0);
                coerce::narrow(view)
            }
        };
        self.value = next;
        self.num_cache.set(None);
        self.flags.remove(ScalarFlags::DUALVAR);
        Ok(())
    }

    /// In-place numeric decrement.
    pub fn decrement(&mut self) -> Result<(), ErrorKind> {
        if self.is_readonly() {
            return Err(ErrorKind::ReadOnly);
        }
        let next = match &self.value {
            ScalarValue::Int(i) => match i.checked_sub(1) {
                Some(v) => ScalarValue::Int(v),
                None => ScalarValue::Double(*i as f64 - 1.0),
            },
            ScalarValue::Undef => ScalarValue::Int(-1),
            _ => coerce::narrow(NumView::Double(self.get_double() - 1.0)),
        };
        self.value = next;
        self.num_cache.set(None);
        self.flags.remove(ScalarFlags::DUALVAR);
        Ok(())
    }

    /// Numeric three-way comparison; `None` when either side is NaN.
    pub fn compare_num(&self, other: &Scalar) -> Option<Ordering> {
        self.get_double().partial_cmp(&other.get_double())
    }

    /// String three-way comparison.
    pub fn compare_str(&self, other: &Scalar) -> Ordering {
        self.get_string().cmp(&other.get_string())
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_string())
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Self::int(i)
    }
}

impl From<f64> for Scalar {
    fn from(d: f64) -> Self {
        Self::double(d)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::str(s.as_str())
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::bool_(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undef_reads_as_empty_and_zero() {
        let x = Scalar::undef();
        assert_eq!(x.get_int(), 0);
        assert_eq!(x.get_double(), 0.0);
        assert_eq!(x.get_string().as_ref(), "");
        assert!(!x.truthy());
        assert!(!x.is_defined());
    }

    #[test]
    fn dualvar_keeps_both_views() {
        let x = Scalar::dualvar(NumView::Int(42), "forty-two");
        assert_eq!(x.get_int(), 42);
        assert_eq!(x.get_string().as_ref(), "forty-two");
        // Still intact after repeated reads.
        assert_eq!(x.get_double(), 42.0);
        assert_eq!(x.get_string().as_ref(), "forty-two");
    }

    #[test]
    fn mutation_drops_dualvar_views() {
        let mut x = Scalar::dualvar(NumView::Int(7), "seven");
        x.set_value(ScalarValue::Int(8)).unwrap();
        assert_eq!(x.get_string().as_ref(), "8");
        assert!(x.num_cache().is_none());
    }

    #[test]
    fn readonly_rejects_writes() {
        let mut x = Scalar::str("frozen");
        x.lock_readonly();
        assert_eq!(x.set_value(ScalarValue::Int(1)), Err(ErrorKind::ReadOnly));
        assert_eq!(x.increment(), Err(ErrorKind::ReadOnly));
        assert_eq!(x.get_string().as_ref(), "frozen");
    }

    #[test]
    fn string_numeric_cache_syncs() {
        let x = Scalar::str("10abc");
        assert_eq!(x.get_int(), 10);
        assert_eq!(x.num_cache(), Some(NumView::Int(10)));
        assert_eq!(x.get_double(), 10.0);
    }

    #[test]
    fn magic_increment_on_alpha_strings() {
        let mut x = Scalar::str("Az");
        x.increment().unwrap();
        assert_eq!(x.get_string().as_ref(), "Ba");

        let mut y = Scalar::str("zz");
        y.increment().unwrap();
        assert_eq!(y.get_string().as_ref(), "aaa");

        let mut z = Scalar::str("a9");
        z.increment().unwrap();
        assert_eq!(z.get_string().as_ref(), "b0");
    }

    #[test]
    fn non_magic_strings_increment_numerically() {
        let mut x = Scalar::str("10.5");
        x.increment().unwrap();
        assert_eq!(x.get_double(), 11.5);
    }

    #[test]
    fn nan_compares_to_none() {
        let a = Scalar::double(f64::NAN);
        let b = Scalar::int(1);
        assert_eq!(a.compare_num(&b), None);
        assert_eq!(b.compare_num(&b), Some(Ordering::Equal));
    }

    #[test]
    fn bool_tag_is_distinct_from_int() {
        let t = Scalar::bool_(true);
        assert!(t.is_bool());
        assert!(!Scalar::int(1).is_bool());
        assert_eq!(t.get_int(), 1);
        assert_eq!(Scalar::bool_(false).get_string().as_ref(), "");
    }
}
