//! Arithmetic, comparison, and coercion helpers, with operator-overload
//! dispatch in front of the default numeric/string behavior.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use camel_asm::{CallContext, ErrorKind, RefKind};
use camel_value::{coerce, Array, NumView, OverloadOp, Scalar, ScalarValue, Slot};

use crate::error::VmError;

use super::executors::{ArithOp, CmpOp};
use super::Interpreter;

impl Interpreter {
    /* OVERLOAD DISPATCH */

    /// The blessed class of a value, when its class installed overloads.
    fn overloaded_class(&mut self, value: &Scalar) -> Option<Rc<str>> {
        let class = match value.value() {
            ScalarValue::Ref(r) => r.class().cloned()?,
            _ => return None,
        };
        self.stash.has_overloads(&class).then_some(class)
    }

    /// Binary dispatch: left operand's class, then the right's, then an
    /// installed `nomethod`, then `None` for the default behavior.
    pub(crate) fn overload_binary(
        &mut self,
        op: OverloadOp,
        a: &Scalar,
        b: &Scalar,
    ) -> Result<Option<Scalar>, VmError> {
        let handler = if let Some(class) = self.overloaded_class(a) {
            self.stash
                .resolve_overload(&class, op)
                .map(|h| (h, false))
                .or_else(|| {
                    self.stash
                        .resolve_overload(&class, OverloadOp::Nomethod)
                        .map(|h| (h, false))
                })
        } else {
            None
        };
        let handler = match handler {
            Some(found) => Some(found),
            None => match self.overloaded_class(b) {
                Some(class) => self
                    .stash
                    .resolve_overload(&class, op)
                    .map(|h| (h, true))
                    .or_else(|| {
                        self.stash
                            .resolve_overload(&class, OverloadOp::Nomethod)
                            .map(|h| (h, true))
                    }),
                None => None,
            },
        };

        let Some((handler, swapped)) = handler else {
            return Ok(None);
        };
        let (lhs, rhs) = if swapped { (b, a) } else { (a, b) };
        let args = Rc::new(RefCell::new(Array::from_scalars(vec![
            lhs.clone(),
            rhs.clone(),
            Scalar::bool_(swapped),
        ])));
        let result = self.call_code(&handler, args, CallContext::Scalar)?;
        Ok(Some(self.slot_value(&result)))
    }

    /// Unary conversion dispatch (`""`, `0+`, `bool`, `neg`).
    fn overload_unary(
        &mut self,
        op: OverloadOp,
        value: &Scalar,
    ) -> Result<Option<Scalar>, VmError> {
        let Some(class) = self.overloaded_class(value) else {
            return Ok(None);
        };
        let Some(handler) = self.stash.resolve_overload(&class, op) else {
            return Ok(None);
        };
        let args = Rc::new(RefCell::new(Array::from_scalars(vec![
            value.clone(),
            Scalar::undef(),
            Scalar::bool_(false),
        ])));
        let result = self.call_code(&handler, args, CallContext::Scalar)?;
        Ok(Some(self.slot_value(&result)))
    }

    /// Dereference overload (`@{}` and friends); returns the reference
    /// the handler produced.
    pub(crate) fn deref_overload(
        &mut self,
        value: &Scalar,
        kind: RefKind,
    ) -> Result<Scalar, VmError> {
        let op = match kind {
            RefKind::Scalar => OverloadOp::DerefScalar,
            RefKind::Array => OverloadOp::DerefArray,
            RefKind::Hash => OverloadOp::DerefHash,
            RefKind::Code => OverloadOp::DerefCode,
            RefKind::Glob => return Ok(value.clone()),
        };
        match self.overload_unary(op, value)? {
            Some(produced) => Ok(produced),
            None => Ok(value.clone()),
        }
    }

    /* COERCIONS */

    /// Truthiness, honoring a `bool` overload.
    pub(crate) fn truthy_of(&mut self, value: &Scalar) -> Result<bool, VmError> {
        if let Some(result) = self.overload_unary(OverloadOp::Bool, value)? {
            return Ok(result.truthy());
        }
        Ok(value.truthy())
    }

    /// Stringification, honoring a `""` overload.
    pub(crate) fn string_of(&mut self, value: &Scalar) -> Result<Rc<str>, VmError> {
        if let Some(result) = self.overload_unary(OverloadOp::Stringify, value)? {
            return Ok(result.get_string());
        }
        Ok(value.get_string())
    }

    /// Numeric view, honoring a `0+` overload.
    fn num_view_of(&mut self, value: &Scalar) -> Result<NumView, VmError> {
        if let Some(result) = self.overload_unary(OverloadOp::Numify, value)? {
            return Ok(num_view(&result));
        }
        Ok(num_view(value))
    }

    /* ARITHMETIC */

    pub(crate) fn arith(
        &mut self,
        regs: &mut [Slot],
        rd: u16,
        ra: u16,
        rb: u16,
        op: ArithOp,
    ) -> Result<(), VmError> {
        let a = self.read_value(regs, ra)?;
        let b = self.read_value(regs, rb)?;
        if let Some(result) = self.overload_binary(overload_of(op), &a, &b)? {
            return self.write_value(regs, rd, result);
        }
        let (x, y) = (self.num_view_of(&a)?, self.num_view_of(&b)?);
        let result = numeric_binary(op, x, y)?;
        self.write_value(regs, rd, result)
    }

    /// Integer-specialized path: both operands are known integral, so
    /// the parse/coerce machinery is skipped.
    pub(crate) fn arith_int(
        &mut self,
        regs: &mut [Slot],
        rd: u16,
        ra: u16,
        rb: u16,
        op: ArithOp,
    ) -> Result<(), VmError> {
        let a = self.read_value(regs, ra)?.get_int();
        let b = self.read_value(regs, rb)?.get_int();
        let result = match op {
            ArithOp::Add => a.checked_add(b).map(Scalar::int),
            ArithOp::Sub => a.checked_sub(b).map(Scalar::int),
            ArithOp::Mul => a.checked_mul(b).map(Scalar::int),
            _ => None,
        }
        .unwrap_or_else(|| {
            // Overflow widens, matching the generic path.
            let (x, y) = (a as f64, b as f64);
            Scalar::double(match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                _ => 0.0,
            })
        });
        self.write_value(regs, rd, result)
    }

    pub(crate) fn negate(&mut self, regs: &mut [Slot], rd: u16, rs: u16) -> Result<(), VmError> {
        let v = self.read_value(regs, rs)?;
        if let Some(result) = self.overload_unary(OverloadOp::Neg, &v)? {
            return self.write_value(regs, rd, result);
        }
        let result = match self.num_view_of(&v)? {
            NumView::Int(i) => match i.checked_neg() {
                Some(n) => Scalar::int(n),
                None => Scalar::double(-(i as f64)),
            },
            NumView::Double(d) => Scalar::double(-d),
        };
        self.write_value(regs, rd, result)
    }

    /* STRINGS */

    pub(crate) fn concat(
        &mut self,
        regs: &mut [Slot],
        rd: u16,
        ra: u16,
        rb: u16,
    ) -> Result<(), VmError> {
        let a = self.read_value(regs, ra)?;
        let b = self.read_value(regs, rb)?;
        if let Some(result) = self.overload_binary(OverloadOp::Concat, &a, &b)? {
            return self.write_value(regs, rd, result);
        }
        let mut out = self.string_of(&a)?.to_string();
        out.push_str(&self.string_of(&b)?);
        self.write_value(regs, rd, Scalar::str(out.as_str()))
    }

    pub(crate) fn repeat(
        &mut self,
        regs: &mut [Slot],
        rd: u16,
        ra: u16,
        rb: u16,
    ) -> Result<(), VmError> {
        let a = self.read_value(regs, ra)?;
        let b = self.read_value(regs, rb)?;
        if let Some(result) = self.overload_binary(OverloadOp::Repeat, &a, &b)? {
            return self.write_value(regs, rd, result);
        }
        let count = b.get_int().max(0) as usize;
        let unit = self.string_of(&a)?;
        self.write_value(regs, rd, Scalar::str(unit.repeat(count).as_str()))
    }

    /* COMPARISONS */

    pub(crate) fn cmp_num(
        &mut self,
        regs: &mut [Slot],
        rd: u16,
        ra: u16,
        rb: u16,
        op: CmpOp,
    ) -> Result<(), VmError> {
        let a = self.read_value(regs, ra)?;
        let b = self.read_value(regs, rb)?;
        if let Some(result) = self.overload_binary(num_overload_of(op), &a, &b)? {
            return self.write_value(regs, rd, result);
        }
        let x = self.num_view_of(&a)?.as_double();
        let y = self.num_view_of(&b)?.as_double();
        let ordering = x.partial_cmp(&y);
        let result = match op {
            CmpOp::Spaceship => match ordering {
                // NaN on either side compares to undef.
                Some(ord) => Scalar::int(ord_to_int(ord)),
                None => Scalar::undef(),
            },
            other => match ordering {
                Some(ord) => Scalar::bool_(cmp_holds(other, ord)),
                None => Scalar::bool_(other == CmpOp::Ne),
            },
        };
        self.write_value(regs, rd, result)
    }

    pub(crate) fn cmp_str(
        &mut self,
        regs: &mut [Slot],
        rd: u16,
        ra: u16,
        rb: u16,
        op: CmpOp,
    ) -> Result<(), VmError> {
        let a = self.read_value(regs, ra)?;
        let b = self.read_value(regs, rb)?;
        if let Some(result) = self.overload_binary(str_overload_of(op), &a, &b)? {
            return self.write_value(regs, rd, result);
        }
        let x = self.string_of(&a)?;
        let y = self.string_of(&b)?;
        let ordering = x.as_ref().cmp(y.as_ref());
        let result = match op {
            CmpOp::Spaceship => Scalar::int(ord_to_int(ordering)),
            other => Scalar::bool_(cmp_holds(other, ordering)),
        };
        self.write_value(regs, rd, result)
    }
}

/// Non-overloaded numeric view of a scalar.
pub(crate) fn num_view(value: &Scalar) -> NumView {
    match value.value() {
        ScalarValue::Int(i) => NumView::Int(*i),
        ScalarValue::Bool(b) => NumView::Int(*b as i64),
        ScalarValue::Double(d) => NumView::Double(*d),
        ScalarValue::Undef => NumView::Int(0),
        ScalarValue::Str(_) | ScalarValue::VString(_) => {
            // get_double parks the parse in the dualvar cache.
            let d = value.get_double();
            value.num_cache().unwrap_or(NumView::Double(d))
        }
        _ => NumView::Int(value.get_int()),
    }
}

fn overload_of(op: ArithOp) -> OverloadOp {
    match op {
        ArithOp::Add => OverloadOp::Add,
        ArithOp::Sub => OverloadOp::Sub,
        ArithOp::Mul => OverloadOp::Mul,
        ArithOp::Div => OverloadOp::Div,
        ArithOp::Mod => OverloadOp::Mod,
        ArithOp::Pow => OverloadOp::Pow,
    }
}

fn num_overload_of(op: CmpOp) -> OverloadOp {
    match op {
        CmpOp::Eq => OverloadOp::NumEq,
        CmpOp::Ne => OverloadOp::NumNe,
        CmpOp::Lt => OverloadOp::NumLt,
        CmpOp::Gt => OverloadOp::NumGt,
        CmpOp::Le => OverloadOp::NumLe,
        CmpOp::Ge => OverloadOp::NumGe,
        CmpOp::Spaceship => OverloadOp::NumCmp,
    }
}

fn str_overload_of(op: CmpOp) -> OverloadOp {
    match op {
        CmpOp::Eq => OverloadOp::StrEq,
        CmpOp::Ne => OverloadOp::StrNe,
        CmpOp::Lt => OverloadOp::StrLt,
        CmpOp::Gt => OverloadOp::StrGt,
        CmpOp::Le => OverloadOp::StrLe,
        CmpOp::Ge => OverloadOp::StrGe,
        CmpOp::Spaceship => OverloadOp::StrCmp,
    }
}

/// Integral doubles collapse back to the integer tag.
fn narrowed(d: f64) -> Scalar {
    match coerce::narrow(NumView::Double(d)) {
        ScalarValue::Int(i) => Scalar::int(i),
        _ => Scalar::double(d),
    }
}

fn ord_to_int(ord: Ordering) -> i64 {
    match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn cmp_holds(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
        CmpOp::Spaceship => false,
    }
}

/// The default arithmetic: integer-preserving where exact, widening to
/// doubles otherwise.
fn numeric_binary(op: ArithOp, x: NumView, y: NumView) -> Result<Scalar, VmError> {
    use NumView::{Double, Int};
    let result = match (op, x, y) {
        (ArithOp::Add, Int(a), Int(b)) => match a.checked_add(b) {
            Some(v) => Scalar::int(v),
            None => Scalar::double(a as f64 + b as f64),
        },
        (ArithOp::Sub, Int(a), Int(b)) => match a.checked_sub(b) {
            Some(v) => Scalar::int(v),
            None => Scalar::double(a as f64 - b as f64),
        },
        (ArithOp::Mul, Int(a), Int(b)) => match a.checked_mul(b) {
            Some(v) => Scalar::int(v),
            None => Scalar::double(a as f64 * b as f64),
        },
        (ArithOp::Add, a, b) => Scalar::double(a.as_double() + b.as_double()),
        (ArithOp::Sub, a, b) => Scalar::double(a.as_double() - b.as_double()),
        (ArithOp::Mul, a, b) => Scalar::double(a.as_double() * b.as_double()),
        (ArithOp::Div, a, b) => {
            let divisor = b.as_double();
            if divisor == 0.0 {
                return Err(VmError::new(
                    ErrorKind::DivisionByZero,
                    "Illegal division by zero",
                ));
            }
            narrowed(a.as_double() / divisor)
        }
        (ArithOp::Mod, a, b) => {
            let modulus = b.as_int();
            if modulus == 0 {
                return Err(VmError::new(ErrorKind::ModuloByZero, "Illegal modulus zero"));
            }
            // Result takes the sign of the right operand.
            let mut r = a.as_int() % modulus;
            if r != 0 && (r < 0) != (modulus < 0) {
                r += modulus;
            }
            Scalar::int(r)
        }
        (ArithOp::Pow, a, b) => {
            let result = a.as_double().powf(b.as_double());
            if let (Int(_), Int(e)) = (a, b) {
                if e >= 0 && result.fract() == 0.0 && result.abs() < 9.007_199_254_740_992e15 {
                    return Ok(Scalar::int(result as i64));
                }
            }
            Scalar::double(result)
        }
    };
    Ok(result)
}
