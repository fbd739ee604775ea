//! Bodies of the `CALL_BUILTIN` operations.

use std::rc::Rc;

use camel_asm::{Builtin, CallContext, ErrorKind};
use camel_value::{
    scalar_ref, Array, NumView, Scalar, ScalarRef, ScalarValue, Slot,
};

use crate::error::VmError;

use super::Interpreter;

impl Interpreter {
    pub(crate) fn builtin(
        &mut self,
        which: Builtin,
        args: Vec<Slot>,
        _ctx: CallContext,
    ) -> Result<Slot, VmError> {
        use Builtin::*;
        let result = match which {
            Abs => {
                let v = self.arg_value(&args, 0)?;
                scalar_slot(match super::alu::num_view(&v) {
                    NumView::Int(i) => Scalar::int(i.saturating_abs()),
                    NumView::Double(d) => Scalar::double(d.abs()),
                })
            }
            Int => {
                let v = self.arg_value(&args, 0)?;
                scalar_slot(Scalar::int(v.get_int()))
            }
            Sqrt => {
                let v = self.arg_value(&args, 0)?;
                let d = v.get_double();
                if d < 0.0 {
                    return Err(VmError::new(
                        ErrorKind::Die,
                        format!("Can't take sqrt of {d}"),
                    ));
                }
                scalar_slot(Scalar::double(d.sqrt()))
            }
            Uc => self.map_string(&args, |s| s.to_uppercase())?,
            Lc => self.map_string(&args, |s| s.to_lowercase())?,
            Ucfirst => self.map_string(&args, |s| {
                let mut chars = s.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })?,
            Lcfirst => self.map_string(&args, |s| {
                let mut chars = s.chars();
                match chars.next() {
                    Some(first) => first.to_lowercase().chain(chars).collect(),
                    None => String::new(),
                }
            })?,
            Ord => {
                let v = self.arg_value(&args, 0)?;
                let s = self.string_of(&v)?;
                scalar_slot(Scalar::int(
                    s.chars().next().map(|c| c as i64).unwrap_or(0),
                ))
            }
            Chr => {
                let v = self.arg_value(&args, 0)?;
                let cp = v.get_int();
                let c = u32::try_from(cp)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or('\u{fffd}');
                scalar_slot(Scalar::str(c.to_string().as_str()))
            }
            Hex => {
                let v = self.arg_value(&args, 0)?;
                let s = self.string_of(&v)?;
                let digits = s
                    .trim_start_matches("0x")
                    .trim_start_matches("0X");
                scalar_slot(Scalar::int(
                    i64::from_str_radix(digits, 16).unwrap_or(0),
                ))
            }
            Oct => {
                let v = self.arg_value(&args, 0)?;
                let s = self.string_of(&v)?;
                scalar_slot(Scalar::int(parse_oct(&s)))
            }
            Index | Rindex => {
                let hay = {
                    let v = self.arg_value(&args, 0)?;
                    self.string_of(&v)?
                };
                let needle = {
                    let v = self.arg_value(&args, 1)?;
                    self.string_of(&v)?
                };
                let found = if which == Index {
                    hay.find(needle.as_ref())
                } else {
                    hay.rfind(needle.as_ref())
                };
                scalar_slot(Scalar::int(
                    found.map(|b| hay[..b].chars().count() as i64).unwrap_or(-1),
                ))
            }
            Join => {
                let sep = {
                    let v = self.arg_value(&args, 0)?;
                    self.string_of(&v)?
                };
                let mut parts = Vec::new();
                for slot in &args[1..] {
                    let mut flat = Vec::new();
                    Self::flatten_slot(&mut flat, slot, false);
                    for handle in flat {
                        let v = handle.borrow().clone();
                        parts.push(self.string_of(&v)?.to_string());
                    }
                }
                scalar_slot(Scalar::str(parts.join(sep.as_ref()).as_str()))
            }
            Sprintf => {
                let format = {
                    let v = self.arg_value(&args, 0)?;
                    self.string_of(&v)?
                };
                let mut rest = Vec::new();
                for slot in &args[1..] {
                    Self::flatten_slot(&mut rest, slot, false);
                }
                let out = self.sprintf(&format, &rest)?;
                scalar_slot(Scalar::str(out.as_str()))
            }
            Ref => {
                let v = self.arg_value(&args, 0)?;
                scalar_slot(Scalar::str(v.ref_type_name().as_ref()))
            }
            Bless => {
                let target = self.arg_handle(&args, 0)?;
                let class = {
                    let v = self.arg_value(&args, 1)?;
                    self.string_of(&v)?
                };
                target
                    .borrow_mut()
                    .bless(class.as_ref())
                    .map_err(VmError::from)?;
                Slot::Scalar(target)
            }
            Chomp => {
                let target = self.arg_handle(&args, 0)?;
                let (text, had) = {
                    let s = target.borrow().get_string();
                    match s.strip_suffix('\n') {
                        Some(rest) => (rest.to_owned(), true),
                        None => (s.to_string(), false),
                    }
                };
                if had {
                    target
                        .borrow_mut()
                        .set_value(ScalarValue::Str(Rc::from(text.as_str())))
                        .map_err(VmError::from)?;
                }
                scalar_slot(Scalar::int(had as i64))
            }
            Chop => {
                let target = self.arg_handle(&args, 0)?;
                let s = target.borrow().get_string();
                let mut chars: Vec<char> = s.chars().collect();
                let removed = chars.pop();
                let rest: String = chars.into_iter().collect();
                target
                    .borrow_mut()
                    .set_value(ScalarValue::Str(Rc::from(rest.as_str())))
                    .map_err(VmError::from)?;
                scalar_slot(match removed {
                    Some(c) => Scalar::str(c.to_string().as_str()),
                    None => Scalar::str(""),
                })
            }
            TrCount => {
                // Counting-only tr/// never writes, so a read-only
                // target is fine.
                let target = self.arg_handle(&args, 0)?;
                let set = {
                    let v = self.arg_value(&args, 1)?;
                    self.string_of(&v)?
                };
                let set = TrSet::parse(&set);
                let s = target.borrow().get_string();
                let count = s.chars().filter(|&c| set.contains(c)).count();
                scalar_slot(Scalar::int(count as i64))
            }
            TrReplace => {
                let target = self.arg_handle(&args, 0)?;
                let search = {
                    let v = self.arg_value(&args, 1)?;
                    self.string_of(&v)?
                };
                let replace = {
                    let v = self.arg_value(&args, 2)?;
                    self.string_of(&v)?
                };
                let (out, count) = tr_replace(
                    target.borrow().get_string().as_ref(),
                    &TrSet::parse(&search),
                    &expand_ranges(&replace),
                );
                target
                    .borrow_mut()
                    .set_value(ScalarValue::Str(Rc::from(out.as_str())))
                    .map_err(VmError::from)?;
                scalar_slot(Scalar::int(count))
            }
            Weaken => {
                let target = self.arg_handle(&args, 0)?;
                target.borrow_mut().weaken().map_err(VmError::from)?;
                scalar_slot(Scalar::undef())
            }
            Dualvar => {
                let num = self.arg_value(&args, 0)?;
                let text = {
                    let v = self.arg_value(&args, 1)?;
                    self.string_of(&v)?
                };
                scalar_slot(Scalar::dualvar(super::alu::num_view(&num), text))
            }
            Each => {
                let hash = match args.first() {
                    Some(Slot::Hash(h)) => Rc::clone(h),
                    _ => {
                        return Err(VmError::new(
                            ErrorKind::TypeError,
                            "Not a HASH reference\n",
                        ))
                    }
                };
                let step = hash.borrow_mut().each();
                match step {
                    Some((key, value)) => Slot::Array(Rc::new(std::cell::RefCell::new(
                        Array::from_refs(vec![
                            scalar_ref(Scalar::str(key.as_ref())),
                            value,
                        ]),
                    ))),
                    None => Slot::Array(Rc::new(std::cell::RefCell::new(Array::new()))),
                }
            }
            Wantarray => {
                let tag = self.arg_value(&args, 0)?.get_int();
                scalar_slot(match CallContext::from(tag) {
                    CallContext::Void => Scalar::undef(),
                    CallContext::Scalar => Scalar::bool_(false),
                    CallContext::List => Scalar::bool_(true),
                })
            }
            _ => {
                return Err(VmError::new(
                    ErrorKind::NotImplemented,
                    format!("The {which:?} builtin is not supported by this runtime"),
                ))
            }
        };
        Ok(result)
    }

    fn arg_handle(&mut self, args: &[Slot], at: usize) -> Result<ScalarRef, VmError> {
        match args.get(at) {
            Some(Slot::Scalar(s)) => Ok(Rc::clone(s)),
            Some(_) => Err(VmError::new(
                ErrorKind::ArgumentCount,
                "Scalar argument expected",
            )),
            None => Err(VmError::new(
                ErrorKind::ArgumentCount,
                "Not enough arguments",
            )),
        }
    }

    fn arg_value(&mut self, args: &[Slot], at: usize) -> Result<Scalar, VmError> {
        match args.get(at) {
            Some(slot) => Ok(self.slot_value(slot)),
            None => Ok(Scalar::undef()),
        }
    }

    fn map_string(
        &mut self,
        args: &[Slot],
        f: impl FnOnce(&str) -> String,
    ) -> Result<Slot, VmError> {
        let v = self.arg_value(args, 0)?;
        let s = self.string_of(&v)?;
        Ok(scalar_slot(Scalar::str(f(&s).as_str())))
    }

    /// A practical `sprintf`: `%s %d %i %u %f %e %g %x %o %b %c %%` with
    /// optional flags, width, and precision.
    fn sprintf(&mut self, format: &str, args: &[ScalarRef]) -> Result<String, VmError> {
        let mut out = String::new();
        let mut chars = format.chars().peekable();
        let mut next_arg = 0usize;
        let mut take = |next_arg: &mut usize| -> Scalar {
            let v = args
                .get(*next_arg)
                .map(|h| h.borrow().clone())
                .unwrap_or_else(Scalar::undef);
            *next_arg += 1;
            v
        };

        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let mut spec = String::from('%');
            let mut conv = None;
            for c in chars.by_ref() {
                spec.push(c);
                if c.is_ascii_alphabetic() || c == '%' {
                    conv = Some(c);
                    break;
                }
            }
            let Some(conv) = conv else { break };
            let (flags, width, precision) = parse_spec(&spec[1..spec.len() - 1]);
            let rendered = match conv {
                '%' => "%".to_owned(),
                's' => {
                    let v = take(&mut next_arg);
                    let mut s = self.string_of(&v)?.to_string();
                    if let Some(p) = precision {
                        s.truncate(p);
                    }
                    s
                }
                'c' => {
                    let v = take(&mut next_arg);
                    char::from_u32(v.get_int() as u32)
                        .unwrap_or('\u{fffd}')
                        .to_string()
                }
                'd' | 'i' => format!("{}", take(&mut next_arg).get_int()),
                'u' => format!("{}", take(&mut next_arg).get_int().max(0)),
                'x' => format!("{:x}", take(&mut next_arg).get_int()),
                'X' => format!("{:X}", take(&mut next_arg).get_int()),
                'o' => format!("{:o}", take(&mut next_arg).get_int()),
                'b' => format!("{:b}", take(&mut next_arg).get_int()),
                'e' => format!(
                    "{:.*e}",
                    precision.unwrap_or(6),
                    take(&mut next_arg).get_double()
                ),
                'f' | 'F' => format!(
                    "{:.*}",
                    precision.unwrap_or(6),
                    take(&mut next_arg).get_double()
                ),
                'g' | 'G' => {
                    let d = take(&mut next_arg).get_double();
                    format!("{d}")
                }
                other => {
                    return Err(VmError::new(
                        ErrorKind::NotImplemented,
                        format!("sprintf conversion %{other} is not supported"),
                    ))
                }
            };
            out.push_str(&pad(rendered, &flags, width));
        }
        Ok(out)
    }
}

fn scalar_slot(value: Scalar) -> Slot {
    Slot::Scalar(scalar_ref(value))
}

fn parse_oct(s: &str) -> i64 {
    let t = s.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).unwrap_or(0);
    }
    if let Some(bin) = t.strip_prefix("0b").or_else(|| t.strip_prefix("0B")) {
        return i64::from_str_radix(bin, 2).unwrap_or(0);
    }
    i64::from_str_radix(t.trim_start_matches('0'), 8).unwrap_or(0)
}

fn parse_spec(body: &str) -> (String, Option<usize>, Option<usize>) {
    let flags: String = body
        .chars()
        .take_while(|c| matches!(c, '-' | '+' | ' ' | '0' | '#'))
        .collect();
    let rest = &body[flags.len()..];
    let (width_part, precision_part) = match rest.split_once('.') {
        Some((w, p)) => (w, Some(p)),
        None => (rest, None),
    };
    let width = width_part.parse().ok();
    let precision = precision_part.and_then(|p| p.parse().ok());
    (flags, width, precision)
}

fn pad(s: String, flags: &str, width: Option<usize>) -> String {
    let Some(width) = width else { return s };
    if s.len() >= width {
        return s;
    }
    let fill = width - s.len();
    if flags.contains('-') {
        format!("{s}{}", " ".repeat(fill))
    } else if flags.contains('0') && !s.starts_with('-') {
        format!("{}{s}", "0".repeat(fill))
    } else {
        format!("{}{s}", " ".repeat(fill))
    }
}

/// A `tr///` search class: expanded ranges plus a complement flag.
struct TrSet {
    chars: Vec<char>,
    negated: bool,
}

impl TrSet {
    fn parse(spec: &str) -> Self {
        let (negated, body) = match spec.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        Self {
            chars: expand_ranges(body),
            negated,
        }
    }

    fn contains(&self, c: char) -> bool {
        self.chars.contains(&c) != self.negated
    }

    fn position(&self, c: char) -> Option<usize> {
        self.chars.iter().position(|&x| x == c)
    }
}

/// `a-z` range expansion for tr classes.
fn expand_ranges(spec: &str) -> Vec<char> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Vec::new();
    let mut at = 0;
    while at < chars.len() {
        if at + 2 < chars.len() && chars[at + 1] == '-' {
            let (lo, hi) = (chars[at], chars[at + 2]);
            let mut c = lo as u32;
            while c <= hi as u32 {
                if let Some(ch) = char::from_u32(c) {
                    out.push(ch);
                }
                c += 1;
            }
            at += 3;
        } else {
            out.push(chars[at]);
            at += 1;
        }
    }
    out
}

fn tr_replace(s: &str, search: &TrSet, replace: &[char]) -> (String, i64) {
    let mut out = String::new();
    let mut count = 0;
    for c in s.chars() {
        match search.position(c) {
            Some(at) if !search.negated => {
                count += 1;
                let mapped = replace
                    .get(at)
                    .or_else(|| replace.last())
                    .copied()
                    .unwrap_or(c);
                out.push(mapped);
            }
            None if search.negated => {
                count += 1;
                out.push(replace.last().copied().unwrap_or(c));
            }
            _ => out.push(c),
        }
    }
    (out, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tr_set_ranges_and_negation() {
        let set = TrSet::parse("A-Z");
        assert!(set.contains('Q'));
        assert!(!set.contains('q'));

        let negated = TrSet::parse("^0-9");
        assert!(negated.contains('x'));
        assert!(!negated.contains('5'));
    }

    #[test]
    fn tr_replace_maps_positionally() {
        let (out, n) = tr_replace("abcabc", &TrSet::parse("abc"), &expand_ranges("xyz"));
        assert_eq!(out, "xyzxyz");
        assert_eq!(n, 6);
    }

    #[test]
    fn oct_understands_prefixes() {
        assert_eq!(parse_oct("755"), 0o755);
        assert_eq!(parse_oct("0x1f"), 31);
        assert_eq!(parse_oct("0b101"), 5);
    }

    #[test]
    fn spec_parsing() {
        let (flags, width, precision) = parse_spec("-08.3");
        assert_eq!(flags, "-0");
        assert_eq!(width, Some(8));
        assert_eq!(precision, Some(3));
    }
}
