//! Numeric/string coercion rules.
//!
//! These are the observable laws of the scalar: leading-number string
//! parses, truncate-toward-zero integer projection, shortest
//! round-tripping double formatting, and the magic string increment.

use crate::scalar::NumView;

/// Truncates toward zero, saturating at the i64 range like the host's
/// float-to-int conversion.
pub fn double_to_int(d: f64) -> i64 {
    if d.is_nan() {
        0
    } else {
        d.trunc() as i64
    }
}

/// Shortest decimal that round-trips, with the `Inf`/`-Inf`/`NaN`
/// spellings for the non-finite values.
pub fn double_to_string(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_owned()
    } else if d.is_infinite() {
        if d > 0.0 { "Inf".to_owned() } else { "-Inf".to_owned() }
    } else if d == d.trunc() && d.abs() < 1e15 {
        // Integral doubles print without a fraction.
        format!("{}", d as i64)
    } else {
        format!("{d}")
    }
}

/// Collapses an integral double view back to the integer tag when it
/// fits; keeps the double otherwise.
pub fn narrow(view: NumView) -> crate::scalar::ScalarValue {
    use crate::scalar::ScalarValue;
    match view {
        NumView::Int(i) => ScalarValue::Int(i),
        NumView::Double(d) => {
            if d.fract() == 0.0 && d.abs() <= i64::MAX as f64 && d.is_finite() {
                ScalarValue::Int(d as i64)
            } else {
                ScalarValue::Double(d)
            }
        }
    }
}

/// Parses the numeric prefix of a string the way the scalar's numeric
/// views do: optional whitespace and sign, then a decimal number with
/// optional fraction and exponent, or an `Inf`/`NaN` spelling. A
/// non-numeric prefix yields integer zero.
///
/// Base prefixes are not honored here: `"0x10"` numifies as the leading
/// `0`, the way runtime string coercion works. Source literals get
/// their bases from the compiler, and `hex`/`oct` opt in explicitly.
pub fn parse_numeric_prefix(s: &str) -> NumView {
    let t = s.trim_start();
    let (neg, t) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };

    if starts_with_ignore_case(t, "inf") {
        let d = if neg { f64::NEG_INFINITY } else { f64::INFINITY };
        return NumView::Double(d);
    }
    if starts_with_ignore_case(t, "nan") {
        return NumView::Double(f64::NAN);
    }

    let bytes = t.as_bytes();
    let mut end = 0;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let int_digits = end;
    let mut has_fraction = false;
    if end < bytes.len() && bytes[end] == b'.' {
        let mut frac = end + 1;
        while frac < bytes.len() && bytes[frac].is_ascii_digit() {
            frac += 1;
        }
        if frac > end + 1 || int_digits > 0 {
            has_fraction = frac > end + 1;
            end = frac;
        }
    }
    if int_digits == 0 && !has_fraction {
        return NumView::Int(0);
    }
    let mut has_exponent = false;
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        let exp_digits = exp;
        while exp < bytes.len() && bytes[exp].is_ascii_digit() {
            exp += 1;
        }
        if exp > exp_digits {
            has_exponent = true;
            end = exp;
        }
    }

    let body = &t[..end];
    if !has_fraction && !has_exponent {
        // Pure integer literal; overflow falls back to the double view.
        if let Ok(i) = body.parse::<i64>() {
            return NumView::Int(if neg { i.wrapping_neg() } else { i });
        }
    }
    let d: f64 = body.parse().unwrap_or(0.0);
    NumView::Double(if neg { -d } else { d })
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// `true` for strings in the magic-increment class `[A-Za-z]*[0-9]*`,
/// non-empty.
pub fn is_magic_incrementable(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let bytes = s.as_bytes();
    let mut at = 0;
    while at < bytes.len() && bytes[at].is_ascii_alphabetic() {
        at += 1;
    }
    while at < bytes.len() && bytes[at].is_ascii_digit() {
        at += 1;
    }
    at == bytes.len()
}

/// Perl's magic string increment: rightmost character steps through its
/// class, carrying leftward; a carry off the left end prepends a fresh
/// first character of the leftmost class.
pub fn magic_increment(s: &str) -> String {
    let mut bytes = s.as_bytes().to_vec();
    let mut at = bytes.len();
    loop {
        if at == 0 {
            let lead = match bytes.first() {
                Some(b) if b.is_ascii_digit() => b'1',
                Some(b) if b.is_ascii_uppercase() => b'A',
                _ => b'a',
            };
            bytes.insert(0, lead);
            break;
        }
        at -= 1;
        match bytes[at] {
            b'9' => bytes[at] = b'0',
            b'z' => bytes[at] = b'a',
            b'Z' => bytes[at] = b'A',
            b => {
                bytes[at] = b + 1;
                break;
            }
        }
    }
    String::from_utf8(bytes).expect("ascii increment stays ascii")
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use test_case::test_case;

    #[test_case("10", NumView::Int(10); "plain integer")]
    #[test_case("  -3abc", NumView::Int(-3); "signed with junk tail")]
    #[test_case("abc", NumView::Int(0); "non numeric")]
    #[test_case("", NumView::Int(0); "empty")]
    #[test_case("3.5", NumView::Double(3.5); "fraction")]
    #[test_case("1e3", NumView::Double(1000.0); "exponent")]
    #[test_case("-2.5e-1", NumView::Double(-0.25); "negative exponent")]
    #[test_case(".5", NumView::Double(0.5); "bare fraction")]
    // Base prefixes stop at the first non-digit, as runtime coercion
    // does; hex() and oct() are the opt-in paths.
    #[test_case("0x10", NumView::Int(0); "hex prefix reads the zero")]
    #[test_case("0b101", NumView::Int(0); "binary prefix reads the zero")]
    fn numeric_prefix(input: &str, expect: NumView) {
        assert_eq!(parse_numeric_prefix(input), expect);
    }

    #[test]
    fn inf_and_nan_spellings() {
        assert_eq!(parse_numeric_prefix("Inf"), NumView::Double(f64::INFINITY));
        assert_eq!(
            parse_numeric_prefix("-Infinity"),
            NumView::Double(f64::NEG_INFINITY)
        );
        match parse_numeric_prefix("NaN") {
            NumView::Double(d) => assert!(d.is_nan()),
            other => panic!("expected NaN, got {other:?}"),
        }
    }

    #[test]
    fn double_formatting() {
        assert_eq!(double_to_string(15.0), "15");
        assert_eq!(double_to_string(0.5), "0.5");
        assert_eq!(double_to_string(f64::INFINITY), "Inf");
        assert_eq!(double_to_string(f64::NEG_INFINITY), "-Inf");
        assert_eq!(double_to_string(f64::NAN), "NaN");
    }

    #[test_case("Az", "Ba"; "mixed case az to ba")]
    #[test_case("zz", "aaa"; "lowercase zz carries to aaa")]
    #[test_case("a9", "b0"; "digit carry within letter")]
    #[test_case("Zz", "AAa"; "uppercase zz carries to aaa")]
    #[test_case("09", "10"; "digit zz carries to 10")]
    #[test_case("99", "100"; "double digit carry to 100")]
    fn magic_increments(input: &str, expect: &str) {
        assert!(is_magic_incrementable(input));
        assert_eq!(magic_increment(input), expect);
    }

    #[test]
    fn magic_class_excludes_mixed_order() {
        assert!(!is_magic_incrementable("9a"));
        assert!(!is_magic_incrementable("a.b"));
        assert!(!is_magic_incrementable(""));
    }

    // Stringified integers must parse back to themselves.
    #[quickcheck]
    fn int_string_round_trip(i: i64) -> bool {
        parse_numeric_prefix(&i.to_string()) == NumView::Int(i)
    }

    // Shortest round-trip formatting must preserve finite doubles.
    #[quickcheck]
    fn double_string_round_trip(d: f64) -> bool {
        if !d.is_finite() {
            return true;
        }
        let s = double_to_string(d);
        let back = match parse_numeric_prefix(&s) {
            NumView::Int(i) => i as f64,
            NumView::Double(x) => x,
        };
        back == d || (back - d).abs() <= f64::EPSILON * d.abs()
    }
}
