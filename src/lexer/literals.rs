//! Numeric literal scanners.
//!
//! Words that fail both of these are identifiers (possibly split at dots).

fn octal_digit(c: u8) -> Option<u32> {
    match c {
        b'0'..=b'7' => Some((c - b'0') as u32),
        _ => None,
    }
}

fn decimal_digit(c: u8) -> Option<u32> {
    c.is_ascii_digit().then(|| (c - b'0') as u32)
}

fn hex_digit(c: u8) -> Option<u32> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as u32),
        b'a'..=b'f' => Some((c - b'a' + 10) as u32),
        b'A'..=b'F' => Some((c - b'A' + 10) as u32),
        _ => None,
    }
}

pub(super) fn escape_octal(c: u8) -> Option<u32> {
    octal_digit(c)
}

pub(super) fn escape_hex(c: u8) -> Option<u32> {
    hex_digit(c)
}

/// Parse an integer literal: base 10, `0x` hex, `0b` binary, or leading-zero
/// octal. A lone `0` is zero.
pub fn try_parse_int(word: &str) -> Option<u64> {
    let bytes = word.as_bytes();
    let mut base = 10u64;
    let mut ptr = 0;
    if bytes.first() == Some(&b'0') {
        ptr = 2;
        match bytes.get(1) {
            None => return Some(0),
            Some(b'x') | Some(b'X') => base = 16,
            Some(b'b') | Some(b'B') => base = 2,
            Some(c) if octal_digit(*c).is_some() => {
                base = 8;
                ptr = 1;
            }
            _ => return None,
        }
    }
    if ptr >= bytes.len() {
        return None;
    }
    let mut out = 0u64;
    for &c in &bytes[ptr..] {
        let digit = hex_digit(c)? as u64;
        if digit >= base {
            return None;
        }
        out = out.wrapping_mul(base).wrapping_add(digit);
    }
    Some(out)
}

#[derive(PartialEq)]
enum FloatState {
    Integer,
    Fraction,
    Exponent,
    ExponentFirstChar,
    ExponentFirstCharNoSign,
}

/// Parse a float literal: decimal with optional fraction and `e` exponent, or
/// hex with a mandatory `p` binary exponent. The exponent digits are always
/// base 10.
pub fn try_parse_float(word: &str) -> Option<f64> {
    use FloatState::*;
    let bytes = word.as_bytes();
    let mut base = 10u32;
    let mut ptr = 0;
    let mut exp = 0i32;
    let mut frac = 0i32;
    let mut neg_exp = false;
    let mut hex = false;
    let mut state = Integer;
    if bytes.len() >= 2 && bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X') {
        ptr = 2;
        base = 16;
        hex = true;
    }
    if ptr >= bytes.len() {
        return None;
    }
    let mut out = 0.0f64;
    for &c in &bytes[ptr..] {
        let digit = hex_digit(c).filter(|d| *d < base);
        let exp_char = if hex {
            c == b'p' || c == b'P'
        } else {
            c == b'e' || c == b'E'
        };
        match state {
            Integer => {
                if c == b'.' {
                    state = Fraction;
                } else if exp_char {
                    state = ExponentFirstChar;
                    base = 10;
                } else if let Some(d) = digit {
                    out = out * base as f64 + d as f64;
                } else {
                    return None;
                }
            }
            Fraction => {
                if exp_char {
                    state = ExponentFirstChar;
                    base = 10;
                } else if let Some(d) = digit {
                    frac += 1;
                    out += d as f64 * (base as f64).powi(-frac);
                } else {
                    return None;
                }
            }
            Exponent | ExponentFirstChar | ExponentFirstCharNoSign => {
                if (c == b'-' || c == b'+') && state == ExponentFirstChar {
                    neg_exp = c == b'-';
                    state = ExponentFirstCharNoSign;
                    continue;
                }
                let d = decimal_digit(c)?;
                exp = exp * base as i32 + d as i32;
                state = Exponent;
            }
        }
    }
    out *= (if hex { 2.0f64 } else { 10.0 }).powi(if neg_exp { -exp } else { exp });
    let valid = if hex {
        state == Exponent
    } else {
        matches!(state, Integer | Fraction | Exponent)
    };
    valid.then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_bases() {
        assert_eq!(try_parse_int("0"), Some(0));
        assert_eq!(try_parse_int("42"), Some(42));
        assert_eq!(try_parse_int("0x2A"), Some(42));
        assert_eq!(try_parse_int("0X2a"), Some(42));
        assert_eq!(try_parse_int("0b101010"), Some(42));
        assert_eq!(try_parse_int("052"), Some(42));
    }

    #[test]
    fn test_integer_rejects() {
        assert_eq!(try_parse_int("09"), None);
        assert_eq!(try_parse_int("0x"), None);
        assert_eq!(try_parse_int("1f"), None);
        assert_eq!(try_parse_int("abc"), None);
        assert_eq!(try_parse_int("1.5"), None);
    }

    #[test]
    fn test_float_decimal() {
        assert_eq!(try_parse_float("1.5"), Some(1.5));
        assert_eq!(try_parse_float("3"), Some(3.0));
        assert_eq!(try_parse_float(".25"), Some(0.25));
        assert_eq!(try_parse_float("2e3"), Some(2000.0));
        assert_eq!(try_parse_float("2E+3"), Some(2000.0));
        assert_eq!(try_parse_float("1e-2"), Some(0.01));
    }

    #[test]
    fn test_float_hex_needs_exponent() {
        assert_eq!(try_parse_float("0x1p4"), Some(16.0));
        assert_eq!(try_parse_float("0x1.8p1"), Some(3.0));
        assert_eq!(try_parse_float("0x1.8"), None);
    }

    #[test]
    fn test_float_rejects() {
        assert_eq!(try_parse_float("1e"), None);
        assert_eq!(try_parse_float("foo"), None);
        assert_eq!(try_parse_float("1.2.3"), None);
    }
}
