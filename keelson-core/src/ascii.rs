//! Locale-independent ASCII classification and case folding.
//!
//! The libc `ctype` functions consult the active locale, which is exactly
//! wrong for bytes that came off the network.  These helpers classify with
//! fixed 256-bit lookup tables and fold case with fixed 256-entry tables, so
//! their answers never change under `setlocale`.

use std::cmp::Ordering;

// Each table holds 256 bits: bit `b` of `table[(b >> 5) & 7]` is set iff the
// byte value `b` belongs to the class.
const ALPHA_TABLE: [u32; 8] = [0, 0, 0x07ff_fffe, 0x07ff_fffe, 0, 0, 0, 0];
const ALNUM_TABLE: [u32; 8] = [0, 0x03ff_0000, 0x07ff_fffe, 0x07ff_fffe, 0, 0, 0, 0];
const SPACE_TABLE: [u32; 8] = [0x3e00, 0x1, 0, 0, 0, 0, 0, 0];
const XDIGIT_TABLE: [u32; 8] = [0, 0x03ff_0000, 0x7e, 0x7e, 0, 0, 0, 0];
const DIGIT_TABLE: [u32; 8] = [0, 0x03ff_0000, 0, 0, 0, 0, 0, 0];
const PRINT_TABLE: [u32; 8] = [0, 0xffff_ffff, 0xffff_ffff, 0x7fff_ffff, 0, 0, 0, 0];
const UPPER_TABLE: [u32; 8] = [0, 0, 0x07ff_fffe, 0, 0, 0, 0, 0];
const LOWER_TABLE: [u32; 8] = [0, 0, 0, 0x07ff_fffe, 0, 0, 0, 0];

const TOUPPER_TABLE: [u8; 256] = build_case_table(b'a', b'z', -32);
const TOLOWER_TABLE: [u8; 256] = build_case_table(b'A', b'Z', 32);

const fn build_case_table(lo: u8, hi: u8, delta: i16) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut b = 0usize;
    while b < 256 {
        if b as u8 >= lo && b as u8 <= hi {
            table[b] = (b as i16 + delta) as u8;
        } else {
            table[b] = b as u8;
        }
        b += 1;
    }
    table
}

#[inline]
fn in_table(table: &[u32; 8], b: u8) -> bool {
    table[usize::from(b >> 5) & 7] & (1u32 << (b & 31)) != 0
}

#[inline]
pub fn is_alpha(b: u8) -> bool {
    in_table(&ALPHA_TABLE, b)
}

#[inline]
pub fn is_alnum(b: u8) -> bool {
    in_table(&ALNUM_TABLE, b)
}

#[inline]
pub fn is_space(b: u8) -> bool {
    in_table(&SPACE_TABLE, b)
}

#[inline]
pub fn is_digit(b: u8) -> bool {
    in_table(&DIGIT_TABLE, b)
}

#[inline]
pub fn is_xdigit(b: u8) -> bool {
    in_table(&XDIGIT_TABLE, b)
}

#[inline]
pub fn is_print(b: u8) -> bool {
    in_table(&PRINT_TABLE, b)
}

#[inline]
pub fn is_upper(b: u8) -> bool {
    in_table(&UPPER_TABLE, b)
}

#[inline]
pub fn is_lower(b: u8) -> bool {
    in_table(&LOWER_TABLE, b)
}

#[inline]
pub fn to_upper(b: u8) -> u8 {
    TOUPPER_TABLE[usize::from(b)]
}

#[inline]
pub fn to_lower(b: u8) -> u8 {
    TOLOWER_TABLE[usize::from(b)]
}

/// ASCII-only `strcasecmp`: compares two byte strings after folding both
/// through the fixed lowercase table.  Bytes above 0x7f compare by value.
pub fn casecmp(s1: &[u8], s2: &[u8]) -> Ordering {
    let mut a = s1.iter();
    let mut b = s2.iter();
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&c1), Some(&c2)) => {
                let (c1, c2) = (to_lower(c1), to_lower(c2));
                match c1.cmp(&c2) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
        }
    }
}

/// Case-insensitive comparison of at most `n` leading bytes.
pub fn casecmp_n(s1: &[u8], s2: &[u8], n: usize) -> Ordering {
    let end1 = s1.len().min(n);
    let end2 = s2.len().min(n);
    casecmp(&s1[..end1], &s2[..end2])
}

/// Value of an ASCII hex digit, or `None` for any other byte.
pub fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Remove trailing spaces and tabs in place.
pub fn rtrim_lws(s: &mut String) {
    let keep = s
        .as_bytes()
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |p| p + 1);
    s.truncate(keep);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_agree_with_ascii() {
        for b in 0u8..=255 {
            let c = b as char;
            assert_eq!(is_alpha(b), c.is_ascii_alphabetic(), "alpha {b}");
            assert_eq!(is_alnum(b), c.is_ascii_alphanumeric(), "alnum {b}");
            assert_eq!(is_digit(b), c.is_ascii_digit(), "digit {b}");
            assert_eq!(is_xdigit(b), c.is_ascii_hexdigit(), "xdigit {b}");
            assert_eq!(is_upper(b), c.is_ascii_uppercase(), "upper {b}");
            assert_eq!(is_lower(b), c.is_ascii_lowercase(), "lower {b}");
            // C isspace: space, \t, \n, \v, \f, \r
            let space = matches!(b, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r');
            assert_eq!(is_space(b), space, "space {b}");
            // C isprint: 0x20..=0x7e
            assert_eq!(is_print(b), (0x20..=0x7e).contains(&b), "print {b}");
        }
    }

    #[test]
    fn case_folding() {
        assert_eq!(to_lower(b'A'), b'a');
        assert_eq!(to_upper(b'z'), b'Z');
        assert_eq!(to_lower(b'0'), b'0');
        // High-bit bytes are untouched, unlike locale-aware tolower.
        assert_eq!(to_lower(0xc4), 0xc4);
        assert_eq!(to_upper(0xe4), 0xe4);
    }

    #[test]
    fn casecmp_folds_ascii_only() {
        assert_eq!(casecmp(b"HELLO", b"hello"), Ordering::Equal);
        assert_eq!(casecmp(b"abc", b"abd"), Ordering::Less);
        assert_eq!(casecmp(b"abc", b"ab"), Ordering::Greater);
        assert_eq!(casecmp_n(b"HELLOx", b"helloy", 5), Ordering::Equal);
    }

    #[test]
    fn hex_values() {
        assert_eq!(hex_value(b'0'), Some(0));
        assert_eq!(hex_value(b'a'), Some(10));
        assert_eq!(hex_value(b'F'), Some(15));
        assert_eq!(hex_value(b'g'), None);
    }

    #[test]
    fn rtrim_removes_trailing_lws() {
        let mut s = String::from("value \t ");
        rtrim_lws(&mut s);
        assert_eq!(s, "value");
        let mut s = String::from(" \t");
        rtrim_lws(&mut s);
        assert_eq!(s, "");
        let mut s = String::from("no-trim");
        rtrim_lws(&mut s);
        assert_eq!(s, "no-trim");
    }
}
