//! Decimal string comparison.
//!
//! Balances are integers far beyond `u64`/`f64` precision, so they are
//! compared on their canonical textual form instead of being parsed.

/// Whether two decimal strings denote the same number.
///
/// Leading zeros, trailing fractional zeros, a leading `+` and the sign of
/// zero are ignored. Input is assumed to be a plain decimal literal.
pub fn decimal_eq(a: &str, b: &str) -> bool {
    canonical(a) == canonical(b)
}

fn canonical(value: &str) -> (bool, &str, &str) {
    let value = value.trim();
    let (negative, digits) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let (int, frac) = digits.split_once('.').unwrap_or((digits, ""));
    let int = int.trim_start_matches('0');
    let frac = frac.trim_end_matches('0');
    let int = if int.is_empty() { "0" } else { int };
    let negative = negative && !(int == "0" && frac.is_empty());
    (negative, int, frac)
}
