//! Request number normalisation.
//!
//! Discovery documents number their requests inconsistently: "7", "07",
//! "7a", "7(a)", "7A". Requests and responses are matched on a canonical
//! form, and reports sort on a lexicographic key so that document order is
//! recoverable from the number alone.
//!
//! # Numbering conventions
//!
//! - Plain numeric: No. 1, No. 2, ..., No. 10
//! - Letter suffix (supplemental request): No. 3A between No. 3 and No. 4
//! - Parenthesised letter: No. 3(a) is the same request as No. 3a
//! - Parenthesised number: No. 3(2) canonicalises to "3.2" and sorts after
//!   every lettered subpart of No. 3

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Letter(u8),
    Number(u64),
}

/// Split a raw number into its base and suffix parts.
fn parse(s: &str) -> Option<(u64, Vec<Part>)> {
    let compact: String = s
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    let bytes = compact.as_bytes();

    let digit_end = bytes
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(bytes.len());
    if digit_end == 0 {
        return None;
    }
    let base: u64 = compact[..digit_end].parse().ok()?;

    let mut parts = Vec::new();
    let mut i = digit_end;
    while i < bytes.len() {
        match bytes[i] {
            b'a'..=b'z' => {
                parts.push(Part::Letter(bytes[i]));
                i += 1;
            }
            b'(' => {
                let close = compact[i..].find(')').map(|p| i + p)?;
                let inner = &compact[i + 1..close];
                if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
                    parts.push(Part::Number(inner.parse().ok()?));
                } else if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_lowercase()) {
                    parts.extend(inner.bytes().map(Part::Letter));
                } else {
                    return None;
                }
                i = close + 1;
            }
            b'.' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                let run_end = bytes[i + 1..]
                    .iter()
                    .position(|b| !b.is_ascii_digit())
                    .map_or(bytes.len(), |p| i + 1 + p);
                parts.push(Part::Number(compact[i + 1..run_end].parse().ok()?));
                i = run_end;
            }
            _ => return None,
        }
    }

    Some((base, parts))
}

/// Canonicalise a request number for matching.
///
/// Strips whitespace and leading zeros, unwraps parenthesised letters, and
/// lowercases: "07" → "7", "7(A)" → "7a", " 12b " → "12b", "3(2)" → "3.2".
/// Returns `None` when the input has no leading digits or an unrecognised
/// suffix.
pub fn canonical_number(s: &str) -> Option<String> {
    let (base, parts) = parse(s)?;
    let mut out = base.to_string();
    for part in parts {
        match part {
            Part::Letter(b) => out.push(char::from(b)),
            Part::Number(n) => {
                out.push('.');
                out.push_str(&n.to_string());
            }
        }
    }
    Some(out)
}

/// Normalise a request number into a lexicographically-sortable string.
///
/// Input: canonical or raw number like "3", "3a", "3(b)", "3(2)"
/// Output: "0003.000.000", "0003.010.000", "0003.020.000", "0003.902.000"
///
/// # Algorithm
///
/// 1. Extract leading ASCII digits → base number (zero-padded to 4 digits)
/// 2. Map up to 2 suffix parts to segments:
///    - Letter: a=010, b=020, ..., z=260 (gaps of 10 for inserted requests)
///    - Number: 900 + n, capped at 999, so numeric subparts follow letters
/// 3. Pad to exactly 3 segments with "000"
/// 4. Join with "."
///
/// Unparseable numbers sort last.
pub fn sort_key(s: &str) -> String {
    let Some((base, parts)) = parse(s) else {
        return "9999.999.999".to_string();
    };

    let mut segments: Vec<u64> = vec![base.min(9998)];
    for part in parts.into_iter().take(2) {
        segments.push(match part {
            Part::Letter(b) => u64::from(b - b'a' + 1) * 10,
            Part::Number(n) => (900 + n).min(999),
        });
    }
    while segments.len() < 3 {
        segments.push(0);
    }

    format!("{:04}.{:03}.{:03}", segments[0], segments[1], segments[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: assert a list of inputs produces sort keys in strictly ascending order.
    fn assert_sorted_order(inputs: &[&str]) {
        let keys: Vec<String> = inputs.iter().map(|s| sort_key(s)).collect();
        for i in 1..keys.len() {
            assert!(
                keys[i - 1] < keys[i],
                "Expected {:?} ({}) < {:?} ({})",
                inputs[i - 1],
                keys[i - 1],
                inputs[i],
                keys[i],
            );
        }
    }

    #[test]
    fn canonical_strips_zeros_and_parens() {
        assert_eq!(canonical_number("07").as_deref(), Some("7"));
        assert_eq!(canonical_number("7(A)").as_deref(), Some("7a"));
        assert_eq!(canonical_number(" 12b ").as_deref(), Some("12b"));
        assert_eq!(canonical_number("3 (2)").as_deref(), Some("3.2"));
    }

    #[test]
    fn parenthesised_number_does_not_collide() {
        assert_ne!(canonical_number("3(2)"), canonical_number("32"));
    }

    #[test]
    fn canonical_rejects_non_numeric() {
        assert_eq!(canonical_number(""), None);
        assert_eq!(canonical_number("A"), None);
        assert_eq!(canonical_number("__"), None);
        assert_eq!(canonical_number("4-b"), None);
        assert_eq!(canonical_number("4(b"), None);
    }

    #[test]
    fn equivalent_forms_share_a_key() {
        assert_eq!(sort_key("7(a)"), sort_key("7A"));
        assert_eq!(sort_key("007"), sort_key("7"));
        assert_eq!(sort_key("3(2)"), sort_key("3.2"));
    }

    #[test]
    fn plain_numeric_sequence() {
        assert_sorted_order(&["1", "2", "3", "9", "10", "11", "100"]);
    }

    #[test]
    fn letter_suffix_insertion() {
        assert_sorted_order(&["3", "3a", "3b", "3z", "3(1)", "3(2)", "4"]);
    }

    #[test]
    fn exact_values() {
        assert_eq!(sort_key("3"), "0003.000.000");
        assert_eq!(sort_key("3a"), "0003.010.000");
        assert_eq!(sort_key("3ab"), "0003.010.020");
        assert_eq!(sort_key("3(2)"), "0003.902.000");
        assert_eq!(sort_key("42"), "0042.000.000");
    }

    #[test]
    fn unnumbered_sorts_last() {
        assert_sorted_order(&["9998", "x"]);
    }
}
