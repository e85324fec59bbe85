//! Reference canonicalization.
//!
//! [`normalize`] produces the comparison key used on both sides of a manifest
//! match. [`clean_reference`] decides whether a raw read is usable at all.

/// Glyphs that OCR and low-resolution barcodes routinely confuse, mapped to
/// the digit they are folded into. Tuned for one carrier's label font.
pub const CONFUSABLES: &[(char, char)] = &[
    ('O', '0'),
    ('Q', '0'),
    ('D', '0'),
    ('I', '1'),
    ('L', '1'),
    ('J', '1'),
    ('T', '1'),
    ('|', '1'),
    ('S', '5'),
    ('Z', '2'),
    ('E', '6'),
    ('G', '6'),
    ('B', '6'),
    ('Y', '9'),
];

/// Shortest and longest cleaned reference accepted as a usable read.
pub const MIN_REFERENCE_LEN: usize = 5;
pub const MAX_REFERENCE_LEN: usize = 30;

fn fold_confusable(c: char) -> char {
    CONFUSABLES
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
        .unwrap_or(c)
}

/// Canonical comparison key: uppercase, no whitespace, confusables folded.
///
/// Pure and idempotent. The key is only ever compared, never displayed.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_uppercase)
        .filter(|c| !c.is_whitespace())
        .map(fold_confusable)
        .collect()
}

/// Strip a raw read down to an uppercase alphanumeric reference.
///
/// Returns `None` when what is left is too short or too long to be a
/// carrier/marketplace reference.
pub fn clean_reference(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    (MIN_REFERENCE_LEN..=MAX_REFERENCE_LEN)
        .contains(&cleaned.len())
        .then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn folds_zero_lookalikes() {
        assert_eq!(normalize("O0Q"), "000");
    }

    #[test]
    fn uppercases_and_strips_whitespace() {
        assert_eq!(normalize(" fba 12\t34\n"), "F6A1234");
    }

    #[test]
    fn applies_whole_table() {
        assert_eq!(normalize("ODQILJT|SZEGBY"), "00011111526669");
    }

    #[test]
    fn digits_and_unlisted_letters_pass_through() {
        assert_eq!(normalize("AC0123456789"), "AC0123456789");
    }

    #[test]
    fn clean_reference_strips_punctuation() {
        assert_eq!(clean_reference(" fba-123.45x ").as_deref(), Some("FBA12345X"));
    }

    #[test]
    fn clean_reference_length_window() {
        assert_eq!(clean_reference("AB12"), None);
        assert_eq!(clean_reference("AB123").as_deref(), Some("AB123"));
        assert_eq!(clean_reference(&"A".repeat(31)), None);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(s in "\\PC*") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn normalize_never_keeps_whitespace(s in "[a-zA-Z0-9 \t]{0,40}") {
            prop_assert!(!normalize(&s).chars().any(char::is_whitespace));
        }
    }
}
