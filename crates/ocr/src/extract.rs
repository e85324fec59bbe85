use std::sync::OnceLock;

use dockmark_core::{clean_reference, PackageHint, Token};
use regex::Regex;

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_fba_reference, r"(?i)FBA[A-Z0-9]+");
re!(re_long_reference, r"[A-Z0-9]{12,30}");
re!(re_package_statement, r"(?i)(\d+)\s*(?:de|of|out\s+of|/)\s*(\d+)");

// ── Public extraction API ─────────────────────────────────────────────────────

/// What can be read from a label's text layer without touching pixels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelText {
    pub reference: Option<String>,
    pub hint: PackageHint,
}

pub fn parse_label_text(text: &str) -> LabelText {
    LabelText { reference: find_reference(text), hint: parse_package_statement(text) }
}

/// A usable marketplace reference (`FBA…`) wins; otherwise the first long
/// upper-case alphanumeric run.
pub fn find_reference(text: &str) -> Option<String> {
    re_fba_reference()
        .find_iter(text)
        .chain(re_long_reference().find_iter(text))
        .find_map(|m| clean_reference(m.as_str()))
}

/// Read "N of M" style statements ("1 de 3", "2/4", "1 out of 2").
/// Statements where the sequence exceeds the total are ignored.
pub fn parse_package_statement(text: &str) -> PackageHint {
    for caps in re_package_statement().captures_iter(text) {
        let (Ok(seq), Ok(total)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            continue;
        };
        if seq >= 1 && seq <= total {
            return PackageHint { sequence: Some(seq), total: Some(total) };
        }
    }
    PackageHint::default()
}

/// First alphanumeric character of a single-glyph OCR result, uppercased.
pub fn glyph_char(ocr_text: &str) -> Option<char> {
    ocr_text.chars().find(|c| c.is_ascii_alphanumeric()).map(|c| c.to_ascii_uppercase())
}

/// Join a label's text-layer tokens in reading order.
pub fn tokens_text(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fba_reference_preferred() {
        let t = parse_label_text("SHIP TO ABCDEFGHIJKLMNOP\nfba15abcdefg\n");
        assert_eq!(t.reference.as_deref(), Some("FBA15ABCDEFG"));
    }

    #[test]
    fn short_fba_fragment_falls_through_to_long_run() {
        assert_eq!(find_reference("FBA1 ABCDEFGHIJKLM").as_deref(), Some("ABCDEFGHIJKLM"));
    }

    #[test]
    fn long_uppercase_run_is_fallback() {
        assert_eq!(find_reference("ref: X00ABC123456Z").as_deref(), Some("X00ABC123456Z"));
        // Lower case runs are not references.
        assert_eq!(find_reference("abcdefghijklmnop"), None);
        assert_eq!(find_reference("short ABC123"), None);
    }

    #[test]
    fn package_statement_variants() {
        let expect = |seq, total| PackageHint { sequence: Some(seq), total: Some(total) };
        assert_eq!(parse_package_statement("Bulto 1 de 3"), expect(1, 3));
        assert_eq!(parse_package_statement("PACKAGE 2 OF 4"), expect(2, 4));
        assert_eq!(parse_package_statement("box 1 out of 2"), expect(1, 2));
        assert_eq!(parse_package_statement("3/5"), expect(3, 5));
    }

    #[test]
    fn implausible_statements_are_ignored() {
        assert!(parse_package_statement("date 12/05").is_empty());
        assert!(parse_package_statement("0 of 3").is_empty());
        assert_eq!(parse_package_statement("12/05 then 1/2").sequence, Some(1));
    }

    #[test]
    fn glyph_char_takes_first_alphanumeric() {
        assert_eq!(glyph_char(" a\n"), Some('A'));
        assert_eq!(glyph_char("|7"), Some('7'));
        assert_eq!(glyph_char("  \n"), None);
    }

    #[test]
    fn tokens_are_joined_with_spaces() {
        let tokens = vec![Token::new("FBA15", 0.0, 0.0, 1.0, 1.0), Token::new("1/2", 5.0, 0.0, 1.0, 1.0)];
        assert_eq!(tokens_text(&tokens), "FBA15 1/2");
    }
}
