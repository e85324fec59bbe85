use std::sync::OnceLock;

use dockmark_core::{dedup_entries, ManifestEntry};
use regex::Regex;
use tracing::debug;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_order, r"\b(\d{6,8})\b");
re!(re_reference, r"(?i)(FBA[A-Z0-9]+|[A-Z0-9]{12,})");
re!(re_order_token, r"^\d{6,8}$");
re!(re_reference_token, r"(?i)^FBA|^[A-Z0-9]{12,}$");

/// How many tokens after an order number the proximity pass looks for its
/// reference.
const PROXIMITY_WINDOW: usize = 9;

/// Parse order/reference pairs out of free manifest text (a text export or a
/// full-page OCR dump).
///
/// Each line is tried for an order number and a reference. When no line
/// yields a pair, the text is re-read as a token stream and every order
/// number is paired with the first reference-shaped token that follows it.
pub fn parse_manifest_text(text: &str) -> Vec<ManifestEntry> {
    let by_line: Vec<ManifestEntry> = text.lines().filter_map(parse_line).collect();
    if !by_line.is_empty() {
        return dedup_entries(by_line);
    }

    debug!("no order/reference pair on any line, falling back to token proximity");
    dedup_entries(parse_by_proximity(text))
}

fn parse_line(line: &str) -> Option<ManifestEntry> {
    let order = re_order().captures(line)?.get(1)?.as_str();
    let reference = re_reference()
        .find_iter(line)
        .map(|m| m.as_str())
        .find(|r| *r != order)?;
    ManifestEntry::new(order, reference, 0).ok()
}

fn parse_by_proximity(text: &str) -> Vec<ManifestEntry> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut entries = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        if !re_order_token().is_match(token) {
            continue;
        }
        let reference = tokens
            .iter()
            .skip(i + 1)
            .take(PROXIMITY_WINDOW)
            .find(|t| re_reference_token().is_match(t));
        if let Some(reference) = reference {
            if let Ok(entry) = ManifestEntry::new(*token, *reference, 0) {
                entries.push(entry);
            }
        }
    }

    entries
}
