//! Learns a manifest's column layout from example tokens the operator picks
//! on one line, then replays it over every line of every page.

use dockmark_core::{clean_reference, dedup_entries, group_lines, Line, ManifestEntry, Token};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::util::digits_only;

#[derive(Debug, Error, PartialEq)]
pub enum LearnError {
    #[error("Example tokens are not on the same line (y = {order_y} vs {reference_y})")]
    NotSameLine { order_y: f64, reference_y: f64 },
    #[error("Order and reference examples fall in the same column")]
    SameColumn,
    #[error("Example '{0}' does not hold a plausible order number")]
    InvalidOrderExample(String),
    #[error("Example '{0}' does not hold a plausible reference")]
    InvalidReferenceExample(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Maximum vertical distance between tokens of one line, in page units.
    pub line_quantum: f64,
    /// Maximum horizontal distance between a token and a column anchor.
    pub column_tolerance: f64,
    pub min_order_digits: usize,
    pub max_order_digits: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            line_quantum: 4.0,
            column_tolerance: 20.0,
            min_order_digits: 5,
            max_order_digits: 12,
        }
    }
}

/// The tokens the operator clicked, all taken from one manifest line.
#[derive(Debug, Clone, Copy)]
pub struct ColumnExamples<'a> {
    pub order: &'a Token,
    pub reference: &'a Token,
    pub packages: Option<&'a Token>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Order,
    Reference,
    Packages,
}

/// Column anchors inferred from [`ColumnExamples`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    pub order_x: f64,
    pub reference_x: f64,
    pub packages_x: Option<f64>,
    config: LearnerConfig,
}

impl ColumnLayout {
    pub fn learn(examples: ColumnExamples<'_>, config: LearnerConfig) -> Result<Self, LearnError> {
        let ColumnExamples { order, reference, packages } = examples;

        if (order.y - reference.y).abs() > config.line_quantum {
            return Err(LearnError::NotSameLine { order_y: order.y, reference_y: reference.y });
        }
        if (order.x - reference.x).abs() <= config.column_tolerance {
            return Err(LearnError::SameColumn);
        }

        let layout = Self {
            order_x: order.x,
            reference_x: reference.x,
            packages_x: packages.map(|t| t.x),
            config,
        };
        if layout.order_number(&order.text).is_none() {
            return Err(LearnError::InvalidOrderExample(order.text.clone()));
        }
        if clean_reference(&reference.text).is_none() {
            return Err(LearnError::InvalidReferenceExample(reference.text.clone()));
        }

        debug!(order_x = layout.order_x, reference_x = layout.reference_x, "learned column layout");
        Ok(layout)
    }

    /// Entries from every page, deduplicated by `(order, reference)`.
    pub fn extract(&self, pages: &[Vec<Token>]) -> Vec<ManifestEntry> {
        let entries: Vec<ManifestEntry> =
            pages.iter().flat_map(|page| self.extract_page(page)).collect();
        let entries = dedup_entries(entries);
        info!(pages = pages.len(), entries = entries.len(), "spatial manifest extraction done");
        entries
    }

    /// Entries from one page, in top-to-bottom line order.
    ///
    /// Lines without both a valid order number and a valid reference (headers,
    /// footers, totals) are skipped.
    pub fn extract_page(&self, tokens: &[Token]) -> Vec<ManifestEntry> {
        group_lines(tokens, self.config.line_quantum)
            .iter()
            .filter_map(|line| self.extract_line(line))
            .collect()
    }

    fn extract_line(&self, line: &Line<'_>) -> Option<ManifestEntry> {
        let mut order = Vec::new();
        let mut reference = Vec::new();
        let mut packages = Vec::new();

        for token in &line.tokens {
            match self.nearest_column(token.x) {
                Some(Column::Order) => order.push(token.text.as_str()),
                Some(Column::Reference) => reference.push(token.text.as_str()),
                Some(Column::Packages) => packages.push(token.text.as_str()),
                None => {}
            }
        }

        let order_number = self.order_number(&order.join(" "))?;
        let amazon_ref = clean_reference(&reference.join(" "))?;
        let total_packages = digits_only(&packages.join(" ")).parse().unwrap_or(0);

        ManifestEntry::new(order_number, amazon_ref, total_packages).ok()
    }

    /// The column whose anchor is closest to `x`, if any lies within tolerance.
    fn nearest_column(&self, x: f64) -> Option<Column> {
        let anchors = [
            (Column::Order, Some(self.order_x)),
            (Column::Reference, Some(self.reference_x)),
            (Column::Packages, self.packages_x),
        ];
        anchors
            .iter()
            .filter_map(|(column, anchor)| anchor.map(|a| (*column, (x - a).abs())))
            .filter(|(_, distance)| *distance <= self.config.column_tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(column, _)| column)
    }

    fn order_number(&self, text: &str) -> Option<String> {
        let digits = digits_only(text);
        (self.config.min_order_digits..=self.config.max_order_digits)
            .contains(&digits.len())
            .then_some(digits)
    }
}

/// Learn the layout from `examples` and replay it across `pages`.
pub fn learn_manifest(
    pages: &[Vec<Token>],
    examples: ColumnExamples<'_>,
    config: LearnerConfig,
) -> Result<Vec<ManifestEntry>, LearnError> {
    Ok(ColumnLayout::learn(examples, config)?.extract(pages))
}

/// Find the first line on `page` holding tokens whose text equals `order` and
/// `reference` (and `packages`, when given). Used to pick examples by text.
pub fn find_examples<'a>(
    page: &'a [Token],
    order: &str,
    reference: &str,
    packages: Option<&str>,
    config: &LearnerConfig,
) -> Option<ColumnExamples<'a>> {
    let find_on = |line: &Line<'a>, text: &str| -> Option<&'a Token> {
        line.tokens.iter().copied().find(|t| t.text.trim().eq_ignore_ascii_case(text.trim()))
    };

    group_lines(page, config.line_quantum).into_iter().find_map(|line| {
        let order = find_on(&line, order)?;
        let reference = find_on(&line, reference)?;
        let packages = match packages {
            Some(text) => Some(find_on(&line, text)?),
            None => None,
        };
        Some(ColumnExamples { order, reference, packages })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(text: &str, x: f64, y: f64) -> Token {
        Token::new(text, x, y, 40.0, 8.0)
    }

    fn sample_page() -> Vec<Token> {
        vec![
            tok("Pedido", 50.0, 700.0),
            tok("Referencia", 200.0, 700.0),
            tok("Bultos", 400.0, 700.0),
            tok("10000001", 50.0, 680.0),
            tok("FBA15ABC01", 201.0, 680.2),
            tok("2", 402.0, 680.0),
            tok("10000002", 52.0, 660.0),
            tok("FBA15ABC02", 199.0, 660.0),
            tok("1", 401.0, 660.0),
            tok("10000003", 49.0, 640.0),
            tok("FBA15ABC03", 200.0, 639.8),
            tok("3", 400.0, 640.0),
            tok("Total bultos: 6", 50.0, 100.0),
        ]
    }

    #[test]
    fn header_and_footer_lines_are_skipped() {
        let page = sample_page();
        let examples = ColumnExamples { order: &page[3], reference: &page[4], packages: None };
        let entries = learn_manifest(&[page.clone()], examples, LearnerConfig::default()).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].order_number, "10000001");
        assert_eq!(entries[0].amazon_ref, "FBA15ABC01");
        assert_eq!(entries[2].amazon_ref, "FBA15ABC03");
        assert_eq!(entries[0].total_packages, 0);
    }

    #[test]
    fn packages_column_fills_totals() {
        let page = sample_page();
        let examples =
            ColumnExamples { order: &page[3], reference: &page[4], packages: Some(&page[5]) };
        let entries = learn_manifest(&[page.clone()], examples, LearnerConfig::default()).unwrap();
        let totals: Vec<u32> = entries.iter().map(|e| e.total_packages).collect();
        assert_eq!(totals, vec![2, 1, 3]);
    }

    #[test]
    fn replays_across_pages_and_dedups() {
        let page = sample_page();
        let second = vec![
            tok("10000003", 50.0, 700.0),
            tok("FBA15ABC03", 200.0, 700.0),
            tok("10000004", 50.0, 680.0),
            tok("FBA15ABC04", 200.0, 680.0),
        ];
        let examples = ColumnExamples { order: &page[3], reference: &page[4], packages: None };
        let entries =
            learn_manifest(&[page.clone(), second], examples, LearnerConfig::default()).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[3].order_number, "10000004");
    }

    #[test]
    fn slightly_skewed_row_is_still_learned() {
        let page = vec![
            tok("10000001", 50.0, 700.0),
            tok("FBA15ABC01", 200.0, 700.0),
            tok("10000002", 50.0, 662.1),
            tok("FBA15ABC02", 200.0, 661.9),
        ];
        let examples = ColumnExamples { order: &page[0], reference: &page[1], packages: None };
        let entries = learn_manifest(&[page.clone()], examples, LearnerConfig::default()).unwrap();
        let orders: Vec<&str> = entries.iter().map(|e| e.order_number.as_str()).collect();
        assert_eq!(orders, ["10000001", "10000002"]);
        assert_eq!(entries[1].amazon_ref, "FBA15ABC02");
    }

    #[test]
    fn split_reference_tokens_are_concatenated() {
        let page = vec![
            tok("10000001", 50.0, 680.0),
            tok("FBA15", 200.0, 680.0),
            tok("ABC01", 215.0, 680.0),
        ];
        let examples = ColumnExamples { order: &page[0], reference: &page[1], packages: None };
        let entries = learn_manifest(&[page.clone()], examples, LearnerConfig::default()).unwrap();
        assert_eq!(entries[0].amazon_ref, "FBA15ABC01");
    }

    #[test]
    fn token_goes_to_nearest_anchor() {
        let layout = ColumnLayout {
            order_x: 50.0,
            reference_x: 80.0,
            packages_x: None,
            config: LearnerConfig::default(),
        };
        assert_eq!(layout.nearest_column(66.0), Some(Column::Reference));
        assert_eq!(layout.nearest_column(64.0), Some(Column::Order));
        assert_eq!(layout.nearest_column(200.0), None);
    }

    #[test]
    fn examples_must_share_a_line() {
        let page = sample_page();
        let examples = ColumnExamples { order: &page[3], reference: &page[7], packages: None };
        assert!(matches!(
            ColumnLayout::learn(examples, LearnerConfig::default()),
            Err(LearnError::NotSameLine { .. })
        ));
    }

    #[test]
    fn examples_must_be_plausible() {
        let page = sample_page();
        let examples = ColumnExamples { order: &page[0], reference: &page[1], packages: None };
        assert_eq!(
            ColumnLayout::learn(examples, LearnerConfig::default()),
            Err(LearnError::InvalidOrderExample("Pedido".into()))
        );
    }

    #[test]
    fn find_examples_by_text() {
        let page = sample_page();
        let ex = find_examples(&page, "10000002", "fba15abc02", Some("1"), &LearnerConfig::default())
            .unwrap();
        assert_eq!(ex.order.y, 660.0);
        assert_eq!(ex.packages.unwrap().text, "1");
        assert!(find_examples(&page, "10000002", "FBA15ABC01", None, &LearnerConfig::default())
            .is_none());
    }
}
