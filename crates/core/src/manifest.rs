use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::geometry::CoreError;

/// One dock-list row: an order number and the reference printed on its labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub order_number: String,
    pub amazon_ref: String,
    /// Packages shipped under this order; 0 when the manifest does not say.
    #[serde(default)]
    pub total_packages: u32,
}

impl ManifestEntry {
    /// Build an entry, rejecting rows whose order number or reference is blank.
    pub fn new(
        order_number: impl Into<String>,
        amazon_ref: impl Into<String>,
        total_packages: u32,
    ) -> Result<Self, CoreError> {
        let order_number = order_number.into().trim().to_string();
        let amazon_ref = amazon_ref.into().trim().to_uppercase();
        if order_number.is_empty() {
            return Err(CoreError::EmptyManifestField("order number"));
        }
        if amazon_ref.is_empty() {
            return Err(CoreError::EmptyManifestField("reference"));
        }
        Ok(Self { order_number, amazon_ref, total_packages })
    }

    /// Label slots this entry accounts for in sequential assignment.
    pub fn slots(&self) -> u32 {
        self.total_packages.max(1)
    }
}

/// Drop repeated `(order_number, amazon_ref)` pairs, keeping first occurrences.
pub fn dedup_entries(entries: Vec<ManifestEntry>) -> Vec<ManifestEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert((e.order_number.clone(), e.amazon_ref.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trims_and_uppercases() {
        let e = ManifestEntry::new(" 12345678 ", " fba1234567 ", 2).unwrap();
        assert_eq!(e.order_number, "12345678");
        assert_eq!(e.amazon_ref, "FBA1234567");
    }

    #[test]
    fn new_rejects_blank_fields() {
        assert_eq!(
            ManifestEntry::new("  ", "FBA1", 1),
            Err(CoreError::EmptyManifestField("order number"))
        );
        assert_eq!(
            ManifestEntry::new("1234", "", 1),
            Err(CoreError::EmptyManifestField("reference"))
        );
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a = ManifestEntry::new("1", "FBA1", 1).unwrap();
        let b = ManifestEntry::new("1", "FBA1", 3).unwrap();
        let c = ManifestEntry::new("2", "FBA1", 1).unwrap();
        let out = dedup_entries(vec![a.clone(), b, c.clone()]);
        assert_eq!(out, vec![a, c]);
    }

    #[test]
    fn unknown_total_still_takes_one_slot() {
        assert_eq!(ManifestEntry::new("1", "R", 0).unwrap().slots(), 1);
        assert_eq!(ManifestEntry::new("1", "R", 4).unwrap().slots(), 4);
    }
}
