use dockmark_core::{dedup_entries, ManifestEntry};
use serde::{Deserialize, Serialize};
use std::io::Read;
use thiserror::Error;

use crate::util::digits_only;

/// Column positions for a manifest export with a known layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvColumnMapping {
    pub order_column: usize,
    pub reference_column: usize,
    pub packages_column: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvManifestProfile {
    pub name: String,
    /// `None` auto-detects the order and reference cells on every row.
    pub mapping: Option<CsvColumnMapping>,
    pub has_header: bool,
    pub delimiter: String,
}

impl Default for CsvManifestProfile {
    fn default() -> Self {
        Self {
            name: "Auto-detect".to_string(),
            mapping: None,
            has_header: false,
            delimiter: ",".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("No data rows")]
    NoDataRows,
}

pub struct CsvImporter;

impl CsvImporter {
    /// Parse rows with an explicit column mapping.
    pub fn parse_mapped<R: Read>(
        reader: &mut csv::Reader<R>,
        mapping: &CsvColumnMapping,
    ) -> Result<Vec<ManifestEntry>, CsvError> {
        let mut entries = Vec::new();

        for result in reader.records() {
            let record = result?;
            if record.iter().all(|c| c.trim().is_empty()) {
                continue;
            }

            let order = record.get(mapping.order_column).ok_or_else(|| {
                CsvError::MissingColumn(format!("order_column {}", mapping.order_column))
            })?;
            let reference = record.get(mapping.reference_column).ok_or_else(|| {
                CsvError::MissingColumn(format!("reference_column {}", mapping.reference_column))
            })?;
            let packages = mapping
                .packages_column
                .and_then(|col| record.get(col))
                .map(|s| digits_only(s).parse().unwrap_or(0))
                .unwrap_or(0);

            // Rows with a blank order or reference never become entries.
            if let Ok(entry) = ManifestEntry::new(clean_cell(order), clean_cell(reference), packages) {
                entries.push(entry);
            }
        }

        finish(entries)
    }

    /// Parse rows whose layout is unknown: the reference is the first cell
    /// that starts with `FBA` or is longer than five characters, the order
    /// number is the first all-digit cell.
    pub fn parse_detected<R: Read>(
        reader: &mut csv::Reader<R>,
    ) -> Result<Vec<ManifestEntry>, CsvError> {
        let mut entries = Vec::new();

        for result in reader.records() {
            let record = result?;
            let cells: Vec<String> = record.iter().map(clean_cell).collect();
            if cells.len() < 2 {
                continue;
            }
            if let Some(entry) = detect_row(&cells) {
                entries.push(entry);
            }
        }

        finish(entries)
    }
}

fn detect_row(cells: &[String]) -> Option<ManifestEntry> {
    let is_order = |c: &String| !c.is_empty() && c.chars().all(|ch| ch.is_ascii_digit());
    let order = cells.iter().find(|c| is_order(c))?;
    let reference = cells
        .iter()
        .filter(|c| *c != order)
        .find(|c| c.to_uppercase().starts_with("FBA") || c.len() > 5)?;
    ManifestEntry::new(order.as_str(), reference.as_str(), 0).ok()
}

fn clean_cell(cell: &str) -> String {
    cell.trim().replace('"', "")
}

fn finish(entries: Vec<ManifestEntry>) -> Result<Vec<ManifestEntry>, CsvError> {
    let entries = dedup_entries(entries);
    if entries.is_empty() {
        return Err(CsvError::NoDataRows);
    }
    Ok(entries)
}

/// Sniff the delimiter of a manifest export from its first line.
pub fn detect_delimiter(sample: &str) -> u8 {
    let first = sample.lines().next().unwrap_or_default();
    [b';', b'\t', b',']
        .into_iter()
        .max_by_key(|d| first.bytes().filter(|b| b == d).count())
        .filter(|d| first.as_bytes().contains(d))
        .unwrap_or(b',')
}

pub fn import_csv<R: Read>(
    data: R,
    profile: &CsvManifestProfile,
) -> Result<Vec<ManifestEntry>, CsvError> {
    let delimiter = profile
        .delimiter
        .as_bytes()
        .first()
        .copied()
        .unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(profile.has_header)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(data);

    match &profile.mapping {
        Some(mapping) => CsvImporter::parse_mapped(&mut reader, mapping),
        None => CsvImporter::parse_detected(&mut reader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped_profile() -> CsvManifestProfile {
        CsvManifestProfile {
            name: "dock list".to_string(),
            has_header: true,
            delimiter: ";".to_string(),
            mapping: Some(CsvColumnMapping {
                order_column: 0,
                reference_column: 2,
                packages_column: Some(3),
            }),
        }
    }

    #[test]
    fn import_mapped_columns() {
        let data = b"pedido;cliente;ref;bultos\n10000001;ACME;FBA15ABC01;2\n10000002;ACME;fba15abc02;1\n";
        let entries = import_csv(data.as_ref(), &mapped_profile()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].order_number, "10000001");
        assert_eq!(entries[0].total_packages, 2);
        assert_eq!(entries[1].amazon_ref, "FBA15ABC02");
    }

    #[test]
    fn mapped_rows_with_blank_fields_are_dropped() {
        let data = b"pedido;cliente;ref;bultos\n10000001;ACME;;2\n10000002;ACME;FBA2;1\n";
        let entries = import_csv(data.as_ref(), &mapped_profile()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].order_number, "10000002");
    }

    #[test]
    fn mapped_missing_column_errors() {
        let data = b"pedido;cliente\n10000001;ACME\n";
        let result = import_csv(data.as_ref(), &mapped_profile());
        assert!(matches!(result, Err(CsvError::MissingColumn(_))));
    }

    #[test]
    fn detect_order_and_reference_anywhere() {
        let data = b"\"FBA15ABC01\",\"10000001\"\nACME,10000002,X00ABCDEF\nshort,row\n";
        let entries = import_csv(data.as_ref(), &CsvManifestProfile::default()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amazon_ref, "FBA15ABC01");
        assert_eq!(entries[0].order_number, "10000001");
        assert_eq!(entries[1].amazon_ref, "X00ABCDEF");
    }

    #[test]
    fn duplicate_rows_collapse() {
        let data = b"10000001,FBA15ABC01\n10000001,FBA15ABC01\n";
        let entries = import_csv(data.as_ref(), &CsvManifestProfile::default()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn no_rows_errors() {
        let data = b"header,only\n";
        let result = import_csv(data.as_ref(), &CsvManifestProfile::default());
        assert!(matches!(result, Err(CsvError::NoDataRows)));
    }

    #[test]
    fn delimiter_sniffing() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(detect_delimiter("a\tb"), b'\t');
        assert_eq!(detect_delimiter("a,b"), b',');
        assert_eq!(detect_delimiter("single"), b',');
    }
}
