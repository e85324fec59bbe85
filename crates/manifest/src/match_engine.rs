use dockmark_core::{normalize, ManifestEntry, MatchCandidate, PackageInfo};
use tracing::debug;

use crate::util::similarity;

/// Containment only counts when the contained key is longer than this, so
/// short numeric fragments cannot match every row.
pub const MIN_CONTAINMENT_LEN: usize = 6;

/// Lowest similarity at which a missed row is offered as a suggestion.
pub const SUGGESTION_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    /// The label read is a fragment of the manifest reference.
    CandidateInEntry,
    /// The manifest reference is embedded in a padded label read.
    EntryInCandidate,
}

#[derive(Debug, Clone)]
pub struct MatchResult<'a> {
    pub entry: &'a ManifestEntry,
    /// Position of `entry` in the manifest.
    pub index: usize,
    pub match_type: MatchType,
}

/// Matches label reads against a manifest on normalized keys.
pub struct ReferenceMatcher {
    entries: Vec<ManifestEntry>,
    keys: Vec<String>,
    min_containment_len: usize,
}

impl ReferenceMatcher {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        let keys = entries.iter().map(|e| normalize(&e.amazon_ref)).collect();
        Self { entries, keys, min_containment_len: MIN_CONTAINMENT_LEN }
    }

    pub fn with_min_containment_len(mut self, len: usize) -> Self {
        self.min_containment_len = len;
        self
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First manifest row, in manifest order, that the candidate matches.
    pub fn find(&self, candidate: &str) -> Option<MatchResult<'_>> {
        let key = normalize(candidate);
        if key.is_empty() {
            return None;
        }

        let found = self
            .keys
            .iter()
            .enumerate()
            .find_map(|(index, entry_key)| {
                self.match_keys(&key, entry_key).map(|match_type| MatchResult {
                    entry: &self.entries[index],
                    index,
                    match_type,
                })
            });

        if let Some(m) = &found {
            debug!(candidate, order = %m.entry.order_number, kind = ?m.match_type, "manifest hit");
        }
        found
    }

    fn match_keys(&self, candidate: &str, entry: &str) -> Option<MatchType> {
        if candidate == entry {
            return Some(MatchType::Exact);
        }
        if candidate.len() > self.min_containment_len && entry.contains(candidate) {
            return Some(MatchType::CandidateInEntry);
        }
        if entry.len() > self.min_containment_len && candidate.contains(entry) {
            return Some(MatchType::EntryInCandidate);
        }
        None
    }

    /// Closest rows by edit similarity, best first, for operator review.
    pub fn suggest(&self, candidate: &str, limit: usize) -> Vec<MatchCandidate> {
        let key = normalize(candidate);
        if key.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .keys
            .iter()
            .enumerate()
            .map(|(i, entry_key)| (i, similarity(&key, entry_key)))
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        scored
            .into_iter()
            .take(limit)
            .map(|(i, confidence)| MatchCandidate {
                order_number: self.entries[i].order_number.clone(),
                amazon_ref: self.entries[i].amazon_ref.clone(),
                confidence,
            })
            .collect()
    }
}

/// Hands out manifest rows to labels in order, one slot per package.
pub struct SequentialAssigner<'a> {
    entries: &'a [ManifestEntry],
    entry: usize,
    sequence: u32,
}

impl<'a> SequentialAssigner<'a> {
    pub fn new(entries: &'a [ManifestEntry]) -> Self {
        Self { entries, entry: 0, sequence: 0 }
    }

    /// Total number of label slots the manifest provides.
    pub fn capacity(&self) -> u32 {
        self.entries.iter().map(ManifestEntry::slots).sum()
    }
}

impl<'a> Iterator for SequentialAssigner<'a> {
    type Item = (&'a ManifestEntry, PackageInfo);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(self.entry)?;
        self.sequence += 1;
        let info = PackageInfo { sequence: self.sequence, total: entry.slots() };
        if self.sequence >= entry.slots() {
            self.entry += 1;
            self.sequence = 0;
        }
        Some((entry, info))
    }
}
