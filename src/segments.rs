//! Cluster code to segment name lookup

use std::collections::BTreeMap;

use crate::schema::UNKNOWN;

/// Immutable mapping from upstream cluster codes to display names.
///
/// Built once per engine; codes without an entry resolve to `"Unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTable {
    labels: BTreeMap<i64, String>,
}

impl Default for SegmentTable {
    fn default() -> Self {
        Self::from_pairs([
            (0, "Champions (VIPs)"),
            (1, "New Prospects"),
            (2, "At-Risk High Value"),
            (3, "Hibernating/Lost"),
            (4, "Loyal General Trade"),
        ])
    }
}

impl SegmentTable {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        Self {
            labels: pairs
                .into_iter()
                .map(|(code, label)| (code, label.into()))
                .collect(),
        }
    }

    /// Display name for a cluster code
    pub fn label(&self, code: Option<i64>) -> &str {
        code.and_then(|c| self.labels.get(&c))
            .map(String::as_str)
            .unwrap_or(UNKNOWN)
    }

    /// Entries in ascending code order
    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.labels.iter().map(|(code, label)| (*code, label.as_str()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
