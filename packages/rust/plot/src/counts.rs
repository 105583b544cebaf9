//! Label-frequency tables and their outer join.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use bridge_rlds_shared::{BridgeRldsError, Result};

/// One labeling source's `label -> count` table.
///
/// Deserializing rejects a label that appears twice in the same table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelCounts(BTreeMap<String, u64>);

impl LabelCounts {
    pub fn get(&self, label: &str) -> u64 {
        self.0.get(label).copied().unwrap_or(0)
    }

    pub fn labels(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `n` most frequent labels not in `exclude` (all of them when `n`
    /// is 0). Ties go to the alphabetically first label.
    pub fn top(&self, n: usize, exclude: &[String]) -> LabelCounts {
        let mut ranked: Vec<(&String, u64)> = self
            .0
            .iter()
            .filter(|(label, _)| !exclude.contains(label))
            .map(|(label, count)| (label, *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        if n > 0 {
            ranked.truncate(n);
        }
        ranked
            .into_iter()
            .map(|(label, count)| (label.clone(), count))
            .collect()
    }
}

impl FromIterator<(String, u64)> for LabelCounts {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for LabelCounts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct CountsVisitor;

        impl<'de> Visitor<'de> for CountsVisitor {
            type Value = LabelCounts;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of label to non-negative count")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut counts = BTreeMap::new();
                while let Some((label, count)) = map.next_entry::<String, u64>()? {
                    if counts.insert(label.clone(), count).is_some() {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate label `{label}`"
                        )));
                    }
                }
                Ok(LabelCounts(counts))
            }
        }

        deserializer.deserialize_map(CountsVisitor)
    }
}

/// On-disk wrapper: `{"counter_data": {label: count}}`.
#[derive(Deserialize)]
struct CounterFile {
    counter_data: LabelCounts,
}

/// Parse a counter file's JSON text.
pub fn parse_counts(json: &str) -> Result<LabelCounts> {
    serde_json::from_str::<CounterFile>(json)
        .map(|file| file.counter_data)
        .map_err(|e| BridgeRldsError::validation(format!("invalid counter file: {e}")))
}

/// Load a counter file from disk.
pub fn load_counts(path: &Path) -> Result<LabelCounts> {
    let content = std::fs::read_to_string(path).map_err(|e| BridgeRldsError::io(path, e))?;
    let counts = parse_counts(&content).map_err(|e| {
        BridgeRldsError::validation(format!("{}: {e}", path.display()))
    })?;
    debug!(path = %path.display(), labels = counts.len(), "loaded label counts");
    Ok(counts)
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

/// One label with its count in each source (0 when absent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRow {
    pub label: String,
    pub first: u64,
    pub second: u64,
}

impl MergedRow {
    pub fn max(&self) -> u64 {
        self.first.max(self.second)
    }

    pub fn total(&self) -> u64 {
        self.first + self.second
    }
}

/// Outer-join two tables on label, dropping `exclude`d labels, ordered by
/// the larger of the two counts (descending), ties broken by label.
pub fn merge_counts(
    first: &LabelCounts,
    second: &LabelCounts,
    exclude: &[String],
) -> Vec<MergedRow> {
    let labels: BTreeSet<&String> = first.labels().chain(second.labels()).collect();

    let mut rows: Vec<MergedRow> = labels
        .into_iter()
        .filter(|label| !exclude.contains(label))
        .map(|label| MergedRow {
            label: label.clone(),
            first: first.get(label),
            second: second.get(label),
        })
        .collect();

    rows.sort_by(|a, b| b.max().cmp(&a.max()).then_with(|| a.label.cmp(&b.label)));
    rows
}

/// Keep the first `n` rows (all of them when `n` is 0).
pub fn top_n(mut rows: Vec<MergedRow>, n: usize) -> Vec<MergedRow> {
    if n > 0 {
        rows.truncate(n);
    }
    rows
}

/// Which rows of the join end up in the chart.
#[derive(Debug, Clone, Default)]
pub struct RowSelection {
    /// Row budget, 0 keeps everything.
    pub top: usize,
    /// Cut each source to its own top `top` labels before the join instead
    /// of cutting the joined table. The chart then holds up to `2 * top` rows.
    pub per_source: bool,
    pub exclude: Vec<String>,
}

impl RowSelection {
    pub fn apply(&self, first: &LabelCounts, second: &LabelCounts) -> Vec<MergedRow> {
        if self.per_source {
            let first = first.top(self.top, &self.exclude);
            let second = second.top(self.top, &self.exclude);
            merge_counts(&first, &second, &[])
        } else {
            top_n(merge_counts(first, second, &self.exclude), self.top)
        }
    }
}

/// Write the merged table as pretty JSON.
pub fn write_table(rows: &[MergedRow], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(rows)
        .map_err(|e| BridgeRldsError::validation(format!("JSON serialization failed: {e}")))?;
    std::fs::write(path, json).map_err(|e| BridgeRldsError::io(path, e))?;
    debug!(path = %path.display(), rows = rows.len(), "wrote merged table");
    Ok(())
}
