//! Client view record building and diffing.

use rowsync_store::{ClientViewRecord, CvrRecord, RowMetadata};
use std::collections::BTreeMap;

/// Pseudo-table tracking every client of a group, versioned by
/// `lastMutationId`. Never synced as rows.
pub const CLIENTS_VIEW: &str = "clients";

/// Changes for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDiff {
    /// Ids that are new or whose version changed.
    pub puts: Vec<String>,
    /// Ids no longer visible.
    pub dels: Vec<String>,
}

impl TableDiff {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.dels.is_empty()
    }
}

/// Per-table changes between two CVRs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CvrDiff(pub BTreeMap<String, TableDiff>);

impl CvrDiff {
    /// Returns true if no table changed.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(TableDiff::is_empty)
    }

    /// The changes for one table.
    pub fn table(&self, table: &str) -> Option<&TableDiff> {
        self.0.get(table)
    }

    /// Iterates over tables with changes.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableDiff)> {
        self.0
            .iter()
            .filter(|(_, d)| !d.is_empty())
            .map(|(t, d)| (t.as_str(), d))
    }
}

/// The CVR to diff against: the stored one, or empty.
pub fn build_base_cvr(prev: Option<&ClientViewRecord>) -> CvrRecord {
    prev.map(|cvr| cvr.record.clone()).unwrap_or_default()
}

/// Flattens visible metadata into a CVR.
///
/// Duplicate ids keep their highest version.
pub fn build_next_cvr<I, T>(metadata: I) -> CvrRecord
where
    I: IntoIterator<Item = (T, Vec<RowMetadata>)>,
    T: Into<String>,
{
    let mut record = CvrRecord::new();
    for (table, rows) in metadata {
        let entry = record.0.entry(table.into()).or_default();
        for row in rows {
            let version = entry.entry(row.id).or_insert(row.row_version);
            if row.row_version > *version {
                *version = row.row_version;
            }
        }
    }
    record
}

/// Computes puts and dels taking `base` to `next`.
pub fn diff(base: &CvrRecord, next: &CvrRecord) -> CvrDiff {
    let empty = BTreeMap::new();
    let mut out = BTreeMap::new();

    let tables = base.0.keys().chain(next.0.keys());
    for table in tables {
        if out.contains_key(table) {
            continue;
        }
        let before = base.table(table).unwrap_or(&empty);
        let after = next.table(table).unwrap_or(&empty);

        let puts = after
            .iter()
            .filter(|(id, version)| before.get(*id) != Some(*version))
            .map(|(id, _)| id.clone())
            .collect();
        let dels = before
            .keys()
            .filter(|id| !after.contains_key(*id))
            .cloned()
            .collect();

        out.insert(table.clone(), TableDiff { puts, dels });
    }

    CvrDiff(out)
}
