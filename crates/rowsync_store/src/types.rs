//! Records persisted by the store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Returns the current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The set of devices sharing one local cache for one user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientGroupRecord {
    /// Client-generated group identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// The user that first referenced the group. Never changes.
    pub owner_user_id: String,
    /// Version of the most recent CVR written for this group.
    pub cvr_version: u64,
    /// Last write time in Unix milliseconds.
    pub last_modified_ms: u64,
}

/// A single device (one local cache instance) within a client group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    /// Client-generated client identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// The group this client belongs to.
    pub client_group_id: Uuid,
    /// Id of the last mutation applied for this client. Starts at 0.
    pub last_mutation_id: u64,
    /// Last write time in Unix milliseconds.
    pub last_modified_ms: u64,
}

/// Table name to (row id to row version).
///
/// Ordered maps keep patches and persisted records deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CvrRecord(pub BTreeMap<String, BTreeMap<String, u64>>);

impl CvrRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id to version map for a table, if present.
    pub fn table(&self, table: &str) -> Option<&BTreeMap<String, u64>> {
        self.0.get(table)
    }

    /// Returns the recorded version of a row.
    pub fn version_of(&self, table: &str, id: &str) -> Option<u64> {
        self.0.get(table).and_then(|rows| rows.get(id)).copied()
    }

    /// Returns the names of all tables in the record.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Total number of rows across all tables.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    /// Returns true if no rows are recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An immutable, versioned snapshot of what one client group has seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientViewRecord {
    /// Group the snapshot belongs to.
    pub client_group_id: Uuid,
    /// Owning tenant.
    pub tenant_id: String,
    /// Snapshot version, echoed to the client as its cookie.
    pub version: u64,
    /// The visible rows and their versions.
    pub record: CvrRecord,
    /// Creation time in Unix milliseconds.
    pub created_ms: u64,
}

/// The part of an entity row the CVR engine consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowMetadata {
    /// Row id.
    pub id: String,
    /// Server-assigned row version.
    pub row_version: u64,
}

impl RowMetadata {
    /// Creates row metadata.
    pub fn new(id: impl Into<String>, row_version: u64) -> Self {
        Self {
            id: id.into(),
            row_version,
        }
    }
}

/// Row columns that business fields may not shadow.
pub const RESERVED_FIELDS: [&str; 4] = ["id", "tenantId", "rowVersion", "deletedAt"];

/// A generic synced entity row.
///
/// Business fields are opaque to the store; they are carried as a JSON
/// object and flattened into the row when serialized for a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Row id, unique within (tenant, table).
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Strictly increasing per write.
    pub row_version: u64,
    /// Soft-delete time in Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
    /// Business fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Row {
    /// Reads a field by name.
    ///
    /// `id` and `tenantId` resolve to the row's own columns so visibility
    /// rules can reference them like any other field.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "tenantId" => Some(Value::String(self.tenant_id.clone())),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Returns the first business field that shadows a row column.
    pub fn reserved_field(fields: &Map<String, Value>) -> Option<&'static str> {
        RESERVED_FIELDS
            .into_iter()
            .find(|name| fields.contains_key(*name))
    }

    /// Returns true if the row carries a soft-delete marker.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns the id and version of this row.
    pub fn metadata(&self) -> RowMetadata {
        RowMetadata::new(self.id.clone(), self.row_version)
    }
}

/// Counts of records removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Client groups deleted.
    pub client_groups: usize,
    /// Clients deleted.
    pub clients: usize,
    /// CVRs deleted.
    pub cvrs: usize,
}

impl SweepStats {
    /// Total number of records deleted.
    pub fn total(&self) -> usize {
        self.client_groups + self.clients + self.cvrs
    }
}
