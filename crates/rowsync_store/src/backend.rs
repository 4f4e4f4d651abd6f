//! Store trait definitions.

use crate::error::StoreResult;
use crate::query::RowQuery;
use crate::types::{
    ClientGroupRecord, ClientRecord, ClientViewRecord, Row, RowMetadata, SweepStats,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

/// A transactional backing store.
///
/// # Invariants
///
/// - Each [`StoreTx`] observes a consistent snapshot and its writes become
///   visible atomically on [`StoreTx::commit`]
/// - Conflicting concurrent transactions fail with a transient
///   [`crate::StoreError`] rather than committing a non-serializable history
/// - Row versions assigned by [`StoreTx::upsert_row`] and
///   [`StoreTx::soft_delete_row`] strictly increase across all writes
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For tests and demos
#[async_trait]
pub trait Store: Send + Sync {
    /// Begins a new transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// An open store transaction.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait StoreTx: Send {
    /// Loads a client group.
    async fn client_group(
        &mut self,
        tenant_id: &str,
        id: Uuid,
    ) -> StoreResult<Option<ClientGroupRecord>>;

    /// Inserts or replaces a client group by primary key.
    async fn put_client_group(&mut self, group: &ClientGroupRecord) -> StoreResult<()>;

    /// Loads a client.
    async fn client(&mut self, tenant_id: &str, id: Uuid) -> StoreResult<Option<ClientRecord>>;

    /// Inserts or replaces a client by primary key.
    async fn put_client(&mut self, client: &ClientRecord) -> StoreResult<()>;

    /// Lists every client of a group.
    async fn clients_in_group(
        &mut self,
        tenant_id: &str,
        client_group_id: Uuid,
    ) -> StoreResult<Vec<ClientRecord>>;

    /// Loads a CVR by group and version.
    async fn cvr(
        &mut self,
        tenant_id: &str,
        client_group_id: Uuid,
        version: u64,
    ) -> StoreResult<Option<ClientViewRecord>>;

    /// Writes a new CVR.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Constraint`] if a CVR with the same
    /// (group, version) already exists; CVRs are immutable.
    async fn put_cvr(&mut self, cvr: &ClientViewRecord) -> StoreResult<()>;

    /// Deletes every CVR of a group with a version below `version`.
    ///
    /// Returns the number of CVRs deleted.
    async fn delete_cvrs_before(
        &mut self,
        tenant_id: &str,
        client_group_id: Uuid,
        version: u64,
    ) -> StoreResult<usize>;

    /// Deletes client groups last touched before `cutoff_ms`, across all
    /// tenants, together with their clients and CVRs.
    ///
    /// Clients and CVRs of a live group are never swept: a group's cookie
    /// must stay resolvable while the group is in use. Older CVR versions
    /// of live groups are pruned by [`StoreTx::delete_cvrs_before`].
    async fn sweep_expired(&mut self, cutoff_ms: u64) -> StoreResult<SweepStats>;

    /// Returns id and version of every row of `table` matching `query`.
    async fn query_metadata(
        &mut self,
        tenant_id: &str,
        table: &str,
        query: &RowQuery,
    ) -> StoreResult<Vec<RowMetadata>>;

    /// Loads full rows by id. Missing ids are skipped.
    async fn rows_by_ids(
        &mut self,
        tenant_id: &str,
        table: &str,
        ids: &[String],
    ) -> StoreResult<Vec<Row>>;

    /// Loads a single row, soft-deleted or not.
    async fn row(&mut self, tenant_id: &str, table: &str, id: &str) -> StoreResult<Option<Row>>;

    /// Inserts or replaces a row's business fields, assigning a new version
    /// and clearing any soft-delete marker.
    ///
    /// Fails with [`StoreError::Constraint`](crate::StoreError::Constraint)
    /// if a field shadows one of [`RESERVED_FIELDS`](crate::RESERVED_FIELDS).
    async fn upsert_row(
        &mut self,
        tenant_id: &str,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<Row>;

    /// Marks a row as deleted, assigning a new version.
    ///
    /// Returns `None` if the row does not exist.
    async fn soft_delete_row(
        &mut self,
        tenant_id: &str,
        table: &str,
        id: &str,
    ) -> StoreResult<Option<Row>>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Rolls the transaction back.
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
