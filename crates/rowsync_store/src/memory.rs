//! In-memory store for tests and demos.

use crate::backend::{Store, StoreTx};
use crate::error::{StoreError, StoreResult};
use crate::query::{RowFilter, RowQuery};
use crate::types::{
    now_millis, ClientGroupRecord, ClientRecord, ClientViewRecord, Row, RowMetadata, SweepStats,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// A fault to inject into upcoming commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// Fail with [`StoreError::SerializationFailure`].
    SerializationFailure,
    /// Fail with [`StoreError::Deadlock`].
    Deadlock,
    /// Fail with [`StoreError::Unavailable`].
    Unavailable,
}

impl InjectedFault {
    fn to_error(self) -> StoreError {
        match self {
            InjectedFault::SerializationFailure => {
                StoreError::SerializationFailure("injected serialization failure".into())
            }
            InjectedFault::Deadlock => StoreError::Deadlock("injected deadlock".into()),
            InjectedFault::Unavailable => StoreError::Unavailable("injected outage".into()),
        }
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    remaining: u32,
    fault: Option<InjectedFault>,
}

impl FaultPlan {
    fn take(&mut self) -> Option<StoreError> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.fault.map(InjectedFault::to_error)
    }
}

type Rows = BTreeMap<String, Row>;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    client_groups: HashMap<(String, Uuid), ClientGroupRecord>,
    clients: HashMap<(String, Uuid), ClientRecord>,
    cvrs: BTreeMap<(String, Uuid, u64), ClientViewRecord>,
    /// tenant -> table -> id -> row
    tables: HashMap<String, HashMap<String, Rows>>,
    last_row_version: u64,
}

impl MemoryState {
    fn rows(&self, tenant_id: &str, table: &str) -> impl Iterator<Item = &Row> {
        self.tables
            .get(tenant_id)
            .and_then(|tables| tables.get(table))
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    fn rows_mut(&mut self, tenant_id: &str, table: &str) -> &mut Rows {
        self.tables
            .entry(tenant_id.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default()
    }

    fn next_row_version(&mut self) -> u64 {
        self.last_row_version += 1;
        self.last_row_version
    }

    fn matches(&self, tenant_id: &str, row: &Row, filter: &RowFilter) -> bool {
        match filter {
            RowFilter::All => true,
            RowFilter::Nothing => false,
            RowFilter::Eq { field, value } => row.field(field).as_ref() == Some(value),
            RowFilter::In { field, values } => row
                .field(field)
                .map_or(false, |actual| values.contains(&actual)),
            RowFilter::Linked {
                field,
                via_table,
                via_field,
                via_filter,
            } => {
                let Some(actual) = row.field(field) else {
                    return false;
                };
                self.rows(tenant_id, via_table)
                    .filter(|link| !link.is_deleted())
                    .filter(|link| self.matches(tenant_id, link, via_filter))
                    .any(|link| link.field(via_field).as_ref() == Some(&actual))
            }
            RowFilter::And(filters) => filters.iter().all(|f| self.matches(tenant_id, row, f)),
            RowFilter::Or(filters) => filters.iter().any(|f| self.matches(tenant_id, row, f)),
        }
    }
}

/// An in-memory transactional store.
///
/// Transactions are serialized: [`Store::begin`] waits for an exclusive
/// lock held until the transaction commits, rolls back or is dropped. Each
/// transaction works on a private copy of the state that replaces the
/// shared state on commit, so an abandoned transaction leaves no trace.
///
/// This is suitable for:
/// - Unit and integration tests
/// - Demos and single-process deployments without durability needs
///
/// # Fault Injection
///
/// [`MemoryStore::fail_next_commits`] makes upcoming commits fail with a
/// chosen error class, which is how retry behavior is exercised in tests.
///
/// # Example
///
/// ```rust
/// use rowsync_store::{InjectedFault, MemoryStore, Store};
///
/// let store = MemoryStore::new();
/// store.fail_next_commits(2, InjectedFault::SerializationFailure);
/// assert_eq!(store.committed_transactions(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<AsyncMutex<MemoryState>>,
    faults: Arc<Mutex<FaultPlan>>,
    commits: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with `fault`.
    pub fn fail_next_commits(&self, count: u32, fault: InjectedFault) {
        let mut plan = self.faults.lock();
        plan.remaining = count;
        plan.fault = Some(fault);
    }

    /// Number of injected faults still pending.
    pub fn pending_faults(&self) -> u32 {
        self.faults.lock().remaining
    }

    /// Number of successfully committed transactions.
    pub fn committed_transactions(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            faults: Arc::clone(&self.faults),
            commits: Arc::clone(&self.commits),
        }))
    }
}

/// A transaction over a [`MemoryStore`].
struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Arc<Mutex<FaultPlan>>,
    commits: Arc<AtomicU64>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn client_group(
        &mut self,
        tenant_id: &str,
        id: Uuid,
    ) -> StoreResult<Option<ClientGroupRecord>> {
        Ok(self
            .working
            .client_groups
            .get(&(tenant_id.to_string(), id))
            .cloned())
    }

    async fn put_client_group(&mut self, group: &ClientGroupRecord) -> StoreResult<()> {
        self.working
            .client_groups
            .insert((group.tenant_id.clone(), group.id), group.clone());
        Ok(())
    }

    async fn client(&mut self, tenant_id: &str, id: Uuid) -> StoreResult<Option<ClientRecord>> {
        Ok(self
            .working
            .clients
            .get(&(tenant_id.to_string(), id))
            .cloned())
    }

    async fn put_client(&mut self, client: &ClientRecord) -> StoreResult<()> {
        self.working
            .clients
            .insert((client.tenant_id.clone(), client.id), client.clone());
        Ok(())
    }

    async fn clients_in_group(
        &mut self,
        tenant_id: &str,
        client_group_id: Uuid,
    ) -> StoreResult<Vec<ClientRecord>> {
        let mut clients: Vec<ClientRecord> = self
            .working
            .clients
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.client_group_id == client_group_id)
            .cloned()
            .collect();
        clients.sort_by_key(|c| c.id);
        Ok(clients)
    }

    async fn cvr(
        &mut self,
        tenant_id: &str,
        client_group_id: Uuid,
        version: u64,
    ) -> StoreResult<Option<ClientViewRecord>> {
        Ok(self
            .working
            .cvrs
            .get(&(tenant_id.to_string(), client_group_id, version))
            .cloned())
    }

    async fn put_cvr(&mut self, cvr: &ClientViewRecord) -> StoreResult<()> {
        let key = (cvr.tenant_id.clone(), cvr.client_group_id, cvr.version);
        if self.working.cvrs.contains_key(&key) {
            return Err(StoreError::Constraint(format!(
                "cvr {} for client group {} already exists",
                cvr.version, cvr.client_group_id
            )));
        }
        self.working.cvrs.insert(key, cvr.clone());
        Ok(())
    }

    async fn delete_cvrs_before(
        &mut self,
        tenant_id: &str,
        client_group_id: Uuid,
        version: u64,
    ) -> StoreResult<usize> {
        let before = self.working.cvrs.len();
        self.working.cvrs.retain(|(tenant, group, v), _| {
            !(tenant == tenant_id && *group == client_group_id && *v < version)
        });
        Ok(before - self.working.cvrs.len())
    }

    async fn sweep_expired(&mut self, cutoff_ms: u64) -> StoreResult<SweepStats> {
        let state = &mut self.working;
        let mut stats = SweepStats::default();

        let expired: HashSet<(String, Uuid)> = state
            .client_groups
            .iter()
            .filter(|(_, g)| g.last_modified_ms < cutoff_ms)
            .map(|(key, _)| key.clone())
            .collect();

        state.client_groups.retain(|key, _| !expired.contains(key));
        stats.client_groups = expired.len();

        let clients_before = state.clients.len();
        state
            .clients
            .retain(|_, c| !expired.contains(&(c.tenant_id.clone(), c.client_group_id)));
        stats.clients = clients_before - state.clients.len();

        let cvrs_before = state.cvrs.len();
        state
            .cvrs
            .retain(|(tenant, group, _), _| !expired.contains(&(tenant.clone(), *group)));
        stats.cvrs = cvrs_before - state.cvrs.len();

        Ok(stats)
    }

    async fn query_metadata(
        &mut self,
        tenant_id: &str,
        table: &str,
        query: &RowQuery,
    ) -> StoreResult<Vec<RowMetadata>> {
        if query.filter.is_nothing() {
            return Ok(Vec::new());
        }
        let state = &self.working;
        Ok(state
            .rows(tenant_id, table)
            .filter(|row| query.include_deleted || !row.is_deleted())
            .filter(|row| state.matches(tenant_id, row, &query.filter))
            .map(Row::metadata)
            .collect())
    }

    async fn rows_by_ids(
        &mut self,
        tenant_id: &str,
        table: &str,
        ids: &[String],
    ) -> StoreResult<Vec<Row>> {
        let Some(rows) = self
            .working
            .tables
            .get(tenant_id)
            .and_then(|tables| tables.get(table))
        else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| rows.get(id)).cloned().collect())
    }

    async fn row(&mut self, tenant_id: &str, table: &str, id: &str) -> StoreResult<Option<Row>> {
        Ok(self
            .working
            .tables
            .get(tenant_id)
            .and_then(|tables| tables.get(table))
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    async fn upsert_row(
        &mut self,
        tenant_id: &str,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> StoreResult<Row> {
        if id.is_empty() {
            return Err(StoreError::Constraint(format!("empty row id in {table}")));
        }
        if let Some(name) = Row::reserved_field(&fields) {
            return Err(StoreError::Constraint(format!(
                "field {name:?} of {table}/{id} shadows a row column"
            )));
        }
        let row_version = self.working.next_row_version();
        let row = Row {
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            row_version,
            deleted_at: None,
            fields,
        };
        self.working
            .rows_mut(tenant_id, table)
            .insert(id.to_string(), row.clone());
        Ok(row)
    }

    async fn soft_delete_row(
        &mut self,
        tenant_id: &str,
        table: &str,
        id: &str,
    ) -> StoreResult<Option<Row>> {
        let row_version = self.working.last_row_version + 1;
        let Some(row) = self.working.rows_mut(tenant_id, table).get_mut(id) else {
            return Ok(None);
        };
        row.row_version = row_version;
        row.deleted_at = Some(now_millis());
        let deleted = row.clone();
        self.working.last_row_version = row_version;
        Ok(Some(deleted))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let fault = self.faults.lock().take();
        if let Some(err) = fault {
            return Err(err);
        }
        let MemoryTx {
            mut guard,
            working,
            commits,
            ..
        } = *self;
        *guard = working;
        commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn group(id: Uuid, modified: u64) -> ClientGroupRecord {
        ClientGroupRecord {
            id,
            tenant_id: "acme".into(),
            owner_user_id: "u-1".into(),
            cvr_version: 0,
            last_modified_ms: modified,
        }
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_row("acme", "orders", "o-1", fields(json!({"n": 1})))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let row = tx.row("acme", "orders", "o-1").await.unwrap().unwrap();
        assert_eq!(row.fields["n"], json!(1));
        assert_eq!(store.committed_transactions(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_row("acme", "orders", "o-1", Map::new())
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.row("acme", "orders", "o-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_transaction_releases_lock() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.upsert_row("acme", "orders", "o-1", Map::new())
                .await
                .unwrap();
        }
        let mut tx = store.begin().await.unwrap();
        assert!(tx.row("acme", "orders", "o-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn row_versions_strictly_increase() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let a = tx.upsert_row("acme", "orders", "o-1", Map::new()).await.unwrap();
        let b = tx.upsert_row("other", "rooms", "r-1", Map::new()).await.unwrap();
        let c = tx.soft_delete_row("acme", "orders", "o-1").await.unwrap().unwrap();
        let d = tx.upsert_row("acme", "orders", "o-1", Map::new()).await.unwrap();

        assert!(a.row_version < b.row_version);
        assert!(b.row_version < c.row_version);
        assert!(c.row_version < d.row_version);
        assert!(c.is_deleted());
        assert!(!d.is_deleted());
    }

    #[tokio::test]
    async fn soft_delete_missing_row() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.soft_delete_row("acme", "orders", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queries_are_tenant_scoped() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_row("acme", "orders", "o-1", Map::new()).await.unwrap();
        tx.upsert_row("globex", "orders", "o-2", Map::new()).await.unwrap();

        let rows = tx
            .query_metadata("acme", "orders", &RowQuery::everything())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "o-1");
    }

    #[tokio::test]
    async fn deleted_rows_only_when_requested() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_row("acme", "orders", "o-1", Map::new()).await.unwrap();
        tx.upsert_row("acme", "orders", "o-2", Map::new()).await.unwrap();
        tx.soft_delete_row("acme", "orders", "o-2").await.unwrap();

        let live = tx
            .query_metadata("acme", "orders", &RowQuery::live(RowFilter::All))
            .await
            .unwrap();
        let all = tx
            .query_metadata("acme", "orders", &RowQuery::everything())
            .await
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn linked_filter_follows_join_table() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_row("acme", "orders", "o-1", fields(json!({"accountId": "a-1"})))
            .await
            .unwrap();
        tx.upsert_row("acme", "orders", "o-2", fields(json!({"accountId": "a-2"})))
            .await
            .unwrap();
        tx.upsert_row(
            "acme",
            "accountManagers",
            "m-1",
            fields(json!({"accountId": "a-1", "managerId": "u-1"})),
        )
        .await
        .unwrap();
        tx.upsert_row(
            "acme",
            "accountManagers",
            "m-2",
            fields(json!({"accountId": "a-2", "managerId": "u-1"})),
        )
        .await
        .unwrap();
        tx.soft_delete_row("acme", "accountManagers", "m-2")
            .await
            .unwrap();

        let query = RowQuery::live(RowFilter::Linked {
            field: "accountId".into(),
            via_table: "accountManagers".into(),
            via_field: "accountId".into(),
            via_filter: Box::new(RowFilter::eq("managerId", "u-1")),
        });
        let rows = tx.query_metadata("acme", "orders", &query).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["o-1"]);
    }

    #[tokio::test]
    async fn rows_by_ids_skips_missing() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert_row("acme", "orders", "o-1", Map::new()).await.unwrap();

        let rows = tx
            .rows_by_ids("acme", "orders", &["o-1".into(), "o-9".into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn cvrs_are_immutable() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let cvr = ClientViewRecord {
            client_group_id: Uuid::new_v4(),
            tenant_id: "acme".into(),
            version: 1,
            record: Default::default(),
            created_ms: 0,
        };
        tx.put_cvr(&cvr).await.unwrap();
        let err = tx.put_cvr(&cvr).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn delete_cvrs_before_version() {
        let store = MemoryStore::new();
        let group_id = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        for version in 1..=5 {
            tx.put_cvr(&ClientViewRecord {
                client_group_id: group_id,
                tenant_id: "acme".into(),
                version,
                record: Default::default(),
                created_ms: 0,
            })
            .await
            .unwrap();
        }

        assert_eq!(tx.delete_cvrs_before("acme", group_id, 4).await.unwrap(), 3);
        assert!(tx.cvr("acme", group_id, 3).await.unwrap().is_none());
        assert!(tx.cvr("acme", group_id, 4).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_removes_expired_groups_and_dependents() {
        let store = MemoryStore::new();
        let old = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.put_client_group(&group(old, 10)).await.unwrap();
        tx.put_client_group(&group(fresh, 1_000)).await.unwrap();
        tx.put_client(&ClientRecord {
            id: Uuid::new_v4(),
            tenant_id: "acme".into(),
            client_group_id: old,
            last_modified_ms: 1_000,
            last_mutation_id: 3,
        })
        .await
        .unwrap();
        tx.put_cvr(&ClientViewRecord {
            client_group_id: old,
            tenant_id: "acme".into(),
            version: 1,
            record: Default::default(),
            created_ms: 1_000,
        })
        .await
        .unwrap();

        let stats = tx.sweep_expired(500).await.unwrap();
        assert_eq!(stats.client_groups, 1);
        assert_eq!(stats.clients, 1);
        assert_eq!(stats.cvrs, 1);
        assert!(tx.client_group("acme", fresh).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_keeps_stale_dependents_of_live_groups() {
        let store = MemoryStore::new();
        let live = Uuid::new_v4();
        let client = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        tx.put_client_group(&group(live, 1_000)).await.unwrap();
        tx.put_client(&ClientRecord {
            id: client,
            tenant_id: "acme".into(),
            client_group_id: live,
            last_modified_ms: 10,
            last_mutation_id: 3,
        })
        .await
        .unwrap();
        tx.put_cvr(&ClientViewRecord {
            client_group_id: live,
            tenant_id: "acme".into(),
            version: 1,
            record: Default::default(),
            created_ms: 10,
        })
        .await
        .unwrap();

        let stats = tx.sweep_expired(500).await.unwrap();
        assert_eq!(stats.total(), 0);
        assert_eq!(
            tx.client("acme", client).await.unwrap().unwrap().last_mutation_id,
            3
        );
        assert!(tx.cvr("acme", live, 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn upsert_rejects_fields_shadowing_columns() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let err = tx
            .upsert_row("acme", "orders", "o-1", fields(json!({"title": "Poster", "tenantId": "globex"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(tx.row("acme", "orders", "o-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_faults_fail_commits() {
        let store = MemoryStore::new();
        store.fail_next_commits(1, InjectedFault::Deadlock);

        let tx = store.begin().await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.pending_faults(), 0);

        let tx = store.begin().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.committed_transactions(), 1);
    }
}
