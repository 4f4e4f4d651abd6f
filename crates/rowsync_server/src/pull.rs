//! Pull: compute the patch that takes a client group's cache from its last
//! CVR to what the caller can see now.

use crate::auth::AuthContext;
use crate::config::ServerConfig;
use crate::cvr::{build_base_cvr, build_next_cvr, diff, CvrDiff, CLIENTS_VIEW};
use crate::error::SyncResult;
use crate::handler::HandlerContext;
use crate::registry::{clients_view, resolve_client_group, save_client_group};
use crate::resolver::Resolver;
use crate::txn::{transact, TxWork};
use async_trait::async_trait;
use rowsync_protocol::{
    ErrorResponse, PatchOperation, PullOk, PullRequest, PullResponse, VersionType, PULL_VERSION,
};
use rowsync_store::{now_millis, ClientViewRecord, CvrRecord, StoreError, StoreTx};
use std::collections::BTreeMap;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

pub(crate) async fn handle_pull(
    ctx: &HandlerContext,
    auth: &AuthContext,
    request: PullRequest,
) -> SyncResult<PullResponse> {
    auth.validate()?;
    if request.pull_version != PULL_VERSION {
        debug!(version = request.pull_version, "unsupported pull version");
        return Ok(PullResponse::Error(ErrorResponse::VersionNotSupported {
            version_type: VersionType::Pull,
        }));
    }
    let client_group_id = request.validate()?;
    let cookie = request.cookie.map(|c| c.order);

    let span = info_span!("pull", client_group = %client_group_id, ?cookie);
    let mut work = PullWork {
        config: &ctx.config,
        resolver: &ctx.resolver,
        auth,
        client_group_id,
        cookie,
    };
    let ok = transact(ctx.store.as_ref(), &ctx.config.retry, &mut work)
        .instrument(span)
        .await?;

    debug!(
        client_group = %client_group_id,
        cookie = ok.cookie,
        ops = ok.patch.len(),
        "pull complete"
    );
    Ok(PullResponse::Ok(ok))
}

struct PullWork<'a> {
    config: &'a ServerConfig,
    resolver: &'a Resolver,
    auth: &'a AuthContext,
    client_group_id: Uuid,
    cookie: Option<u64>,
}

#[async_trait]
impl TxWork for PullWork<'_> {
    type Output = PullOk;

    async fn run(&mut self, tx: &mut dyn StoreTx) -> SyncResult<PullOk> {
        let tenant = self.auth.tenant_id.as_str();

        let prev = match self.cookie {
            Some(order) => {
                let prev = tx.cvr(tenant, self.client_group_id, order).await?;
                if prev.is_none() {
                    info!(cookie = order, "no CVR for cookie, resetting client");
                }
                prev
            }
            None => None,
        };

        let mut group = resolve_client_group(tx, self.auth, self.client_group_id)
            .await?
            .into_inner();

        let mut visible = Vec::with_capacity(self.resolver.syncable_tables().len() + 1);
        for table in self.resolver.syncable_tables() {
            let rows = self
                .resolver
                .visible_row_metadata(tx, table, self.auth)
                .await?;
            visible.push((table.clone(), rows));
        }
        let clients = clients_view(tx, self.auth, self.client_group_id).await?;
        visible.push((CLIENTS_VIEW.to_string(), clients));

        let base = build_base_cvr(prev.as_ref());
        let next = build_next_cvr(visible);
        let changes = diff(&base, &next);

        if let Some(prev) = &prev {
            if changes.is_empty() {
                // Polling keeps the group, and so its cookie, alive.
                save_client_group(tx, group).await?;
                return Ok(PullOk::unchanged(prev.version));
            }
        }

        let patch = self.build_patch(tx, prev.is_none(), &changes).await?;
        let last_mutation_id_changes = mutation_id_changes(&changes, &next);

        let next_version = self.cookie.unwrap_or(0).max(group.cvr_version) + 1;
        group.cvr_version = next_version;
        save_client_group(tx, group).await?;

        tx.put_cvr(&ClientViewRecord {
            client_group_id: self.client_group_id,
            tenant_id: tenant.to_string(),
            version: next_version,
            record: next,
            created_ms: now_millis(),
        })
        .await?;

        let keep = self.config.cvr_retention_versions.max(1);
        let cutoff = (next_version + 1).saturating_sub(keep);
        if cutoff > 0 {
            let deleted = tx
                .delete_cvrs_before(tenant, self.client_group_id, cutoff)
                .await?;
            if deleted > 0 {
                debug!(deleted, cutoff, "expired old CVRs");
            }
        }

        Ok(PullOk {
            patch,
            cookie: next_version,
            last_mutation_id_changes,
        })
    }
}

impl PullWork<'_> {
    /// Orders the patch as clear, then puts, then dels.
    async fn build_patch(
        &self,
        tx: &mut dyn StoreTx,
        reset: bool,
        changes: &CvrDiff,
    ) -> SyncResult<Vec<PatchOperation>> {
        let tenant = self.auth.tenant_id.as_str();
        let chunk_size = self.config.fetch_chunk_size.max(1);
        let mut patch = Vec::new();
        if reset {
            patch.push(PatchOperation::Clear);
        }

        for (table, table_diff) in changes.iter() {
            if table == CLIENTS_VIEW {
                continue;
            }
            for ids in table_diff.puts.chunks(chunk_size) {
                let rows = tx.rows_by_ids(tenant, table, ids).await?;
                for row in rows {
                    let value = serde_json::to_value(&row).map_err(StoreError::from)?;
                    patch.push(PatchOperation::put(table, &row.id, value));
                }
            }
        }

        for (table, table_diff) in changes.iter() {
            if table == CLIENTS_VIEW {
                continue;
            }
            for id in &table_diff.dels {
                patch.push(PatchOperation::del(table, id));
            }
        }

        Ok(patch)
    }
}

fn mutation_id_changes(changes: &CvrDiff, next: &CvrRecord) -> BTreeMap<String, u64> {
    changes
        .table(CLIENTS_VIEW)
        .map(|clients| {
            clients
                .puts
                .iter()
                .filter_map(|id| {
                    next.version_of(CLIENTS_VIEW, id)
                        .map(|version| (id.clone(), version))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessMatrix, Rule, TablePolicy, Visibility};
    use crate::auth::Role;
    use crate::error::SyncError;
    use crate::fanout::NoopPublisher;
    use crate::mutator::MutatorRegistry;
    use rowsync_store::{ClientRecord, MemoryStore, Store};
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn context(store: Arc<MemoryStore>, config: ServerConfig) -> HandlerContext {
        let matrix = AccessMatrix::builder()
            .table("rooms")
            .policy(Role::Administrator, "rooms", TablePolicy::unrestricted())
            .policy(
                Role::Customer,
                "rooms",
                TablePolicy::new(Visibility::live(Rule::actor("memberId"))),
            )
            .build()
            .unwrap();
        HandlerContext::new(
            config,
            store,
            matrix,
            MutatorRegistry::new(),
            Arc::new(NoopPublisher),
        )
    }

    async fn put_room(store: &MemoryStore, id: &str, member: &str) {
        let mut tx = store.begin().await.unwrap();
        tx.upsert_row("t1", "rooms", id, fields(json!({"memberId": member, "name": id})))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    fn customer() -> AuthContext {
        AuthContext::new("t1", "u1", Role::Customer)
    }

    async fn pull(ctx: &HandlerContext, group: Uuid, cookie: Option<u64>) -> PullOk {
        let response = handle_pull(ctx, &customer(), PullRequest::new(group, cookie))
            .await
            .unwrap();
        response.ok().cloned().unwrap()
    }

    #[tokio::test]
    async fn first_pull_resets_and_puts() {
        let store = Arc::new(MemoryStore::new());
        put_room(&store, "r1", "u1").await;
        put_room(&store, "r2", "someone-else").await;
        let ctx = context(store, ServerConfig::default());

        let ok = pull(&ctx, Uuid::new_v4(), None).await;
        assert!(ok.is_reset());
        assert_eq!(ok.cookie, 1);
        assert_eq!(ok.patch.len(), 2);
        match &ok.patch[1] {
            PatchOperation::Put { key, value } => {
                assert_eq!(key, "rooms/r1");
                assert_eq!(value["name"], json!("r1"));
            }
            other => panic!("expected put, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_pull_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        put_room(&store, "r1", "u1").await;
        let ctx = context(store, ServerConfig::default());
        let group = Uuid::new_v4();

        let first = pull(&ctx, group, None).await;
        let second = pull(&ctx, group, Some(first.cookie)).await;
        assert_eq!(second, PullOk::unchanged(first.cookie));
    }

    #[tokio::test]
    async fn changes_and_visibility_loss() {
        let store = Arc::new(MemoryStore::new());
        put_room(&store, "r1", "u1").await;
        put_room(&store, "r2", "u1").await;
        let ctx = context(store.clone(), ServerConfig::default());
        let group = Uuid::new_v4();

        let first = pull(&ctx, group, None).await;

        put_room(&store, "r1", "u1").await;
        put_room(&store, "r2", "u2").await;

        let second = pull(&ctx, group, Some(first.cookie)).await;
        assert!(second.cookie > first.cookie);
        assert_eq!(
            second.patch.iter().map(|op| op.to_string()).collect::<Vec<_>>(),
            vec!["put rooms/r1", "del rooms/r2"]
        );
    }

    #[tokio::test]
    async fn unknown_cookie_forces_reset() {
        let store = Arc::new(MemoryStore::new());
        put_room(&store, "r1", "u1").await;
        let ctx = context(store, ServerConfig::default());

        let ok = pull(&ctx, Uuid::new_v4(), Some(42)).await;
        assert!(ok.is_reset());
        assert_eq!(ok.cookie, 43);
    }

    #[tokio::test]
    async fn old_cvrs_are_expired() {
        let store = Arc::new(MemoryStore::new());
        let config = ServerConfig::default().with_cvr_retention_versions(2);
        let ctx = context(store.clone(), config);
        let group = Uuid::new_v4();

        let mut cookie = None;
        for i in 0..4 {
            put_room(&store, &format!("r{i}"), "u1").await;
            cookie = Some(pull(&ctx, group, cookie).await.cookie);
        }
        assert_eq!(cookie, Some(4));

        let mut tx = store.begin().await.unwrap();
        assert!(tx.cvr("t1", group, 2).await.unwrap().is_none());
        assert!(tx.cvr("t1", group, 3).await.unwrap().is_some());
        assert!(tx.cvr("t1", group, 4).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reports_mutation_id_changes() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone(), ServerConfig::default());
        let group = Uuid::new_v4();
        let client = Uuid::new_v4();

        let first = pull(&ctx, group, None).await;
        assert!(first.last_mutation_id_changes.is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.put_client(&ClientRecord {
            id: client,
            tenant_id: "t1".into(),
            client_group_id: group,
            last_mutation_id: 3,
            last_modified_ms: now_millis(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let second = pull(&ctx, group, Some(first.cookie)).await;
        assert!(second.patch.is_empty());
        assert_eq!(second.cookie, first.cookie + 1);
        assert_eq!(second.last_mutation_id_changes[&client.to_string()], 3);
    }

    #[tokio::test]
    async fn rejections() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store, ServerConfig::default());

        let mut request = PullRequest::new(Uuid::new_v4(), None);
        request.pull_version = 2;
        let response = handle_pull(&ctx, &customer(), request).await.unwrap();
        assert_eq!(
            response,
            PullResponse::Error(ErrorResponse::VersionNotSupported {
                version_type: VersionType::Pull
            })
        );

        let mut request = PullRequest::new(Uuid::new_v4(), None);
        request.client_group_id = "not-a-uuid".into();
        let err = handle_pull(&ctx, &customer(), request).await.unwrap_err();
        assert!(matches!(err, SyncError::BadRequest(_)));

        let group = Uuid::new_v4();
        pull(&ctx, group, None).await;
        let intruder = AuthContext::new("t1", "u2", Role::Customer);
        let err = handle_pull(&ctx, &intruder, PullRequest::new(group, None))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
    }
}
