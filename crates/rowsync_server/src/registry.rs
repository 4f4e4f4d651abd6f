//! Client and client group bookkeeping.
//!
//! Records are created lazily: the first reference to an unknown id yields
//! a defaulted record that is only persisted when the caller saves it.

use crate::auth::AuthContext;
use crate::error::{SyncError, SyncResult};
use rowsync_store::{now_millis, ClientGroupRecord, ClientRecord, RowMetadata, StoreTx};
use uuid::Uuid;

/// A record that was loaded or materialized with defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized<T> {
    /// Already persisted.
    Found(T),
    /// Not persisted yet; defaults were filled in.
    DefaultedNew(T),
}

impl<T> Materialized<T> {
    /// Unwraps the record.
    pub fn into_inner(self) -> T {
        match self {
            Materialized::Found(value) | Materialized::DefaultedNew(value) => value,
        }
    }

    /// Borrows the record.
    pub fn get(&self) -> &T {
        match self {
            Materialized::Found(value) | Materialized::DefaultedNew(value) => value,
        }
    }

    /// Returns true if the record was materialized with defaults.
    pub fn is_new(&self) -> bool {
        matches!(self, Materialized::DefaultedNew(_))
    }
}

/// Loads a client group, or materializes one owned by the caller.
///
/// # Errors
///
/// [`SyncError::Unauthorized`] if the group belongs to another user.
pub(crate) async fn resolve_client_group(
    tx: &mut dyn StoreTx,
    auth: &AuthContext,
    id: Uuid,
) -> SyncResult<Materialized<ClientGroupRecord>> {
    match tx.client_group(&auth.tenant_id, id).await? {
        Some(group) => {
            if group.owner_user_id != auth.user_id {
                return Err(SyncError::Unauthorized(format!(
                    "client group {id} is owned by another user"
                )));
            }
            Ok(Materialized::Found(group))
        }
        None => Ok(Materialized::DefaultedNew(ClientGroupRecord {
            id,
            tenant_id: auth.tenant_id.clone(),
            owner_user_id: auth.user_id.clone(),
            cvr_version: 0,
            last_modified_ms: 0,
        })),
    }
}

/// Loads a client, or materializes one in `client_group_id`.
///
/// # Errors
///
/// [`SyncError::Unauthorized`] if the client belongs to another group.
pub(crate) async fn resolve_client(
    tx: &mut dyn StoreTx,
    auth: &AuthContext,
    client_id: Uuid,
    client_group_id: Uuid,
) -> SyncResult<Materialized<ClientRecord>> {
    match tx.client(&auth.tenant_id, client_id).await? {
        Some(client) => {
            if client.client_group_id != client_group_id {
                return Err(SyncError::Unauthorized(format!(
                    "client {client_id} does not belong to group {client_group_id}"
                )));
            }
            Ok(Materialized::Found(client))
        }
        None => Ok(Materialized::DefaultedNew(ClientRecord {
            id: client_id,
            tenant_id: auth.tenant_id.clone(),
            client_group_id,
            last_mutation_id: 0,
            last_modified_ms: 0,
        })),
    }
}

/// Upserts a client group, stamping its modification time.
pub(crate) async fn save_client_group(
    tx: &mut dyn StoreTx,
    mut group: ClientGroupRecord,
) -> SyncResult<ClientGroupRecord> {
    group.last_modified_ms = now_millis();
    tx.put_client_group(&group).await?;
    Ok(group)
}

/// Upserts a client, stamping its modification time.
pub(crate) async fn save_client(
    tx: &mut dyn StoreTx,
    mut client: ClientRecord,
) -> SyncResult<ClientRecord> {
    client.last_modified_ms = now_millis();
    tx.put_client(&client).await?;
    Ok(client)
}

/// The clients view of a group: one entry per client, versioned by its
/// last mutation id.
pub(crate) async fn clients_view(
    tx: &mut dyn StoreTx,
    auth: &AuthContext,
    client_group_id: Uuid,
) -> SyncResult<Vec<RowMetadata>> {
    let clients = tx.clients_in_group(&auth.tenant_id, client_group_id).await?;
    Ok(clients
        .into_iter()
        .map(|c| RowMetadata::new(c.id.to_string(), c.last_mutation_id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use rowsync_store::{MemoryStore, Store};

    #[tokio::test]
    async fn group_is_materialized_then_found() {
        let store = MemoryStore::new();
        let auth = AuthContext::new("t1", "u1", Role::Customer);
        let group_id = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let group = resolve_client_group(tx.as_mut(), &auth, group_id).await.unwrap();
        assert!(group.is_new());
        assert_eq!(group.get().cvr_version, 0);
        let saved = save_client_group(tx.as_mut(), group.into_inner()).await.unwrap();
        assert!(saved.last_modified_ms > 0);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let group = resolve_client_group(tx.as_mut(), &auth, group_id).await.unwrap();
        assert!(!group.is_new());
        assert_eq!(group.get().owner_user_id, "u1");
    }

    #[tokio::test]
    async fn foreign_group_is_unauthorized() {
        let store = MemoryStore::new();
        let owner = AuthContext::new("t1", "u1", Role::Customer);
        let intruder = AuthContext::new("t1", "u2", Role::Customer);
        let group_id = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let group = resolve_client_group(tx.as_mut(), &owner, group_id).await.unwrap();
        save_client_group(tx.as_mut(), group.into_inner()).await.unwrap();

        let err = resolve_client_group(tx.as_mut(), &intruder, group_id)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn client_must_stay_in_its_group() {
        let store = MemoryStore::new();
        let auth = AuthContext::new("t1", "u1", Role::Customer);
        let (g1, g2, c1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        let client = resolve_client(tx.as_mut(), &auth, c1, g1).await.unwrap();
        assert!(client.is_new());
        let mut client = client.into_inner();
        client.last_mutation_id = 3;
        save_client(tx.as_mut(), client).await.unwrap();

        let found = resolve_client(tx.as_mut(), &auth, c1, g1).await.unwrap();
        assert_eq!(found.get().last_mutation_id, 3);

        let err = resolve_client(tx.as_mut(), &auth, c1, g2).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));

        let view = clients_view(tx.as_mut(), &auth, g1).await.unwrap();
        assert_eq!(view, vec![RowMetadata::new(c1.to_string(), 3)]);
    }
}
