//! Access control resolution against a live transaction.

use crate::access::{AccessMatrix, Action, Permission};
use crate::auth::AuthContext;
use crate::error::{SyncError, SyncResult};
use rowsync_store::{RowMetadata, RowQuery, StoreTx};
use std::sync::Arc;
use tracing::debug;

/// Evaluates the access matrix for a caller.
#[derive(Debug, Clone)]
pub struct Resolver {
    matrix: Arc<AccessMatrix>,
}

impl Resolver {
    /// Creates a resolver over a matrix.
    pub fn new(matrix: AccessMatrix) -> Self {
        Self {
            matrix: Arc::new(matrix),
        }
    }

    /// The underlying matrix.
    pub fn matrix(&self) -> &AccessMatrix {
        &self.matrix
    }

    /// Tables synced to clients.
    pub fn syncable_tables(&self) -> &[String] {
        self.matrix.tables()
    }

    /// Id and version of every row of `table` visible to `auth`.
    pub async fn visible_row_metadata(
        &self,
        tx: &mut dyn StoreTx,
        table: &str,
        auth: &AuthContext,
    ) -> SyncResult<Vec<RowMetadata>> {
        let query = self.matrix.visible(table, auth);
        if query.filter.is_nothing() {
            return Ok(Vec::new());
        }
        Ok(tx.query_metadata(&auth.tenant_id, table, &query).await?)
    }

    /// Returns true if `auth` may perform `action` on `table`.
    ///
    /// `Check` permissions are evaluated against the live target row; with
    /// no target they fail.
    pub async fn check_permission(
        &self,
        tx: &mut dyn StoreTx,
        table: &str,
        action: Action,
        auth: &AuthContext,
        target_row_id: Option<&str>,
    ) -> SyncResult<bool> {
        let rule = match self.matrix.permission(table, auth.role, action) {
            Permission::Allow => return Ok(true),
            Permission::Deny => return Ok(false),
            Permission::Check(rule) => rule,
        };

        let Some(id) = target_row_id else {
            debug!(table, %action, "permission check without a target row");
            return Ok(false);
        };

        let query = RowQuery::live(rule.bind(auth)).by_id(id);
        if query.filter.is_nothing() {
            return Ok(false);
        }
        let matches = tx.query_metadata(&auth.tenant_id, table, &query).await?;
        Ok(!matches.is_empty())
    }

    /// Like [`Resolver::check_permission`], failing with
    /// [`SyncError::AccessDenied`].
    pub async fn enforce_permission(
        &self,
        tx: &mut dyn StoreTx,
        table: &str,
        action: Action,
        auth: &AuthContext,
        target_row_id: Option<&str>,
    ) -> SyncResult<()> {
        if self
            .check_permission(tx, table, action, auth, target_row_id)
            .await?
        {
            Ok(())
        } else {
            Err(SyncError::AccessDenied {
                table: table.to_string(),
                action,
            })
        }
    }
}
