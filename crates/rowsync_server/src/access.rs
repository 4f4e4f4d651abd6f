//! Declarative (role × table) access matrix.
//!
//! Each cell of the matrix is an [`AccessPolicy`]: which rows of the table
//! the role can see, and whether it may create, update or delete rows.
//! Rules are written once at startup against an abstract actor and bound
//! to the caller's [`AuthContext`] at query time, producing a
//! [`RowQuery`] the store evaluates.

use crate::auth::{AuthContext, Role};
use crate::cvr::CLIENTS_VIEW;
use crate::error::{SyncError, SyncResult};
use rowsync_store::{RowFilter, RowQuery};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A write or read action on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Insert a new row.
    Create,
    /// Read a row.
    Read,
    /// Modify an existing row.
    Update,
    /// Soft-delete a row.
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A row predicate relative to the acting user.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Every row.
    All,
    /// No row.
    None,
    /// `row.field == actor.user_id`.
    FieldIsActor(String),
    /// `row.field == value`.
    FieldEquals {
        /// Field name.
        field: String,
        /// Expected value.
        value: Value,
    },
    /// `row.field` appears as `via_field` in a `via_table` row whose
    /// `actor_field` is the acting user.
    Linked {
        /// Field on the row being checked.
        field: String,
        /// The authorization-join table.
        via_table: String,
        /// Join-table field matched against `row.field`.
        via_field: String,
        /// Join-table field holding the authorized user id.
        actor_field: String,
    },
    /// At least one rule matches.
    Any(Vec<Rule>),
    /// Every rule matches.
    Every(Vec<Rule>),
}

impl Rule {
    /// Shorthand for [`Rule::FieldIsActor`].
    pub fn actor(field: impl Into<String>) -> Self {
        Rule::FieldIsActor(field.into())
    }

    /// Shorthand for [`Rule::FieldEquals`].
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Rule::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Shorthand for [`Rule::Linked`].
    pub fn linked(
        field: impl Into<String>,
        via_table: impl Into<String>,
        via_field: impl Into<String>,
        actor_field: impl Into<String>,
    ) -> Self {
        Rule::Linked {
            field: field.into(),
            via_table: via_table.into(),
            via_field: via_field.into(),
            actor_field: actor_field.into(),
        }
    }

    /// Binds the rule to a caller, producing a store filter.
    pub fn bind(&self, auth: &AuthContext) -> RowFilter {
        match self {
            Rule::All => RowFilter::All,
            Rule::None => RowFilter::Nothing,
            Rule::FieldIsActor(field) => RowFilter::eq(field.as_str(), auth.user_id.as_str()),
            Rule::FieldEquals { field, value } => RowFilter::eq(field.as_str(), value.clone()),
            Rule::Linked {
                field,
                via_table,
                via_field,
                actor_field,
            } => RowFilter::Linked {
                field: field.clone(),
                via_table: via_table.clone(),
                via_field: via_field.clone(),
                via_filter: Box::new(RowFilter::eq(actor_field.as_str(), auth.user_id.as_str())),
            },
            Rule::Any(rules) => {
                let filters: Vec<_> = rules.iter().map(|r| r.bind(auth)).collect();
                if filters.iter().any(|f| *f == RowFilter::All) {
                    RowFilter::All
                } else {
                    RowFilter::Or(filters)
                }
            }
            Rule::Every(rules) => rules
                .iter()
                .fold(RowFilter::All, |acc, rule| acc.and(rule.bind(auth))),
        }
    }
}

/// Which rows of a table a role sees.
#[derive(Debug, Clone, PartialEq)]
pub enum Visibility {
    /// Nothing.
    Hidden,
    /// Rows matching `rule`.
    Rows {
        /// Row predicate.
        rule: Rule,
        /// Whether soft-deleted rows are synced too.
        include_deleted: bool,
    },
}

impl Visibility {
    /// Every row, soft-deleted ones included.
    pub fn everything() -> Self {
        Visibility::Rows {
            rule: Rule::All,
            include_deleted: true,
        }
    }

    /// Live rows matching `rule`.
    pub fn live(rule: Rule) -> Self {
        Visibility::Rows {
            rule,
            include_deleted: false,
        }
    }
}

/// Whether a role may perform an action.
#[derive(Debug, Clone, PartialEq)]
pub enum Permission {
    /// Always allowed.
    Allow,
    /// Never allowed.
    Deny,
    /// Allowed if the target row matches the rule.
    Check(Rule),
}

/// One cell of the access matrix.
pub trait AccessPolicy: Send + Sync {
    /// The query selecting rows visible to `auth`.
    fn visible(&self, auth: &AuthContext) -> RowQuery;

    /// The permission for `action`.
    fn action(&self, action: Action) -> Permission;
}

/// The declarative [`AccessPolicy`].
#[derive(Debug, Clone)]
pub struct TablePolicy {
    visibility: Visibility,
    create: Permission,
    update: Permission,
    delete: Permission,
}

impl TablePolicy {
    /// A policy with the given visibility that denies every write.
    pub fn new(visibility: Visibility) -> Self {
        Self {
            visibility,
            create: Permission::Deny,
            update: Permission::Deny,
            delete: Permission::Deny,
        }
    }

    /// Full visibility and every write allowed.
    pub fn unrestricted() -> Self {
        Self::new(Visibility::everything())
            .create(Permission::Allow)
            .update(Permission::Allow)
            .delete(Permission::Allow)
    }

    /// Sets the create permission.
    pub fn create(mut self, permission: Permission) -> Self {
        self.create = permission;
        self
    }

    /// Sets the update permission.
    pub fn update(mut self, permission: Permission) -> Self {
        self.update = permission;
        self
    }

    /// Sets the delete permission.
    pub fn delete(mut self, permission: Permission) -> Self {
        self.delete = permission;
        self
    }
}

impl AccessPolicy for TablePolicy {
    fn visible(&self, auth: &AuthContext) -> RowQuery {
        match &self.visibility {
            Visibility::Hidden => RowQuery::nothing(),
            Visibility::Rows {
                rule,
                include_deleted,
            } => RowQuery {
                filter: rule.bind(auth),
                include_deleted: *include_deleted,
            },
        }
    }

    fn action(&self, action: Action) -> Permission {
        match action {
            Action::Read => match &self.visibility {
                Visibility::Hidden => Permission::Deny,
                Visibility::Rows { rule: Rule::All, .. } => Permission::Allow,
                Visibility::Rows { rule, .. } => Permission::Check(rule.clone()),
            },
            Action::Create => self.create.clone(),
            Action::Update => self.update.clone(),
            Action::Delete => self.delete.clone(),
        }
    }
}

/// The (role × table) matrix, resolved once at startup.
#[derive(Clone, Default)]
pub struct AccessMatrix {
    cells: HashMap<(Role, String), Arc<dyn AccessPolicy>>,
    tables: Vec<String>,
}

impl AccessMatrix {
    /// Starts building a matrix.
    pub fn builder() -> AccessMatrixBuilder {
        AccessMatrixBuilder::default()
    }

    /// Syncable tables in declaration order.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// The policy for a cell, if one was declared.
    pub fn policy(&self, role: Role, table: &str) -> Option<&Arc<dyn AccessPolicy>> {
        self.cells.get(&(role, table.to_string()))
    }

    /// The query selecting rows of `table` visible to `auth`.
    ///
    /// Undeclared cells see nothing.
    pub fn visible(&self, table: &str, auth: &AuthContext) -> RowQuery {
        match self.policy(auth.role, table) {
            Some(policy) => policy.visible(auth),
            None => RowQuery::nothing(),
        }
    }

    /// The permission for `action` on `table`.
    ///
    /// Undeclared cells deny.
    pub fn permission(&self, table: &str, role: Role, action: Action) -> Permission {
        match self.policy(role, table) {
            Some(policy) => policy.action(action),
            None => Permission::Deny,
        }
    }
}

impl fmt::Debug for AccessMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessMatrix")
            .field("tables", &self.tables)
            .field("cells", &self.cells.len())
            .finish()
    }
}

/// Builder for [`AccessMatrix`].
#[derive(Default)]
pub struct AccessMatrixBuilder {
    tables: Vec<String>,
    cells: Vec<(Role, String, Arc<dyn AccessPolicy>)>,
}

impl AccessMatrixBuilder {
    /// Declares a syncable table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.tables.push(table.into());
        self
    }

    /// Sets the policy for one (role, table) cell.
    pub fn policy(
        mut self,
        role: Role,
        table: impl Into<String>,
        policy: impl AccessPolicy + 'static,
    ) -> Self {
        self.cells.push((role, table.into(), Arc::new(policy)));
        self
    }

    /// Builds the matrix.
    ///
    /// # Errors
    ///
    /// Fails on duplicate tables or cells, on cells for undeclared
    /// tables, and on the reserved clients view name.
    pub fn build(self) -> SyncResult<AccessMatrix> {
        let mut tables: Vec<String> = Vec::with_capacity(self.tables.len());
        for table in self.tables {
            if table == CLIENTS_VIEW {
                return Err(SyncError::Config(format!(
                    "table name {CLIENTS_VIEW:?} is reserved"
                )));
            }
            if tables.contains(&table) {
                return Err(SyncError::Config(format!("duplicate table {table:?}")));
            }
            tables.push(table);
        }

        let mut cells = HashMap::new();
        for (role, table, policy) in self.cells {
            if !tables.contains(&table) {
                return Err(SyncError::Config(format!(
                    "policy for undeclared table {table:?}"
                )));
            }
            if cells.insert((role, table.clone()), policy).is_some() {
                return Err(SyncError::Config(format!(
                    "duplicate policy for ({role}, {table})"
                )));
            }
        }

        Ok(AccessMatrix { cells, tables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> AuthContext {
        AuthContext::new("t1", "m1", Role::Manager)
    }

    #[test]
    fn linked_rule_binds_actor() {
        let rule = Rule::linked("billingAccountId", "billingAccountManagers", "billingAccountId", "managerId");
        assert_eq!(
            rule.bind(&manager()),
            RowFilter::Linked {
                field: "billingAccountId".into(),
                via_table: "billingAccountManagers".into(),
                via_field: "billingAccountId".into(),
                via_filter: Box::new(RowFilter::eq("managerId", "m1")),
            }
        );
    }

    #[test]
    fn combinators_fold() {
        let auth = manager();
        assert_eq!(
            Rule::Any(vec![Rule::actor("ownerId"), Rule::All]).bind(&auth),
            RowFilter::All
        );
        assert_eq!(
            Rule::Every(vec![Rule::All, Rule::equals("status", "open")]).bind(&auth),
            RowFilter::eq("status", json!("open"))
        );
        assert!(Rule::Every(vec![Rule::actor("ownerId"), Rule::None])
            .bind(&auth)
            .is_nothing());
    }

    #[test]
    fn missing_cells_deny() {
        let matrix = AccessMatrix::builder()
            .table("orders")
            .policy(Role::Administrator, "orders", TablePolicy::unrestricted())
            .build()
            .unwrap();

        let customer = AuthContext::new("t1", "c1", Role::Customer);
        assert!(matrix.visible("orders", &customer).filter.is_nothing());
        assert_eq!(
            matrix.permission("orders", Role::Customer, Action::Update),
            Permission::Deny
        );
        assert_eq!(
            matrix.permission("orders", Role::Administrator, Action::Delete),
            Permission::Allow
        );
        assert!(matrix.visible("orders", &AuthContext::new("t1", "a", Role::Administrator)).include_deleted);
    }

    #[test]
    fn read_permission_follows_visibility() {
        let policy = TablePolicy::new(Visibility::live(Rule::actor("customerId")));
        assert_eq!(
            policy.action(Action::Read),
            Permission::Check(Rule::actor("customerId"))
        );
        assert_eq!(
            TablePolicy::new(Visibility::Hidden).action(Action::Read),
            Permission::Deny
        );
    }

    #[test]
    fn builder_rejects_bad_matrices() {
        assert!(AccessMatrix::builder().table("clients").build().is_err());
        assert!(AccessMatrix::builder().table("a").table("a").build().is_err());
        assert!(AccessMatrix::builder()
            .policy(Role::Customer, "ghost", TablePolicy::unrestricted())
            .build()
            .is_err());
        assert!(AccessMatrix::builder()
            .table("a")
            .policy(Role::Customer, "a", TablePolicy::unrestricted())
            .policy(Role::Customer, "a", TablePolicy::unrestricted())
            .build()
            .is_err());
    }
}
