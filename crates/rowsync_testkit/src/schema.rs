//! Demo schema and its access matrix.
//!
//! A small order-management tenant:
//!
//! | table                    | fields                                              |
//! |--------------------------|-----------------------------------------------------|
//! | `orders`                 | `billingAccountId`, `customerId`, `description`, `status` |
//! | `billingAccounts`        | `name`, `customerId`                                |
//! | `billingAccountManagers` | `billingAccountId`, `managerId`                     |
//! | `comments`               | `orderId`, `customerId`, `authorId`, `body`, `internal` |
//! | `rooms`                  | `name`, `customerId`                                |
//!
//! Administrators see everything, soft-deleted rows included. Operators see
//! every live row. Managers see the orders and accounts they are assigned
//! to through `billingAccountManagers`. Customers see their own rows and
//! the non-internal comments on them.

use rowsync_server::{AccessMatrix, Permission, Role, Rule, SyncResult, TablePolicy, Visibility};

/// Orders.
pub const ORDERS: &str = "orders";
/// Billing accounts.
pub const BILLING_ACCOUNTS: &str = "billingAccounts";
/// Manager to billing account assignments.
pub const BILLING_ACCOUNT_MANAGERS: &str = "billingAccountManagers";
/// Order comments.
pub const COMMENTS: &str = "comments";
/// Chat rooms.
pub const ROOMS: &str = "rooms";

/// Every demo table, in sync order.
pub const TABLES: [&str; 5] = [
    BILLING_ACCOUNTS,
    BILLING_ACCOUNT_MANAGERS,
    ORDERS,
    COMMENTS,
    ROOMS,
];

fn managed(field: &str) -> Rule {
    Rule::linked(field, BILLING_ACCOUNT_MANAGERS, "billingAccountId", "managerId")
}

fn customer_comments() -> Rule {
    Rule::Every(vec![
        Rule::actor("customerId"),
        Rule::equals("internal", false),
    ])
}

/// Builds the demo access matrix.
pub fn demo_matrix() -> SyncResult<AccessMatrix> {
    let mut builder = AccessMatrix::builder();
    for table in TABLES {
        builder = builder
            .table(table)
            .policy(Role::Administrator, table, TablePolicy::unrestricted());
    }

    builder
        // operators
        .policy(
            Role::Operator,
            ORDERS,
            TablePolicy::new(Visibility::live(Rule::All))
                .create(Permission::Allow)
                .update(Permission::Allow),
        )
        .policy(
            Role::Operator,
            BILLING_ACCOUNTS,
            TablePolicy::new(Visibility::live(Rule::All)),
        )
        .policy(
            Role::Operator,
            BILLING_ACCOUNT_MANAGERS,
            TablePolicy::new(Visibility::live(Rule::All))
                .create(Permission::Allow)
                .delete(Permission::Allow),
        )
        .policy(
            Role::Operator,
            COMMENTS,
            TablePolicy::new(Visibility::live(Rule::All))
                .create(Permission::Allow)
                .update(Permission::Check(Rule::actor("authorId")))
                .delete(Permission::Check(Rule::actor("authorId"))),
        )
        .policy(
            Role::Operator,
            ROOMS,
            TablePolicy::new(Visibility::live(Rule::All)).create(Permission::Allow),
        )
        // managers
        .policy(
            Role::Manager,
            ORDERS,
            TablePolicy::new(Visibility::live(managed("billingAccountId")))
                .create(Permission::Allow)
                .update(Permission::Check(managed("billingAccountId"))),
        )
        .policy(
            Role::Manager,
            BILLING_ACCOUNTS,
            TablePolicy::new(Visibility::live(managed("id"))),
        )
        .policy(
            Role::Manager,
            BILLING_ACCOUNT_MANAGERS,
            TablePolicy::new(Visibility::live(Rule::actor("managerId"))),
        )
        .policy(
            Role::Manager,
            COMMENTS,
            TablePolicy::new(Visibility::live(Rule::All))
                .create(Permission::Allow)
                .update(Permission::Check(Rule::actor("authorId")))
                .delete(Permission::Check(Rule::actor("authorId"))),
        )
        .policy(
            Role::Manager,
            ROOMS,
            TablePolicy::new(Visibility::live(Rule::All)),
        )
        // customers
        .policy(
            Role::Customer,
            ORDERS,
            TablePolicy::new(Visibility::live(Rule::actor("customerId")))
                .create(Permission::Allow)
                .update(Permission::Check(Rule::actor("customerId")))
                .delete(Permission::Check(Rule::actor("customerId"))),
        )
        .policy(
            Role::Customer,
            BILLING_ACCOUNTS,
            TablePolicy::new(Visibility::live(Rule::actor("customerId"))),
        )
        .policy(
            Role::Customer,
            COMMENTS,
            TablePolicy::new(Visibility::live(customer_comments()))
                .create(Permission::Allow)
                .update(Permission::Check(Rule::actor("authorId")))
                .delete(Permission::Check(Rule::actor("authorId"))),
        )
        .policy(
            Role::Customer,
            ROOMS,
            TablePolicy::new(Visibility::live(Rule::actor("customerId"))),
        )
        .build()
}
