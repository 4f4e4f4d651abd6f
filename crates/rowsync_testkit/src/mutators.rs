//! Authoritative mutators for the demo schema.

use crate::schema::{BILLING_ACCOUNTS, COMMENTS, ORDERS};
use async_trait::async_trait;
use rowsync_server::{
    parse_args, Action, Channel, MutationContext, Mutator, MutatorError, MutatorRegistry, Role,
};
use rowsync_store::{Row, StoreTx};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Registers every demo mutator.
pub fn demo_mutators() -> MutatorRegistry {
    MutatorRegistry::new()
        .register("createOrder", CreateOrder)
        .register("updateOrder", UpdateOrder)
        .register("deleteOrder", DeleteOrder)
        .register("createComment", CreateComment)
}

/// Channel poked for changes under a billing account.
pub fn account_channel(billing_account_id: &str) -> Channel {
    format!("billingAccount/{billing_account_id}")
}

/// Channel poked for changes to an order's comments.
pub fn order_channel(order_id: &str) -> Channel {
    format!("order/{order_id}")
}

async fn live_row(
    tx: &mut dyn StoreTx,
    ctx: &MutationContext<'_>,
    table: &str,
    id: &str,
) -> Result<Row, MutatorError> {
    match tx.row(&ctx.auth.tenant_id, table, id).await? {
        Some(row) if !row.is_deleted() => Ok(row),
        _ => Err(MutatorError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        }),
    }
}

fn text(row: &Row, field: &str) -> String {
    row.field(field)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderArgs {
    id: String,
    billing_account_id: String,
    #[serde(default)]
    description: String,
}

/// `createOrder {id, billingAccountId, description}`.
///
/// The caller must be able to see the billing account; the order inherits
/// its customer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOrder;

#[async_trait]
impl Mutator for CreateOrder {
    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &MutationContext<'_>,
        args: &Value,
    ) -> Result<Vec<Channel>, MutatorError> {
        let args: CreateOrderArgs = parse_args(args)?;
        let tenant = ctx.auth.tenant_id.as_str();

        ctx.resolver
            .enforce_permission(tx, ORDERS, Action::Create, ctx.auth, None)
            .await?;
        if !ctx
            .resolver
            .check_permission(tx, BILLING_ACCOUNTS, Action::Read, ctx.auth, Some(&args.billing_account_id))
            .await?
        {
            return Err(MutatorError::NotFound {
                table: BILLING_ACCOUNTS.to_string(),
                id: args.billing_account_id,
            });
        }
        if tx.row(tenant, ORDERS, &args.id).await?.is_some() {
            return Err(MutatorError::Rejected(format!("order {} already exists", args.id)));
        }

        let account = live_row(tx, ctx, BILLING_ACCOUNTS, &args.billing_account_id).await?;
        let mut fields = Map::new();
        fields.insert("billingAccountId".into(), Value::String(args.billing_account_id.clone()));
        fields.insert("customerId".into(), Value::String(text(&account, "customerId")));
        fields.insert("description".into(), Value::String(args.description));
        fields.insert("status".into(), Value::String("open".into()));
        fields.insert("createdBy".into(), Value::String(ctx.auth.user_id.clone()));

        let row = tx.upsert_row(tenant, ORDERS, &args.id, fields).await?;
        debug!(order = %row.id, version = row.row_version, "order created");

        Ok(vec![
            ctx.auth.user_id.clone(),
            account_channel(&args.billing_account_id),
        ])
    }
}

#[derive(Debug, Deserialize)]
struct UpdateOrderArgs {
    id: String,
    description: Option<String>,
    status: Option<String>,
}

/// `updateOrder {id, description?, status?}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOrder;

#[async_trait]
impl Mutator for UpdateOrder {
    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &MutationContext<'_>,
        args: &Value,
    ) -> Result<Vec<Channel>, MutatorError> {
        let args: UpdateOrderArgs = parse_args(args)?;
        let order = live_row(tx, ctx, ORDERS, &args.id).await?;
        ctx.resolver
            .enforce_permission(tx, ORDERS, Action::Update, ctx.auth, Some(&args.id))
            .await?;

        let mut fields = order.fields.clone();
        if let Some(description) = args.description {
            fields.insert("description".into(), Value::String(description));
        }
        if let Some(status) = args.status {
            if ctx.auth.role == Role::Customer && status != "cancelled" {
                return Err(MutatorError::Rejected(format!(
                    "customers cannot set status {status:?}"
                )));
            }
            fields.insert("status".into(), Value::String(status));
        }
        tx.upsert_row(&ctx.auth.tenant_id, ORDERS, &args.id, fields)
            .await?;

        Ok(vec![
            ctx.auth.user_id.clone(),
            account_channel(&text(&order, "billingAccountId")),
        ])
    }
}

#[derive(Debug, Deserialize)]
struct DeleteOrderArgs {
    id: String,
}

/// `deleteOrder {id}`. Soft-deletes the order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOrder;

#[async_trait]
impl Mutator for DeleteOrder {
    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &MutationContext<'_>,
        args: &Value,
    ) -> Result<Vec<Channel>, MutatorError> {
        let args: DeleteOrderArgs = parse_args(args)?;
        let order = live_row(tx, ctx, ORDERS, &args.id).await?;
        ctx.resolver
            .enforce_permission(tx, ORDERS, Action::Delete, ctx.auth, Some(&args.id))
            .await?;
        tx.soft_delete_row(&ctx.auth.tenant_id, ORDERS, &args.id)
            .await?;

        Ok(vec![
            ctx.auth.user_id.clone(),
            account_channel(&text(&order, "billingAccountId")),
        ])
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCommentArgs {
    id: String,
    order_id: String,
    body: String,
    #[serde(default)]
    internal: bool,
}

/// `createComment {id, orderId, body, internal?}`.
///
/// Customers cannot write internal comments.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateComment;

#[async_trait]
impl Mutator for CreateComment {
    async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        ctx: &MutationContext<'_>,
        args: &Value,
    ) -> Result<Vec<Channel>, MutatorError> {
        let args: CreateCommentArgs = parse_args(args)?;
        if args.body.trim().is_empty() {
            return Err(MutatorError::Rejected("empty comment".into()));
        }
        if args.internal && ctx.auth.role == Role::Customer {
            return Err(MutatorError::Rejected("customers cannot post internal comments".into()));
        }

        ctx.resolver
            .enforce_permission(tx, COMMENTS, Action::Create, ctx.auth, None)
            .await?;
        if !ctx
            .resolver
            .check_permission(tx, ORDERS, Action::Read, ctx.auth, Some(&args.order_id))
            .await?
        {
            return Err(MutatorError::NotFound {
                table: ORDERS.to_string(),
                id: args.order_id,
            });
        }
        let order = live_row(tx, ctx, ORDERS, &args.order_id).await?;
        if tx.row(&ctx.auth.tenant_id, COMMENTS, &args.id).await?.is_some() {
            return Err(MutatorError::Rejected(format!("comment {} already exists", args.id)));
        }

        let mut fields = Map::new();
        fields.insert("orderId".into(), Value::String(args.order_id.clone()));
        fields.insert("customerId".into(), Value::String(text(&order, "customerId")));
        fields.insert("authorId".into(), Value::String(ctx.auth.user_id.clone()));
        fields.insert("body".into(), Value::String(args.body));
        fields.insert("internal".into(), Value::Bool(args.internal));
        tx.upsert_row(&ctx.auth.tenant_id, COMMENTS, &args.id, fields)
            .await?;

        Ok(vec![ctx.auth.user_id.clone(), order_channel(&args.order_id)])
    }
}
