//! Push: apply a batch of client mutations, each exactly once.
//!
//! Every mutation runs in its own transaction. A mutation whose mutator
//! fails is retried once in error mode, where the mutator is skipped but
//! the client's mutation counter still advances, so one bad mutation never
//! wedges the client's queue.

use crate::auth::AuthContext;
use crate::error::{SyncError, SyncResult};
use crate::handler::HandlerContext;
use crate::mutator::{Channel, MutationContext, MutatorError, MutatorRegistry};
use crate::registry::{resolve_client, resolve_client_group, save_client, save_client_group};
use crate::resolver::Resolver;
use crate::txn::{transact, TxWork};
use async_trait::async_trait;
use rowsync_protocol::{
    ErrorResponse, Mutation, PushRequest, PushResponse, VersionType, PUSH_VERSION,
};
use rowsync_store::StoreTx;
use std::collections::BTreeSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What happened to one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    /// The mutator ran and committed.
    Applied,
    /// The mutator failed; only the counter advanced.
    Skipped,
    /// The id was already processed; nothing changed.
    AlreadyApplied,
}

/// Result of a push batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    /// Wire response.
    pub response: PushResponse,
    /// Channels poked after the batch.
    pub channels: BTreeSet<Channel>,
    /// Status of each processed mutation, in order.
    pub statuses: Vec<MutationStatus>,
}

impl PushOutcome {
    fn new() -> Self {
        Self {
            response: PushResponse::Ok,
            channels: BTreeSet::new(),
            statuses: Vec::new(),
        }
    }

    fn rejected(error: ErrorResponse) -> Self {
        Self {
            response: PushResponse::Error(error),
            ..Self::new()
        }
    }

    /// Number of mutations with the given status.
    pub fn count(&self, status: MutationStatus) -> usize {
        self.statuses.iter().filter(|s| **s == status).count()
    }
}

pub(crate) async fn handle_push(
    ctx: &HandlerContext,
    auth: &AuthContext,
    request: PushRequest,
) -> SyncResult<PushOutcome> {
    auth.validate()?;
    if request.push_version != PUSH_VERSION {
        debug!(version = request.push_version, "unsupported push version");
        return Ok(PushOutcome::rejected(ErrorResponse::VersionNotSupported {
            version_type: VersionType::Push,
        }));
    }
    if request.mutations.len() > ctx.config.max_push_batch {
        return Err(SyncError::BadRequest(format!(
            "too many mutations: {} > {}",
            request.mutations.len(),
            ctx.config.max_push_batch
        )));
    }
    let client_group_id = request.validate()?;

    let span = info_span!("push", client_group = %client_group_id, mutations = request.mutations.len());
    let mut outcome = PushOutcome::new();
    let result = process_batch(ctx, auth, client_group_id, &request.mutations, &mut outcome)
        .instrument(span)
        .await;

    if !outcome.channels.is_empty() {
        ctx.fanout.spawn_notify(outcome.channels.iter().cloned());
    }
    result?;

    info!(
        client_group = %client_group_id,
        applied = outcome.count(MutationStatus::Applied),
        skipped = outcome.count(MutationStatus::Skipped),
        already_applied = outcome.count(MutationStatus::AlreadyApplied),
        "push complete"
    );
    Ok(outcome)
}

async fn process_batch(
    ctx: &HandlerContext,
    auth: &AuthContext,
    client_group_id: Uuid,
    mutations: &[Mutation],
    outcome: &mut PushOutcome,
) -> SyncResult<()> {
    for mutation in mutations {
        let client_id = mutation.validate()?;
        let mut work = MutationWork {
            auth,
            resolver: &ctx.resolver,
            mutators: &ctx.mutators,
            client_group_id,
            client_id,
            mutation,
            error_mode: false,
        };

        let result = match transact(ctx.store.as_ref(), &ctx.config.retry, &mut work).await {
            Err(err) if err.is_mutation_failure() => {
                warn!(
                    client = %client_id,
                    mutation_id = mutation.id,
                    name = %mutation.name,
                    error = %err,
                    "mutation failed, retrying in error mode"
                );
                work.error_mode = true;
                transact(ctx.store.as_ref(), &ctx.config.retry, &mut work).await
            }
            other => other,
        };

        match result {
            Ok((status, channels)) => {
                outcome.statuses.push(status);
                outcome.channels.extend(channels);
            }
            Err(SyncError::ClientStateNotFound) => {
                info!(client = %client_id, mutation_id = mutation.id, "client state not found");
                outcome.response = PushResponse::Error(ErrorResponse::ClientStateNotFound);
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

struct MutationWork<'a> {
    auth: &'a AuthContext,
    resolver: &'a Resolver,
    mutators: &'a MutatorRegistry,
    client_group_id: Uuid,
    client_id: Uuid,
    mutation: &'a Mutation,
    error_mode: bool,
}

#[async_trait]
impl TxWork for MutationWork<'_> {
    type Output = (MutationStatus, Vec<Channel>);

    async fn run(&mut self, tx: &mut dyn StoreTx) -> SyncResult<Self::Output> {
        let group = resolve_client_group(tx, self.auth, self.client_group_id)
            .await?
            .into_inner();
        let mut client = resolve_client(tx, self.auth, self.client_id, self.client_group_id)
            .await?
            .into_inner();

        if client.last_mutation_id == 0 && self.mutation.id > 1 {
            return Err(SyncError::ClientStateNotFound);
        }

        let next_mutation_id = client.last_mutation_id + 1;
        if self.mutation.id < next_mutation_id {
            debug!(
                client = %self.client_id,
                mutation_id = self.mutation.id,
                "mutation already applied"
            );
            return Ok((MutationStatus::AlreadyApplied, Vec::new()));
        }
        if self.mutation.id > next_mutation_id {
            return Err(SyncError::MutationConflict {
                client_id: self.client_id,
                expected: next_mutation_id,
                actual: self.mutation.id,
            });
        }

        let (status, channels) = if self.error_mode {
            (MutationStatus::Skipped, Vec::new())
        } else {
            (MutationStatus::Applied, self.apply(tx).await?)
        };

        save_client_group(tx, group).await?;
        client.last_mutation_id = next_mutation_id;
        save_client(tx, client).await?;

        Ok((status, channels))
    }
}

impl MutationWork<'_> {
    async fn apply(&self, tx: &mut dyn StoreTx) -> SyncResult<Vec<Channel>> {
        let name = &self.mutation.name;
        let failed = |source: MutatorError| SyncError::Mutation {
            name: name.clone(),
            source,
        };

        let mutator = self
            .mutators
            .get(name)
            .ok_or_else(|| failed(MutatorError::Unknown(name.clone())))?;
        let ctx = MutationContext {
            auth: self.auth,
            resolver: self.resolver,
            client_id: self.client_id,
            client_group_id: self.client_group_id,
            mutation_id: self.mutation.id,
            timestamp: self.mutation.timestamp,
        };
        mutator
            .apply(tx, &ctx, &self.mutation.args)
            .await
            .map_err(failed)
    }
}
