//! # RowSync Server
//!
//! Pull/push sync server that keeps many clients' local caches consistent
//! with a multi-tenant store.
//!
//! This crate provides:
//! - Row-level access control over a (role × table) matrix
//! - Client view record (CVR) building and diffing
//! - Client and client group bookkeeping
//! - Pull: one transaction producing an ordered patch
//! - Push: one transaction per mutation, exactly-once, with error-mode retry
//! - Best-effort poke fanout after commits
//! - An `axum` HTTP surface and a background retention sweeper
//!
//! # Architecture
//!
//! ```text
//! client ─▶ pull / push handlers ─▶ resolver, CVR engine, registry, mutators
//!                                         │
//!                                         ▼
//!                                    Store (transactions)
//! push ── after commit ──▶ fanout ──▶ Publisher
//! ```
//!
//! Every operation takes an explicit transaction handle and
//! [`AuthContext`]; there is no ambient state.
//!
//! # Protocol
//!
//! 1. Client pulls with its last cookie; the server diffs the previous CVR
//!    against what the caller can see now and returns puts and dels
//! 2. Client pushes queued mutations; each is applied at most once,
//!    tracked by a per-client `lastMutationId`
//! 3. Other clients get a poke and pull again
//!
//! # Example
//!
//! ```rust,ignore
//! use rowsync_server::{AccessMatrix, MutatorRegistry, ServerConfig, SyncServer};
//! use rowsync_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let server = SyncServer::builder(Arc::new(MemoryStore::new()))
//!     .config(ServerConfig::default())
//!     .matrix(my_matrix)
//!     .mutators(my_mutators)
//!     .build()?;
//! let app = rowsync_server::router(Arc::new(server));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod access;
mod auth;
mod config;
mod cvr;
mod error;
mod fanout;
mod handler;
mod http;
mod mutator;
mod pull;
mod push;
mod registry;
mod resolver;
mod server;
mod sweeper;
mod txn;

pub use access::{AccessMatrix, AccessMatrixBuilder, AccessPolicy, Action, Permission, Rule, TablePolicy, Visibility};
pub use auth::{AuthContext, Role};
pub use config::{RetryConfig, ServerConfig};
pub use cvr::{build_base_cvr, build_next_cvr, diff, CvrDiff, TableDiff, CLIENTS_VIEW};
pub use error::{SyncError, SyncResult};
pub use fanout::{BroadcastPublisher, Fanout, NoopPublisher, Poke, PublishError, Publisher};
pub use handler::{HandlerContext, RequestHandler};
pub use http::{auth_from_headers, router, TENANT_HEADER, USER_HEADER, ROLE_HEADER};
pub use mutator::{parse_args, Channel, MutationContext, Mutator, MutatorError, MutatorRegistry};
pub use push::{MutationStatus, PushOutcome};
pub use registry::Materialized;
pub use resolver::Resolver;
pub use server::{SyncServer, SyncServerBuilder};
pub use sweeper::{sweep_once, Sweeper};
pub use txn::{transact, TxWork};
