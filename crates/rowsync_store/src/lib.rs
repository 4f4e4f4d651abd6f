//! # RowSync Store
//!
//! Transactional store abstraction and implementations for RowSync.
//!
//! This crate is the lowest layer of the sync server. It knows how to
//! persist client groups, clients, client view records (CVRs) and the
//! tenant-scoped entity rows that get synced, and how to answer
//! declarative visibility queries over those rows. It knows nothing about
//! the pull/push protocol itself.
//!
//! ## Design Principles
//!
//! - Every access goes through an explicit transaction handle ([`StoreTx`])
//! - Every row, client and client group is scoped by a tenant identifier
//! - Transient contention is reported as a classified [`StoreError`], and
//!   callers decide whether to retry
//! - Backends must be `Send + Sync` and fully async
//!
//! ## Available Backends
//!
//! - [`MemoryStore`] - Single-writer in-memory store for tests and demos,
//!   with commit fault injection
//!
//! ## Example
//!
//! ```rust
//! use rowsync_store::{MemoryStore, Store, StoreTx};
//! use serde_json::json;
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! runtime.block_on(async {
//!     let store = MemoryStore::new();
//!     let mut tx = store.begin().await.unwrap();
//!     let fields = json!({"title": "hello"}).as_object().cloned().unwrap();
//!     let row = tx.upsert_row("acme", "orders", "o-1", fields).await.unwrap();
//!     tx.commit().await.unwrap();
//!     assert_eq!(row.row_version, 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod backend;
mod error;
mod memory;
mod query;
mod types;

pub use backend::{Store, StoreTx};
pub use error::{StoreError, StoreResult};
pub use memory::{InjectedFault, MemoryStore};
pub use query::{RowFilter, RowQuery};
pub use types::{
    now_millis, ClientGroupRecord, ClientRecord, ClientViewRecord, CvrRecord, Row, RowMetadata,
    SweepStats, RESERVED_FIELDS,
};
