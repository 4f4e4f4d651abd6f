//! # RowSync Testkit
//!
//! Test utilities for RowSync.
//!
//! This crate provides:
//! - A demo multi-tenant schema (orders, billing accounts, manager
//!   assignments, comments, rooms) with its access matrix
//! - Authoritative mutators for the demo schema
//! - A seeded [`TestServer`] fixture over a [`rowsync_store::MemoryStore`]
//! - A [`RecordingPublisher`] that captures pokes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rowsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn manager_sees_assigned_orders() {
//!     let ts = TestServer::new().await;
//!     let ok = ts.pull(&ts.auth(MANAGER, Role::Manager), Uuid::new_v4(), None).await;
//!     assert!(ok.is_reset());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod mutators;
pub mod schema;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::mutators::*;
    pub use crate::schema::*;
    pub use rowsync_protocol::{Mutation, PatchOperation, PullOk, PushRequest, PushResponse};
    pub use rowsync_server::{AuthContext, Role, SyncError};
    pub use uuid::Uuid;
}

pub use fixtures::*;
pub use mutators::*;
pub use schema::*;
