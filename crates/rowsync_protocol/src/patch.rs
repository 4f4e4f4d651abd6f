//! Pull patches and cookies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One step of a pull patch, applied by the client in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    /// Drop everything in the client cache.
    Clear,
    /// Insert or replace `key` with `value`.
    Put {
        /// Cache key, `<table>/<id>`.
        key: String,
        /// Full row.
        value: Value,
    },
    /// Remove `key`.
    Del {
        /// Cache key, `<table>/<id>`.
        key: String,
    },
}

impl PatchOperation {
    /// Builds the cache key of a row.
    pub fn key(table: &str, id: &str) -> String {
        format!("{table}/{id}")
    }

    /// Creates a put for a row.
    pub fn put(table: &str, id: &str, value: Value) -> Self {
        PatchOperation::Put {
            key: Self::key(table, id),
            value,
        }
    }

    /// Creates a delete for a row.
    pub fn del(table: &str, id: &str) -> Self {
        PatchOperation::Del {
            key: Self::key(table, id),
        }
    }
}

impl fmt::Display for PatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOperation::Clear => f.write_str("clear"),
            PatchOperation::Put { key, .. } => write!(f, "put {key}"),
            PatchOperation::Del { key } => write!(f, "del {key}"),
        }
    }
}

/// Opaque pull cookie naming the CVR version a client last received.
///
/// Servers emit the bare number; clients may echo it back either as the
/// number or as `{"order": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "CookieRepr")]
pub struct Cookie {
    /// CVR version.
    pub order: u64,
}

impl Cookie {
    /// Creates a cookie.
    pub fn new(order: u64) -> Self {
        Self { order }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CookieRepr {
    Order(u64),
    Object { order: u64 },
}

impl From<CookieRepr> for Cookie {
    fn from(repr: CookieRepr) -> Self {
        match repr {
            CookieRepr::Order(order) | CookieRepr::Object { order } => Cookie { order },
        }
    }
}
