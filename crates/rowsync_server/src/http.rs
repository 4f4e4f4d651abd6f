//! HTTP surface.
//!
//! - `POST /pull` - pull request, answers a patch or structured error
//! - `POST /push` - push request, answers `null` or a structured error
//! - `GET /health` - liveness
//!
//! Identity is taken from headers set by an upstream gateway.

use crate::auth::{AuthContext, Role};
use crate::error::{SyncError, SyncResult};
use crate::server::SyncServer;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rowsync_protocol::{
    ErrorResponse, PullRequest, PullResponse, PushRequest, PushResponse, VersionType,
    PULL_VERSION, PUSH_VERSION,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// Header carrying the tenant id.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the user id.
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the user's role.
pub const ROLE_HEADER: &str = "x-user-role";

/// Builds the sync router.
pub fn router(server: Arc<SyncServer>) -> Router {
    Router::new()
        .route("/pull", post(pull))
        .route("/push", post(push))
        .route("/health", get(health))
        .with_state(server)
}

/// Reads the caller identity from request headers.
///
/// # Errors
///
/// [`SyncError::Unauthenticated`] if a header is missing, empty, not valid
/// text, or names an unknown role.
pub fn auth_from_headers(headers: &HeaderMap) -> SyncResult<AuthContext> {
    fn header<'a>(headers: &'a HeaderMap, name: &str) -> SyncResult<&'a str> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SyncError::Unauthenticated(format!("missing {name} header")))
    }

    let auth = AuthContext::new(
        header(headers, TENANT_HEADER)?,
        header(headers, USER_HEADER)?,
        header(headers, ROLE_HEADER)?.parse::<Role>()?,
    );
    auth.validate()?;
    Ok(auth)
}

/// Decodes a request body.
///
/// The protocol version is read first, so a client speaking another
/// version gets `None` (answered with `VersionNotSupported`) even when
/// the rest of its body has a different shape.
fn decode<T: DeserializeOwned>(
    body: Result<Json<Value>, JsonRejection>,
    version_field: &str,
    supported: u32,
) -> SyncResult<Option<T>> {
    let Json(value) = body.map_err(|e| SyncError::BadRequest(e.body_text()))?;
    let version = value.get(version_field).and_then(Value::as_u64);
    if version.is_some_and(|v| v != u64::from(supported)) {
        debug!(version_field, ?version, "unsupported protocol version");
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| SyncError::BadRequest(e.to_string()))
}

async fn pull(
    State(server): State<Arc<SyncServer>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<PullResponse>, SyncError> {
    let auth = auth_from_headers(&headers)?;
    let Some(request) = decode::<PullRequest>(body, "pullVersion", PULL_VERSION)? else {
        return Ok(Json(PullResponse::Error(ErrorResponse::VersionNotSupported {
            version_type: VersionType::Pull,
        })));
    };
    Ok(Json(server.handle_pull(&auth, request).await?))
}

async fn push(
    State(server): State<Arc<SyncServer>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<PushResponse>, SyncError> {
    let auth = auth_from_headers(&headers)?;
    let Some(request) = decode::<PushRequest>(body, "pushVersion", PUSH_VERSION)? else {
        return Ok(Json(PushResponse::Error(ErrorResponse::VersionNotSupported {
            version_type: VersionType::Push,
        })));
    };
    let outcome = server.handle_push(&auth, request).await?;
    Ok(Json(outcome.response))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl SyncError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            SyncError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            SyncError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "Unauthenticated"),
            SyncError::Unauthorized(_) => (StatusCode::FORBIDDEN, "Unauthorized"),
            SyncError::AccessDenied { .. } => (StatusCode::FORBIDDEN, "AccessDenied"),
            SyncError::VersionNotSupported(_) => (StatusCode::BAD_REQUEST, "VersionNotSupported"),
            SyncError::ClientStateNotFound => (StatusCode::BAD_REQUEST, "ClientStateNotFound"),
            SyncError::MutationConflict { .. } => (StatusCode::CONFLICT, "MutationConflict"),
            SyncError::Mutation { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "MutationFailed"),
            SyncError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "StoreError"),
            SyncError::TooManyRetries { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "TooManyRetries"),
            SyncError::Config(_) | SyncError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            }
        }
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            debug!(error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
