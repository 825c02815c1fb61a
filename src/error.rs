// Gateway error taxonomy and HTTP mapping.
//
// Upstream error text is never forwarded to callers: anything that is not a
// caller error collapses to the same generic service-failure body, so a broken
// scraper cannot leak its internals through our responses.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Fixed caller-facing body for unrecovered failures.
pub const GENERIC_FAILURE: &str = "Something went wrong. Contact developer for help.";

/// Errors produced by the fetch-and-normalize pipeline.
///
/// Clone is required because a single in-flight cache computation can have
/// many waiters, each of which receives its own copy of the failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Network or HTTP failure talking to a provider or the scrape API.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The call succeeded but returned no usable sources/episodes.
    #[error("no usable results from upstream")]
    EmptyResult,

    /// Malformed episode identifier, surfaced before any network call.
    #[error("invalid episode identifier: {0}")]
    InvalidIdentifier(String),

    /// Requested category is incompatible with the chosen provider.
    #[error("provider mismatch: {0}")]
    ProviderMismatch(String),

    /// Cache store fault (not a producer failure; those are never cached).
    #[error("cache store error: {0}")]
    Cache(String),
}

impl GatewayError {
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        match self {
            // Caller errors carry their real message.
            GatewayError::InvalidIdentifier(msg) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": format!("invalid episode identifier: {msg}") })),
            )
                .into_response(),
            GatewayError::ProviderMismatch(msg) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": msg })),
            )
                .into_response(),
            // Everything else is hidden behind the generic body.
            GatewayError::UpstreamUnavailable(detail) => {
                tracing::warn!("upstream failure surfaced to caller: {}", detail);
                generic_failure()
            }
            GatewayError::EmptyResult => generic_failure(),
            GatewayError::Cache(detail) => {
                tracing::warn!("cache failure surfaced to caller: {}", detail);
                generic_failure()
            }
        }
    }
}

fn generic_failure() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": GENERIC_FAILURE })),
    )
        .into_response()
}
