//! REST handlers, one module per service area.

pub mod directory;
pub mod floors;
pub mod sites;
pub mod twins;
pub mod widgets;
pub mod workflow;

use axum::http::HeaderMap;

/// Paginated endpoints receive the cursor in the `continuationToken`
/// request header and return the next one in the response body.
pub(crate) fn continuation_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("continuationToken")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
