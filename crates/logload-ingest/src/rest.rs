//! Helpers shared by the JSON REST adapters

use anyhow::{bail, Result};
use reqwest::{RequestBuilder, Response};

/// Attach the bearer token, if one is configured.
pub(crate) fn authorize(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Turn a non-2xx response into an error carrying the response body, which
/// is where the Google APIs put the useful part of the message.
pub(crate) async fn check(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{} returned {}: {}", operation, status, body.trim());
}
