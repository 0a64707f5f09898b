//! Shared HTTP client construction and error mapping.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::AgentryError;

/// Build a client with the given per-request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, AgentryError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .build()
        .map_err(AgentryError::Network)
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(key) = api_key {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// Map a non-success HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> AgentryError {
    match status {
        401 | 403 => AgentryError::Configuration(format!("authentication failed: {body}")),
        _ => AgentryError::api(status, extract_message(body).unwrap_or_else(|| body.to_string())),
    }
}

fn extract_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
}
