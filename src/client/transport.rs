//! Transport Module
//!
//! One network round trip, and the mapping from a raw response to either the
//! `data` payload or a typed [`ApiError`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;

// == Transport Response ==
/// Raw outcome of one call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    /// Parsed JSON body, or the raw text as a JSON string when it was not JSON
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

// == Transport Trait ==
/// Issues a single request. Timeouts and retries are applied by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<TransportResponse, ApiError>;
}

// == HTTP Transport ==
/// [`Transport`] over reqwest, POSTing the JSON body.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<TransportResponse, ApiError> {
        let mut request = self.client.post(endpoint).json(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        debug!(endpoint = %endpoint, status, bytes = text.len(), "received response");

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

// == Response Classification ==
/// Turns a raw response into the `data` payload or a typed error.
///
/// - 401 and 403 are [`ApiError::Auth`]
/// - 429 is [`ApiError::RateLimit`], honoring a `Retry-After` header in seconds
/// - other 4xx are [`ApiError::Client`], 5xx are [`ApiError::Server`]
/// - a 2xx carrying an `errors` list is [`ApiError::GraphQL`], or
///   [`ApiError::Auth`] when the messages talk about authentication
/// - a 2xx without `data` is [`ApiError::Validation`]
pub fn classify_response(response: TransportResponse) -> Result<Value, ApiError> {
    let status = response.status;
    match status {
        200..=299 => extract_data(response.body),
        401 | 403 => Err(ApiError::Auth(error_message(&response.body, status))),
        429 => Err(ApiError::RateLimit {
            message: error_message(&response.body, status),
            retry_after: response.header("retry-after").and_then(parse_retry_after),
        }),
        500..=599 => Err(ApiError::Server {
            status,
            message: error_message(&response.body, status),
        }),
        _ => Err(ApiError::Client {
            status,
            message: error_message(&response.body, status),
        }),
    }
}

fn extract_data(body: Value) -> Result<Value, ApiError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string())
                })
                .collect::<Vec<_>>()
                .join("; ");

            return Err(if looks_like_auth_failure(&message) {
                ApiError::Auth(message)
            } else {
                ApiError::GraphQL(message)
            });
        }
    }

    match body {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) if !data.is_null() => Ok(data),
            _ => Err(ApiError::Validation("response has no data".to_string())),
        },
        _ => Err(ApiError::Validation(
            "response body is not a JSON object".to_string(),
        )),
    }
}

/// Wording used by the API when a session is no longer accepted.
///
/// Matching on message text is brittle, but the API reports expired sessions
/// as ordinary application errors with a 200 status.
pub fn looks_like_auth_failure(message: &str) -> bool {
    const MARKERS: [&str; 6] = [
        "unauthorized",
        "unauthenticated",
        "not authenticated",
        "authentication",
        "token expired",
        "invalid token",
    ];
    let lowered = message.to_lowercase();
    MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Longest server-requested wait that is honored.
const MAX_RETRY_AFTER_SECS: f64 = 3600.0;

fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| Duration::from_secs_f64(secs.min(MAX_RETRY_AFTER_SECS)))
}

fn error_message(body: &Value, status: u16) -> String {
    match body {
        Value::String(text) if !text.is_empty() => text.clone(),
        Value::Object(map) => ["message", "error", "detail"]
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}")),
        _ => format!("HTTP {status}"),
    }
}
