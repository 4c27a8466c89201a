//! The search API client: request construction, page bounds, and the
//! retry/backoff policy.
//!
//! Each downloader owns its own [`ApiClient`] instance (its own connection
//! pool); the client itself is stateless beyond its configuration and safe to
//! share read-only if a caller prefers to.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ApiClientError;
use crate::parameters::ParameterSet;

const MAX_ATTEMPTS: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_PAGE_NUMBER: u32 = 100;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Serialize)]
struct SearchPayload<'a> {
    reveal_all_data: bool,
    page_number: u32,
    page_size: u32,
    parameters: &'a std::collections::BTreeMap<String, crate::parameters::FilterValue>,
}

/// Client for the third-party person-profile search API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    /// Build a client against `base_url`, authenticating with `api_key` via
    /// the `x-api-key` header on every request.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Execute one search request.
    ///
    /// Preconditions: `1 <= page_number <= 100`, `1 <= page_size <= 100`;
    /// violations fail fast as [`ApiClientError::InvalidArgument`] without
    /// making a request. 5xx responses and timeouts are retried up to
    /// [`MAX_ATTEMPTS`] times with exponential backoff (1s, 2s, 4s); 4xx
    /// responses, other network errors, and decode failures surface
    /// immediately.
    pub async fn search(
        &self,
        page_number: u32,
        page_size: u32,
        parameters: &ParameterSet,
    ) -> Result<Value, ApiClientError> {
        if !(1..=MAX_PAGE_NUMBER).contains(&page_number) {
            return Err(ApiClientError::InvalidArgument {
                message: format!("page_number must be in 1..={MAX_PAGE_NUMBER}, got {page_number}"),
            });
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ApiClientError::InvalidArgument {
                message: format!("page_size must be in 1..={MAX_PAGE_SIZE}, got {page_size}"),
            });
        }

        let payload = SearchPayload {
            reveal_all_data: false,
            page_number,
            page_size,
            parameters: parameters.as_map(),
        };

        let mut last_message = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let outcome = self
                .http
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .timeout(REQUEST_TIMEOUT)
                .json(&payload)
                .send()
                .await;

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| ApiClientError::Permanent {
                                status: Some(status.as_u16()),
                                message: e.to_string(),
                            })?;
                        return serde_json::from_slice(&bytes).map_err(ApiClientError::Decode);
                    }
                    if status.as_u16() >= 500 && status.as_u16() <= 599 {
                        last_message = format!("HTTP {status}");
                        if attempt < MAX_ATTEMPTS {
                            let backoff = Duration::from_secs(1 << (attempt - 1));
                            warn!(attempt, %status, backoff_secs = backoff.as_secs(), "search: retrying after server error");
                            tokio::time::sleep(backoff).await;
                            continue;
                        }
                    } else {
                        return Err(ApiClientError::Permanent {
                            status: Some(status.as_u16()),
                            message: format!("HTTP {status}"),
                        });
                    }
                }
                Err(err) if err.is_timeout() => {
                    last_message = "request timed out".to_string();
                    if attempt < MAX_ATTEMPTS {
                        let backoff = Duration::from_secs(1 << (attempt - 1));
                        warn!(attempt, backoff_secs = backoff.as_secs(), "search: retrying after timeout");
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                }
                Err(err) => {
                    return Err(ApiClientError::Permanent {
                        status: None,
                        message: err.to_string(),
                    });
                }
            }
        }

        Err(ApiClientError::Transient {
            attempts: MAX_ATTEMPTS,
            message: last_message,
        })
    }
}

/// Extracts `response.counts.profiles_total_results`; missing ⇒ 0.
#[must_use]
pub fn total_profiles(response: &Value) -> u64 {
    response
        .get("counts")
        .and_then(|c| c.get("profiles_total_results"))
        .and_then(Value::as_u64)
        .unwrap_or_else(|| {
            debug!("response missing counts.profiles_total_results; defaulting to 0");
            0
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn total_profiles_reads_nested_count() {
        let body = json!({"counts": {"profiles_total_results": 42}});
        assert_eq!(total_profiles(&body), 42);
    }

    #[test]
    fn total_profiles_defaults_to_zero_when_missing() {
        let body = json!({"counts": {}});
        assert_eq!(total_profiles(&body), 0);
        assert_eq!(total_profiles(&json!({})), 0);
    }
}
