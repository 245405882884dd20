//! One-shot function calls over HTTP.

use crate::{
    auth::AuthProvider,
    error::{LinkError, Result},
    models::{FunctionKind, FunctionRequest, FunctionResponse, QueryRef},
};
use log::{debug, warn};
use serde_json::Value as JsonValue;
use std::time::Instant;

/// Handles query and mutation calls via `POST /api/{query,mutation}`.
#[derive(Clone)]
pub struct QueryExecutor {
    base_url: String,
    http_client: reqwest::Client,
    auth: AuthProvider,
    max_retries: u32,
}

impl QueryExecutor {
    pub(crate) fn new(
        base_url: String,
        http_client: reqwest::Client,
        auth: AuthProvider,
        max_retries: u32,
    ) -> Self {
        Self {
            base_url,
            http_client,
            auth,
            max_retries,
        }
    }

    /// Run a backend function once and return its value.
    ///
    /// Connect errors and timeouts are retried with a linear backoff;
    /// anything the backend answered is returned as-is.
    pub async fn execute(&self, kind: FunctionKind, query: &QueryRef) -> Result<JsonValue> {
        query.validate()?;
        let request = FunctionRequest::new(query.path(), query.args_value());
        let url = format!("{}/{}", self.base_url, kind.endpoint());

        let mut retries = 0;
        debug!("[LINK_QUERY] Starting {:?} call: {}", kind, query);
        let overall_start = Instant::now();

        loop {
            let req_builder = self.auth.apply_to_request(self.http_client.post(&url).json(&request));

            let attempt_start = Instant::now();
            debug!(
                "[LINK_HTTP] Sending POST to {} (attempt {}/{})",
                url,
                retries + 1,
                self.max_retries + 1
            );

            match req_builder.send().await {
                Ok(response) => {
                    let http_duration_ms = attempt_start.elapsed().as_millis();
                    let status = response.status();
                    debug!(
                        "[LINK_HTTP] Response received: status={} duration_ms={}",
                        status, http_duration_ms
                    );

                    let body = response.text().await?;
                    let result = parse_function_response(status.as_u16(), &body);
                    match &result {
                        Ok(_) => debug!(
                            "[LINK_QUERY] Success: {} total_ms={}",
                            query,
                            overall_start.elapsed().as_millis()
                        ),
                        Err(e) => warn!(
                            "[LINK_HTTP] Call failed: {} duration_ms={}",
                            e, http_duration_ms
                        ),
                    }
                    return result;
                },
                Err(e) if retries < self.max_retries && Self::is_retriable(&e) => {
                    warn!(
                        "[LINK_HTTP] Retriable error (attempt {}/{}): {} duration_ms={}",
                        retries + 1,
                        self.max_retries + 1,
                        e,
                        attempt_start.elapsed().as_millis()
                    );
                    retries += 1;
                    tokio::time::sleep(tokio::time::Duration::from_millis(100 * retries as u64))
                        .await;
                    continue;
                },
                Err(e) => {
                    warn!(
                        "[LINK_HTTP] Fatal error: {} total_ms={}",
                        e,
                        overall_start.elapsed().as_millis()
                    );
                    return Err(e.into());
                },
            }
        }
    }

    fn is_retriable(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect()
    }
}

/// Interpret a function-call response body.
///
/// A well-formed `error` body wins over the HTTP status, so backend error
/// messages surface as [`LinkError::QueryError`] even on 4xx/5xx.
pub(crate) fn parse_function_response(status: u16, body: &str) -> Result<JsonValue> {
    match serde_json::from_str::<FunctionResponse>(body) {
        Ok(FunctionResponse::Success { value, log_lines }) => {
            for line in log_lines {
                debug!("[LINK_QUERY] backend log: {}", line);
            }
            Ok(value)
        },
        Ok(FunctionResponse::Error {
            error_message,
            log_lines,
            ..
        }) => {
            for line in log_lines {
                debug!("[LINK_QUERY] backend log: {}", line);
            }
            Err(LinkError::QueryError(error_message))
        },
        Err(_) if !(200..300).contains(&status) => {
            let message = if body.trim().is_empty() {
                "Unknown error".to_string()
            } else {
                body.trim().to_string()
            };
            Err(LinkError::ServerError {
                status_code: status,
                message,
            })
        },
        Err(e) => Err(LinkError::SerializationError(format!(
            "Unexpected function response: {}",
            e
        ))),
    }
}
