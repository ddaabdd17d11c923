//! HTTP gateway to the remote visit authority.
//!
//! `POST {endpoint}/visits` with the submission as JSON and the visit id in
//! an `Idempotency-Key` header.
//!
//! | Response | Result |
//! |----------|--------|
//! | 2xx | accepted, body passed through as summary |
//! | 409 Conflict | `DuplicateKey` (key already applied) |
//! | 408, 429 | `Transport` (retryable) |
//! | other 4xx | `Rejected` (terminal) |
//! | 5xx, connect errors | `Transport` (retryable) |
//! | client timeout | `Timeout` (retryable) |

use std::time::Duration;

use async_trait::async_trait;
use qv_visit_verification::{RemoteError, RemoteVisitGateway, SubmissionReceipt, VisitSubmission};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::RemoteConfig;

/// Header carrying the visit id.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// reqwest-backed [`RemoteVisitGateway`].
pub struct HttpVisitGateway {
    client: Client,
    url: String,
}

impl HttpVisitGateway {
    /// Create a gateway for `config.endpoint`.
    ///
    /// `request_timeout` bounds one whole submission, connect included.
    pub fn new(config: &RemoteConfig, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/visits", config.endpoint.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteVisitGateway for HttpVisitGateway {
    async fn submit_visit(
        &self,
        submission: VisitSubmission,
    ) -> Result<SubmissionReceipt, RemoteError> {
        let response = self
            .client
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, submission.idempotency_key.to_string())
            .json(&submission)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        // An unreadable body does not undo a decided status
        let body = match response.text().await {
            Ok(body) if !body.trim().is_empty() => Some(body),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, status = %status, "Failed to read response body");
                None
            }
        };
        debug!(
            visit_id = %submission.idempotency_key,
            status = %status,
            "Remote answered submission"
        );

        classify_status(status, body)
    }
}

fn classify_transport(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(e.to_string())
    }
}

/// Map an HTTP answer onto the gateway contract.
pub fn classify_status(
    status: StatusCode,
    body: Option<String>,
) -> Result<SubmissionReceipt, RemoteError> {
    if status.is_success() {
        return Ok(SubmissionReceipt { summary: body });
    }
    match status {
        StatusCode::CONFLICT => Err(RemoteError::DuplicateKey { summary: body }),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(RemoteError::Transport(format!("HTTP {}", status)))
        }
        s if s.is_client_error() => Err(RemoteError::Rejected {
            reason: body.unwrap_or_else(|| format!("HTTP {}", status)),
        }),
        _ => Err(RemoteError::Transport(format!("HTTP {}", status))),
    }
}
