//! HTTP client for the execution sandbox collaborator.
//!
//! Submits job payloads to the sandbox runtime's REST API and decodes the
//! terminal result. The dispatcher in `cadence-core` owns the deadline; this
//! client only performs the request/response exchange.

use cadence_core::engine::{SandboxClient, SandboxError};
use cadence_types::job::{JobPayload, SandboxResult};

/// Reqwest-based implementation of the `SandboxClient` port.
pub struct HttpSandboxClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSandboxClient {
    /// Create a client for the sandbox at `base_url`
    /// (e.g. `http://127.0.0.1:9090`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn jobs_url(&self) -> String {
        format!("{}/v1/jobs", self.base_url)
    }
}

impl SandboxClient for HttpSandboxClient {
    async fn submit(&self, payload: &JobPayload) -> Result<SandboxResult, SandboxError> {
        let response = self
            .client
            .post(self.jobs_url())
            .json(payload)
            .send()
            .await
            .map_err(|e| SandboxError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::Rejected {
                code: rejection_code(status.as_u16()),
                message: format!("sandbox returned {status}: {body}"),
            });
        }

        response
            .json::<SandboxResult>()
            .await
            .map_err(|e| SandboxError::Rejected {
                code: "server-error".to_string(),
                message: format!("invalid sandbox response: {e}"),
            })
    }
}

/// Catalog code for a sandbox API rejection status.
fn rejection_code(status: u16) -> String {
    match status {
        400 | 422 => "invalid-config",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not-found",
        429 => "rate-limited",
        _ => "server-error",
    }
    .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
