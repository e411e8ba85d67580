//! HTTP Client Factory
//!
//! Builds reqwest clients with a bounded request timeout. Shared by the chat
//! provider here and the embedding providers in the application crate.

use std::time::Duration;

use crate::types::{LlmError, LlmResult};

/// Build a `reqwest::Client` whose requests fail after `timeout_secs`.
///
/// A zero timeout is rejected; unbounded requests would stall builds.
pub fn build_http_client(timeout_secs: u64) -> LlmResult<reqwest::Client> {
    if timeout_secs == 0 {
        return Err(LlmError::InvalidRequest {
            message: "HTTP timeout must be greater than zero".to_string(),
        });
    }

    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(timeout_secs.min(10)))
        .build()
        .map_err(|e| LlmError::Other {
            message: format!("failed to build HTTP client: {}", e),
        })
}
