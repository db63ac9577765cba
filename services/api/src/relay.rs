//! Session Negotiation Relay
//!
//! Forwards a browser's WebRTC SDP offer, together with the compiled session
//! configuration, to the realtime calls endpoint and hands back the SDP answer.
//! The offer and the answer are never parsed.

use bytes::Bytes;
use onboard_core::prompt::RealtimeSessionConfig;
use reqwest::{Client, StatusCode, header::AUTHORIZATION, multipart};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,
    #[error("Upstream returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error("Upstream request timed out")]
    Timeout,
    #[error("Failed to reach upstream: {0}")]
    Transport(reqwest::Error),
    #[error("Failed to encode session configuration: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Upstream { status, .. } => status.is_server_error(),
            Self::MissingApiKey | Self::Encode(_) => false,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}

/// HTTP client for the realtime calls endpoint.
#[derive(Clone, Debug)]
pub struct RealtimeRelay {
    client: Client,
    calls_url: String,
    api_key: Option<String>,
    retry_backoff: Duration,
}

impl RealtimeRelay {
    /// Creates a relay whose every attempt is bounded by `timeout`.
    pub fn new(
        calls_url: String,
        api_key: Option<String>,
        timeout: Duration,
        retry_backoff: Duration,
    ) -> Result<Self, RelayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            calls_url,
            api_key,
            retry_backoff,
        })
    }

    /// Submits `sdp_offer` with `session` and returns the provider's answer.
    ///
    /// Timeouts, transport failures and 5xx responses are retried once.
    pub async fn create_call(
        &self,
        sdp_offer: Bytes,
        session: &RealtimeSessionConfig,
    ) -> Result<Bytes, RelayError> {
        let api_key = self.api_key.as_deref().ok_or(RelayError::MissingApiKey)?;
        let session_json = serde_json::to_string(session)?;

        match self.post_offer(api_key, &sdp_offer, &session_json).await {
            Err(e) if e.is_retryable() => {
                warn!(error = %e, backoff_ms = self.retry_backoff.as_millis() as u64, "Realtime call failed, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                self.post_offer(api_key, &sdp_offer, &session_json).await
            }
            result => result,
        }
    }

    async fn post_offer(
        &self,
        api_key: &str,
        sdp_offer: &Bytes,
        session_json: &str,
    ) -> Result<Bytes, RelayError> {
        let sdp_part = multipart::Part::bytes(sdp_offer.to_vec()).mime_str("text/plain")?;
        let session_part =
            multipart::Part::text(session_json.to_string()).mime_str("application/json")?;
        let form = multipart::Form::new()
            .part("sdp", sdp_part)
            .part("session", session_part);

        let response = self
            .client
            .post(&self.calls_url)
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).into_owned();
            error!(%status, %body, "Realtime API rejected the session offer");
            return Err(RelayError::Upstream { status, body });
        }

        info!(%status, answer_bytes = body.len(), "Realtime call created");
        Ok(body)
    }
}
