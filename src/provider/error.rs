use reqwest::StatusCode;

/// Failures surfaced by a provider call.
///
/// Malformed records inside an otherwise healthy stream never show up here;
/// the decoder logs and skips them.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no API key configured for {provider}")]
    MissingCredential {
        provider: &'static str,
        env_var: &'static str,
    },

    /// A credential is configured but cannot be sent as a header value.
    #[error("API key for {provider} contains characters not allowed in an HTTP header")]
    InvalidCredential {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("HTTP {status}: {message}")]
    UpstreamHttp { status: StatusCode, message: String },

    #[error("stream read failed: {0}")]
    StreamRead(String),
}

impl StreamError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::UpstreamHttp { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }

    /// Build an upstream error from a non-success response, preferring the
    /// provider's `{"error":{"message":..}}` envelope over the raw body.
    pub async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Self::UpstreamHttp {
            status,
            message: upstream_message(status, &body),
        }
    }
}

fn upstream_message(status: StatusCode, body: &str) -> String {
    let from_envelope = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error")?.get("message")?.as_str().map(String::from));

    if let Some(msg) = from_envelope {
        return msg;
    }

    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }

    status
        .canonical_reason()
        .map(String::from)
        .unwrap_or_else(|| format!("API error: {}", status.as_u16()))
}

impl From<reqwest::Error> for StreamError {
    // Request URLs may carry credentials; never echo them.
    fn from(e: reqwest::Error) -> Self {
        Self::StreamRead(e.without_url().to_string())
    }
}
