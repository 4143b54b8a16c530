use thiserror::Error;

/// Max characters of a provider error body carried into user-facing messages.
const MAX_BODY_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum GenError {
    /// Transport-level failure: no HTTP response was received.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status with a response body.
    #[error("provider returned HTTP {status}: {body}")]
    Provider {
        status: u16,
        body: String,
        code: Option<String>,
        message: Option<String>,
    },

    #[error("credential acquisition failed: {0}")]
    Auth(String),

    #[error("timed out after {attempts} poll attempts")]
    Timeout { attempts: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Structured `{"error": {"code": ..., "message": ...}}` body returned by the provider.
#[derive(Debug, serde::Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl GenError {
    /// Build a `Provider` error from a status and raw body, lifting the
    /// structured code/message out of the body when it has one.
    pub fn provider(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(env) => {
                let code = env.error.code.map(|c| match c {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                });
                (code, env.error.message)
            }
            Err(_) => (None, None),
        };
        Self::Provider {
            status,
            body,
            code,
            message,
        }
    }

    /// Cancellation is a normal terminal path, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status for provider errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Provider { .. } => self.status().is_some_and(|s| s == 429 || s >= 500),
            _ => false,
        }
    }

    /// Produce a single message suitable for the front end.
    /// Provider bodies are truncated; connection details are not leaked.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "request to provider failed".to_string(),
            Self::Provider {
                status,
                body,
                message,
                ..
            } => match message {
                Some(msg) => format!("HTTP {status}: {msg}"),
                None if body.trim().is_empty() => format!("HTTP {status}"),
                None => {
                    let preview: String = body.chars().take(MAX_BODY_PREVIEW_CHARS).collect();
                    let suffix = if preview.len() < body.len() { "..." } else { "" };
                    format!("HTTP {status} - {preview}{suffix}")
                }
            },
            Self::Auth(msg) => format!("authentication failed: {msg}"),
            Self::Timeout { .. } => "the operation timed out".to_string(),
            Self::Cancelled => "the operation was cancelled".to_string(),
            Self::SchemaParse(_) => "failed to parse provider response".to_string(),
            Self::Storage(msg) => format!("storage error: {msg}"),
            Self::Config(msg) => msg.clone(),
            Self::Other(msg) => msg.clone(),
        }
    }
}
