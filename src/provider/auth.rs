//! Credential attachment for provider calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::RequestBuilder;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::GenError;

/// How long a token command may run before it is killed.
const TOKEN_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying a static key.
pub const API_KEY_HEADER: &str = "api-key";

/// Produces bearer tokens on demand.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, GenError>;
}

/// Fixed token, mostly for tests and short-lived sessions.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, GenError> {
        if self.0.is_empty() {
            return Err(GenError::Auth("empty bearer token".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// Runs an external command (e.g. a cloud CLI) that prints a token on stdout.
/// The token is cached for `ttl`.
pub struct CommandTokenSource {
    program: String,
    args: Vec<String>,
    ttl: Duration,
    cached: Mutex<Option<(String, Instant)>>,
}

impl CommandTokenSource {
    /// Split `command` on whitespace. No shell is involved.
    pub fn parse(command: &str, ttl: Duration) -> Result<Self, GenError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| GenError::Config("token_command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            ttl,
            cached: Mutex::new(None),
        })
    }

    async fn run(&self) -> Result<String, GenError> {
        let output = tokio::time::timeout(
            TOKEN_COMMAND_TIMEOUT,
            Command::new(&self.program)
                .args(&self.args)
                .stdin(std::process::Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| GenError::Auth(format!("{} timed out", self.program)))?
        .map_err(|e| GenError::Auth(format!("failed to spawn {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .trim()
                .chars()
                .rev()
                .take(200)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(GenError::Auth(format!(
                "{} exited with {}: {tail}",
                self.program, output.status
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(GenError::Auth(format!("{} printed no token", self.program)));
        }
        Ok(token)
    }
}

#[async_trait]
impl TokenSource for CommandTokenSource {
    async fn token(&self) -> Result<String, GenError> {
        let mut cached = self.cached.lock().await;
        if let Some((token, obtained)) = cached.as_ref() {
            if obtained.elapsed() < self.ttl {
                return Ok(token.clone());
            }
        }
        let token = self.run().await.inspect_err(|e| {
            tracing::error!(program = self.program, "failed to obtain bearer token: {e}");
        })?;
        *cached = Some((token.clone(), Instant::now()));
        Ok(token)
    }
}

#[derive(Clone)]
pub enum Credentials {
    ApiKey(String),
    Bearer(Arc<dyn TokenSource>),
}

impl Credentials {
    /// Attach the auth header. Bearer acquisition failures surface as `GenError::Auth`.
    pub async fn apply(&self, req: RequestBuilder) -> Result<RequestBuilder, GenError> {
        match self {
            Self::ApiKey(key) => Ok(req.header(API_KEY_HEADER, key)),
            Self::Bearer(source) => {
                let token = source.token().await?;
                Ok(req.bearer_auth(token))
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey([REDACTED])"),
            Self::Bearer(_) => f.write_str("Bearer(..)"),
        }
    }
}
