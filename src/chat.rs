//! Conversation history, its persisted form, and front end preferences.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::GenError;
use crate::storage::KeyValueStore;

pub const CHAT_HISTORY_KEY: &str = "ChatHistoryV1";
pub const SELECTED_MODEL_KEY: &str = "SelectedModel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Unknown roles load as user turns.
    fn parse_lenient(raw: &str) -> Self {
        match raw {
            "system" => Self::System,
            "assistant" => Self::Assistant,
            _ => Self::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Persisted record shape: `{"role": "...", "message": "..."}`.
#[derive(Serialize, Deserialize)]
struct StoredMessage {
    role: String,
    message: String,
}

pub fn history_to_json(history: &[ChatMessage]) -> Result<String, GenError> {
    let records: Vec<StoredMessage> = history
        .iter()
        .map(|m| StoredMessage {
            role: m.role.as_str().to_string(),
            message: m.content.clone(),
        })
        .collect();
    serde_json::to_string(&records).map_err(|e| GenError::Storage(format!("encode history: {e}")))
}

pub fn history_from_json(json: &str) -> Result<Vec<ChatMessage>, GenError> {
    let records: Vec<StoredMessage> = serde_json::from_str(json)
        .map_err(|e| GenError::SchemaParse(format!("chat history: {e}")))?;
    Ok(records
        .into_iter()
        .map(|r| ChatMessage {
            role: Role::parse_lenient(&r.role),
            content: r.message,
        })
        .collect())
}

/// Rewrite system turns as user turns for models without a system role.
/// Idempotent. Returns how many turns were rewritten.
pub fn coerce_system_roles(history: &mut [ChatMessage]) -> usize {
    let mut rewritten = 0;
    for msg in history.iter_mut().filter(|m| m.role == Role::System) {
        msg.role = Role::User;
        rewritten += 1;
    }
    rewritten
}

pub fn default_system_prompt() -> String {
    format!(
        "You are a helpful assistant. Today is {}.",
        chrono::Utc::now().format("%Y-%m-%d")
    )
}

/// Conversation owned by one front end session.
///
/// Single writer: the streaming orchestrator borrows it mutably for the
/// duration of a send.
pub struct ChatSession {
    history: Vec<ChatMessage>,
    store: Arc<dyn KeyValueStore>,
}

impl ChatSession {
    /// Empty session with no persisted state read.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            history: Vec::new(),
            store,
        }
    }

    /// Restore the persisted conversation. Unreadable or empty history is
    /// replaced by a fresh conversation seeded with the default system prompt.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, GenError> {
        let mut session = Self::new(store);
        let restored = match session.store.get(CHAT_HISTORY_KEY).await {
            Ok(raw) => history_from_json(raw.as_deref().unwrap_or("[]")),
            Err(e) => Err(e),
        };
        match restored {
            Ok(history) if !history.is_empty() => {
                tracing::debug!(turns = history.len(), "restored chat history");
                session.history = history;
            }
            Ok(_) => session.reset(None).await?,
            Err(e) => {
                tracing::warn!("failed to load chat history, resetting chat: {e}");
                session.reset(None).await?;
            }
        }
        Ok(session)
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub(crate) fn history_mut(&mut self) -> &mut Vec<ChatMessage> {
        &mut self.history
    }

    /// Clear the conversation and seed it with one system turn.
    pub async fn reset(&mut self, system_prompt: Option<&str>) -> Result<(), GenError> {
        let prompt = system_prompt
            .map(str::to_string)
            .unwrap_or_else(default_system_prompt);
        self.history.clear();
        self.history.push(ChatMessage::system(prompt));
        self.persist().await
    }

    pub async fn persist(&self) -> Result<(), GenError> {
        let json = history_to_json(&self.history)?;
        self.store.set(CHAT_HISTORY_KEY, &json).await
    }

    /// Remove one turn. Not persisted until the next successful exchange or
    /// an explicit [`ChatSession::persist`].
    pub fn delete_message(&mut self, index: usize) -> Option<ChatMessage> {
        (index < self.history.len()).then(|| self.history.remove(index))
    }

    /// Markdown transcript for download.
    pub fn export_markdown(&self) -> String {
        let mut out = String::from("# Conversation\n");
        for msg in &self.history {
            out.push_str("## ");
            out.push_str(msg.role.as_str());
            out.push('\n');
            out.push_str(if msg.content.is_empty() {
                "[No Text]"
            } else {
                &msg.content
            });
            out.push('\n');
        }
        out
    }
}

/// Front end settings persisted across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preferences {
    pub selected_model: Option<String>,
}

impl Preferences {
    /// Missing or malformed entries fall back to defaults.
    pub async fn load(store: &dyn KeyValueStore) -> Self {
        let mut prefs = Self::default();
        if let Ok(Some(raw)) = store.get(SELECTED_MODEL_KEY).await {
            prefs.selected_model = serde_json::from_str::<String>(&raw).ok();
        }
        prefs
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<(), GenError> {
        if let Some(model) = &self.selected_model {
            let model =
                serde_json::to_string(model).map_err(|e| GenError::Storage(e.to_string()))?;
            store.set(SELECTED_MODEL_KEY, &model).await?;
        }
        Ok(())
    }
}
