use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{StreamExt, future};
use serde::{Deserialize, Serialize};

use super::{ChatApi, ChatRequest, FragmentStream, ProviderClient, read_capped};
use crate::chat::ChatMessage;
use crate::error::GenError;

/// SSE sentinel that ends an OpenAI-compatible stream.
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> CompletionBody<'a> {
    fn new(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: request.messages.iter().map(wire_message).collect(),
            stream,
        }
    }
}

fn wire_message(msg: &ChatMessage) -> WireMessage<'_> {
    WireMessage {
        role: msg.role.as_str(),
        content: &msg.content,
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the text carried by one SSE data payload. Chunks without
/// content (role announcements, usage, filter results) yield `None`.
pub fn parse_stream_chunk(data: &str) -> Result<Option<String>, GenError> {
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| GenError::SchemaParse(format!("stream chunk: {e}")))?;
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .collect();
    Ok((!text.is_empty()).then_some(text))
}

fn map_stream_error(err: EventStreamError<reqwest::Error>) -> GenError {
    match err {
        EventStreamError::Transport(e) => GenError::Network(e),
        other => GenError::SchemaParse(format!("event stream: {other}")),
    }
}

#[async_trait]
impl ChatApi for ProviderClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream, GenError> {
        let url = self.url("/chat/completions", self.api_version.as_deref());
        let body = CompletionBody::new(request, true);
        let response = self.send(self.http.post(&url).json(&body)).await?;
        tracing::debug!(model = request.model, "chat stream opened");

        let fragments = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(ev) if ev.data.trim() == DONE_SENTINEL))
            })
            .filter_map(|event| {
                future::ready(match event {
                    Ok(ev) if ev.data.trim().is_empty() => None,
                    Ok(ev) => parse_stream_chunk(&ev.data).transpose(),
                    Err(e) => Some(Err(map_stream_error(e))),
                })
            });
        Ok(fragments.boxed())
    }

    async fn complete_chat(&self, request: &ChatRequest) -> Result<String, GenError> {
        let url = self.url("/chat/completions", self.api_version.as_deref());
        let body = CompletionBody::new(request, false);
        let response = self.send(self.http.post(&url).json(&body)).await?;
        let bytes = read_capped(response).await?;

        let completion: ChatCompletion = serde_json::from_slice(&bytes)
            .map_err(|e| GenError::SchemaParse(format!("failed to parse response: {e}")))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenError::SchemaParse("empty choices or null content".to_string()))
    }
}
