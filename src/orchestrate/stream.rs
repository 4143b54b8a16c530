use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{Publisher, cancellable};
use crate::chat::{ChatMessage, ChatSession, coerce_system_roles};
use crate::config::ModelEntry;
use crate::error::GenError;
use crate::provider::{ChatApi, ChatRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    State(StreamState),
    /// One streamed piece of the reply, in arrival order.
    Fragment { text: String, accumulated_len: usize },
    Finished { state: StreamState },
}

/// Reply text for a single streaming run.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    buf: String,
}

impl StreamAccumulator {
    pub fn push(&mut self, fragment: &str) {
        self.buf.push_str(fragment);
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Freeze the text into an assistant turn.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage::assistant(self.buf)
    }
}

#[derive(Debug)]
pub struct ChatOutcome {
    pub state: StreamState,
    /// Committed assistant text; `None` unless `Completed`.
    pub reply: Option<String>,
    /// User-facing error or warning.
    pub message: Option<String>,
    pub error: Option<GenError>,
    /// Fragments consumed.
    pub fragments: usize,
}

impl ChatOutcome {
    pub fn is_success(&self) -> bool {
        self.state == StreamState::Completed
    }
}

/// Sends one user turn and collects the assistant reply.
pub struct StreamingOrchestrator<A: ?Sized> {
    api: Arc<A>,
    state: StreamState,
}

impl<A> StreamingOrchestrator<A>
where
    A: ChatApi + ?Sized,
{
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            state: StreamState::Idle,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    fn transition(&mut self, next: StreamState, updates: &Publisher<ChatUpdate>) {
        self.state = next;
        updates.publish(ChatUpdate::State(next));
    }

    /// Append `user_text` to the session and obtain a reply from `model`.
    ///
    /// On success the assistant turn is committed and the history persisted.
    /// On cancellation or failure no assistant turn is added; the user turn
    /// stays in the history.
    pub async fn send(
        &mut self,
        session: &mut ChatSession,
        user_text: &str,
        model: &ModelEntry,
        token: &CancellationToken,
        updates: &Publisher<ChatUpdate>,
    ) -> ChatOutcome {
        let start = Instant::now();
        self.transition(StreamState::Sending, updates);

        session.history_mut().push(ChatMessage::user(user_text));
        if !model.supports_system_role {
            let rewritten = coerce_system_roles(session.history_mut());
            if rewritten > 0 {
                tracing::debug!(
                    model = model.deployment,
                    rewritten,
                    "system turns sent as user turns"
                );
            }
        }
        let request = ChatRequest {
            model: model.deployment.clone(),
            messages: session.history().to_vec(),
        };

        let mut fragments = 0;
        let result = if model.supports_streaming {
            self.consume_stream(&request, token, updates, &mut fragments)
                .await
        } else {
            cancellable(token, self.api.complete_chat(&request)).await
        };

        match result {
            Ok(reply) => {
                session.history_mut().push(ChatMessage::assistant(reply.clone()));
                let message = match session.persist().await {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::warn!("failed to persist chat history: {e}");
                        Some(format!("Failed to save chat history: {}", e.user_message()))
                    }
                };
                tracing::info!(
                    model = model.deployment,
                    fragments,
                    reply_len = reply.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "chat reply completed"
                );
                self.finish(StreamState::Completed, updates);
                ChatOutcome {
                    state: StreamState::Completed,
                    reply: Some(reply),
                    message,
                    error: None,
                    fragments,
                }
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(model = model.deployment, fragments, "chat reply cancelled");
                self.finish(StreamState::Cancelled, updates);
                ChatOutcome {
                    state: StreamState::Cancelled,
                    reply: None,
                    message: None,
                    error: Some(e),
                    fragments,
                }
            }
            Err(e) => {
                tracing::warn!(model = model.deployment, fragments, "chat request failed: {e}");
                self.finish(StreamState::Failed, updates);
                ChatOutcome {
                    state: StreamState::Failed,
                    reply: None,
                    message: Some(e.user_message()),
                    error: Some(e),
                    fragments,
                }
            }
        }
    }

    async fn consume_stream(
        &mut self,
        request: &ChatRequest,
        token: &CancellationToken,
        updates: &Publisher<ChatUpdate>,
        fragments: &mut usize,
    ) -> Result<String, GenError> {
        let mut stream = cancellable(token, self.api.stream_chat(request)).await?;
        self.transition(StreamState::Streaming, updates);

        let mut acc = StreamAccumulator::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(GenError::Cancelled),
                next = stream.next() => next,
            };
            let Some(fragment) = next else { break };
            let fragment = fragment?;
            if token.is_cancelled() {
                return Err(GenError::Cancelled);
            }
            acc.push(&fragment);
            *fragments += 1;
            updates.publish(ChatUpdate::Fragment {
                text: fragment,
                accumulated_len: acc.len(),
            });
            tokio::task::yield_now().await;
        }
        Ok(acc.into_message().content)
    }

    fn finish(&mut self, state: StreamState, updates: &Publisher<ChatUpdate>) {
        debug_assert!(state.is_terminal(), "finish called with {state:?}");
        self.transition(state, updates);
        updates.publish(ChatUpdate::Finished { state });
    }
}
