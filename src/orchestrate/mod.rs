//! Long-lived, cancellable operations driven against the provider.
//!
//! Each orchestrator owns one operation at a time, checks its cancellation
//! token at every suspension point (network call, poll wait, stream
//! fragment) and publishes ordered updates for the front end to render.

pub mod image;
pub mod poll;
pub mod retrieval;
pub mod stream;

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::GenError;

/// Ordered, uncoalesced sink for progress updates. Publishing never blocks;
/// a dropped receiver is ignored.
#[derive(Debug)]
pub struct Publisher<T> {
    tx: Option<mpsc::UnboundedSender<T>>,
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Publisher<T> {
    /// Discard all updates.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn publish(&self, update: T) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(update);
        }
    }
}

/// Race `fut` against `token`. A result that lands after cancellation is
/// discarded rather than applied.
pub(crate) async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T, GenError>
where
    F: Future<Output = Result<T, GenError>>,
{
    if token.is_cancelled() {
        return Err(GenError::Cancelled);
    }
    let result = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(GenError::Cancelled),
        result = fut => result,
    };
    if token.is_cancelled() {
        return Err(GenError::Cancelled);
    }
    result
}
