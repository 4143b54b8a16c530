use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

/// Handle for one orchestrated operation issued by [`CancellationCoordinator::begin`].
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: u64,
    pub token: CancellationToken,
}

#[derive(Debug, Default)]
struct Slot {
    next_id: u64,
    active: Option<Operation>,
}

/// Single-slot owner of the active operation's cancellation token.
///
/// Starting an operation retires whatever was running before it: the old
/// token is cancelled and dropped before the fresh one is installed, so the
/// slot never holds two live tokens.
#[derive(Debug, Default)]
pub struct CancellationCoordinator {
    slot: Mutex<Slot>,
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retire the previous operation (if any) and install a fresh one.
    pub fn begin(&self) -> Operation {
        let mut slot = self.lock();
        slot.next_id += 1;
        let op = Operation {
            id: slot.next_id,
            token: CancellationToken::new(),
        };
        if let Some(previous) = slot.active.replace(op.clone()) {
            if !previous.token.is_cancelled() {
                tracing::debug!(
                    previous = previous.id,
                    next = op.id,
                    "superseding in-flight operation"
                );
            }
            previous.token.cancel();
        }
        op
    }

    /// Signal the current operation. Returns true if a live token was cancelled;
    /// a no-op when nothing is active.
    pub fn abort(&self) -> bool {
        let slot = self.lock();
        match slot.active.as_ref() {
            Some(op) if !op.token.is_cancelled() => {
                op.token.cancel();
                tracing::info!(operation = op.id, "operation aborted");
                true
            }
            _ => false,
        }
    }

    /// Release the slot once `op` has finished. Leaves a newer operation alone.
    pub fn finish(&self, op: &Operation) {
        let mut slot = self.lock();
        if slot.active.as_ref().is_some_and(|current| current.id == op.id) {
            slot.active = None;
        }
    }

    /// True while a live (uncancelled) operation holds the slot.
    pub fn is_active(&self) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|op| !op.token.is_cancelled())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        // The slot stays consistent even if a holder panicked.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}
