use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;

/// Cooperative cancellation signal shared between a caller and a running
/// operation. Cancellation is sticky: once fired it never resets, and
/// waiters that subscribe afterwards resolve immediately.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    fired: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.fired.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Resolves when the signal fires (immediately if it already has).
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
