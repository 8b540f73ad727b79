//! One-shot latch observable by any number of tasks.

use std::sync::Arc;

use tokio::sync::watch;

/// A latch that starts unset and, once fired, stays fired.
///
/// Clones share the latch. Waiting on an already fired signal returns
/// immediately.
#[derive(Debug, Clone)]
pub struct Signal {
    sender: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Set the latch. Idempotent.
    pub fn fire(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once the latch is set.
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = receiver.wait_for(|fired| *fired).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
