//! Single completion context for callback results.

use tokio::sync::mpsc;

type Completion = Box<dyn FnOnce() + Send>;

/// Runs completion callbacks one at a time, in submission order, on one
/// dedicated task.
#[derive(Debug, Clone)]
pub(crate) struct CompletionQueue {
    tx: mpsc::UnboundedSender<Completion>,
}

impl CompletionQueue {
    /// Start the draining task. Must be called inside a tokio runtime.
    pub(crate) fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        tokio::spawn(async move {
            while let Some(completion) = rx.recv().await {
                completion();
            }
            tracing::debug!("Completion queue closed");
        });
        Self { tx }
    }

    pub(crate) fn deliver(&self, completion: Completion) {
        if self.tx.send(completion).is_err() {
            tracing::warn!("Completion queue stopped; dropping a result");
        }
    }
}
