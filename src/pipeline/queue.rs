use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Bounded hand-off from the webhook handlers to the processor
#[derive(Clone)]
pub struct SignalQueue {
    tx: mpsc::Sender<Uuid>,
}

impl SignalQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting
    ///
    /// A full or closed queue returns false; the signal stays `parsed` and
    /// the processor's sweep picks it up later.
    pub fn try_enqueue(&self, signal_id: Uuid) -> bool {
        match self.tx.try_send(signal_id) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Signal queue full, {} left for the next sweep", signal_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Signal queue closed, {} left for the next sweep", signal_id);
                false
            }
        }
    }

    /// Signals waiting to be processed
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
