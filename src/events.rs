//! Typed pipeline events.
//!
//! Workers never touch presentation state. They publish immutable event
//! values through an [`EventBus`]; any number of subscribers (the CLI
//! progress renderer, tests, nothing at all) receive their own copy over
//! an unbounded channel and apply them on their own thread.

use crate::verify::VerifyState;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Events emitted by the install pipeline and the verifier.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Download/install progress for one package. `percent` is only
    /// meaningful once the total size is known; unknown-length transfers
    /// report `total_bytes == 0` and callers must tolerate that.
    Progress {
        dlc_id: String,
        percent: f64,
        bytes_downloaded: u64,
        total_bytes: u64,
    },
    /// A job reached a terminal state. Emitted exactly once per job.
    Completed { dlc_id: String, success: bool },
    /// Human-readable failure detail, emitted before `Completed`.
    Error { dlc_id: String, message: String },
    /// Verification state change for one package.
    VerificationStatus { dlc_id: String, state: VerifyState },
}

/// Fan-out bus for pipeline events, shared behind an `Arc`.
///
/// Sends never block; a subscriber that dropped its receiver is pruned
/// on the next emit.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<PipelineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: PipelineEvent) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_each_receive_events() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(PipelineEvent::Completed {
            dlc_id: "EP01".into(),
            success: true,
        });

        let want = PipelineEvent::Completed {
            dlc_id: "EP01".into(),
            success: true,
        };
        assert_eq!(rx1.recv().await.unwrap(), want);
        assert_eq!(rx2.recv().await.unwrap(), want);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);

        // Must not error or panic with no live subscribers.
        bus.emit(PipelineEvent::Error {
            dlc_id: "GP05".into(),
            message: "boom".into(),
        });
        assert!(bus.subscribers.lock().unwrap().is_empty());
    }
}
