//! The outbound event channel.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::stream_event::AgentEvent;

/// Ordered, unbounded sender of [`AgentEvent`]s for one run.
///
/// Forwarding never waits on the consumer. Once the run is cancelled the
/// emitter drops every further event; if the consumer goes away the run is
/// cancelled.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<AgentEvent>,
    cancel: CancellationToken,
}

impl EventEmitter {
    /// Create an emitter bound to `cancel`, plus the receiving end.
    pub fn channel(cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, cancel }, rx)
    }

    /// Send an event. Returns `false` if it was dropped.
    pub fn emit(&self, event: AgentEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped, cancelling run");
            self.cancel.cancel();
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (emitter, mut rx) = EventEmitter::channel(CancellationToken::new());
        assert!(emitter.emit(AgentEvent::ContentChunk { content: "a".into() }));
        assert!(emitter.emit(AgentEvent::ContentChunk { content: "b".into() }));

        assert_eq!(rx.try_recv().unwrap(), AgentEvent::ContentChunk { content: "a".into() });
        assert_eq!(rx.try_recv().unwrap(), AgentEvent::ContentChunk { content: "b".into() });
    }

    #[test]
    fn nothing_is_sent_after_cancellation() {
        let cancel = CancellationToken::new();
        let (emitter, mut rx) = EventEmitter::channel(cancel.clone());
        cancel.cancel();

        assert!(!emitter.emit(AgentEvent::ContentChunk { content: "late".into() }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_cancels_the_run() {
        let cancel = CancellationToken::new();
        let (emitter, rx) = EventEmitter::channel(cancel.clone());
        drop(rx);

        assert!(!emitter.emit(AgentEvent::ContentChunk { content: "x".into() }));
        assert!(cancel.is_cancelled());
    }
}
