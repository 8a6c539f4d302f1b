//! Observer channels: where broadcast events are handed off.
//!
//! `send` is called with the conversation's registry lock held, so it must
//! never block. Implementations hand the event to a queue and return.

use std::sync::Arc;

use superagent_types::Event;
use thiserror::Error;
use tokio::sync::mpsc;

/// The observer is gone or cannot keep up. The channel is dropped from the
/// conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("observer channel closed")]
pub struct ChannelClosed;

/// One live observer connection.
pub trait ObserverChannel: Send + Sync {
    /// Hand off one event without waiting.
    fn send(&self, event: &Event) -> Result<(), ChannelClosed>;

    /// Whether the channel can still accept events.
    fn is_open(&self) -> bool {
        true
    }
}

pub type SharedChannel = Arc<dyn ObserverChannel>;

/// An observer backed by a bounded tokio queue.
///
/// A full queue counts as a disconnect: an observer that stops draining is
/// dropped instead of stalling the run.
#[derive(Debug, Clone)]
pub struct QueueChannel {
    tx: mpsc::Sender<Event>,
}

impl QueueChannel {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }
}

impl ObserverChannel for QueueChannel {
    fn send(&self, event: &Event) -> Result<(), ChannelClosed> {
        self.tx.try_send(event.clone()).map_err(|e| {
            if let mpsc::error::TrySendError::Full(_) = e {
                tracing::warn!(seq = event.seq, "Observer queue full; dropping observer");
            }
            ChannelClosed
        })
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Calls a closure for every event. Closed once the closure returns `false`.
pub struct FnChannel<F> {
    f: F,
    open: std::sync::atomic::AtomicBool,
}

impl<F> FnChannel<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            open: std::sync::atomic::AtomicBool::new(true),
        }
    }
}

impl<F> ObserverChannel for FnChannel<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn send(&self, event: &Event) -> Result<(), ChannelClosed> {
        use std::sync::atomic::Ordering;

        if !self.open.load(Ordering::Acquire) {
            return Err(ChannelClosed);
        }
        if (self.f)(event) {
            Ok(())
        } else {
            self.open.store(false, Ordering::Release);
            Err(ChannelClosed)
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(std::sync::atomic::Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use superagent_types::{ConversationId, EventKind, RunId};

    fn event(seq: u64) -> Event {
        Event::new(
            ConversationId::parse("c1").unwrap(),
            RunId::new(),
            seq,
            EventKind::error("x"),
        )
    }

    #[tokio::test]
    async fn test_queue_channel_delivers() {
        let (channel, mut rx) = QueueChannel::bounded(4);
        channel.send(&event(1)).unwrap();
        channel.send(&event(2)).unwrap();
        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(rx.recv().await.unwrap().seq, 2);
    }

    #[test]
    fn test_full_queue_is_closed() {
        let (channel, _rx) = QueueChannel::bounded(1);
        channel.send(&event(1)).unwrap();
        assert_eq!(channel.send(&event(2)), Err(ChannelClosed));
    }

    #[test]
    fn test_dropped_receiver_is_closed() {
        let (channel, rx) = QueueChannel::bounded(4);
        drop(rx);
        assert!(!channel.is_open());
        assert_eq!(channel.send(&event(1)), Err(ChannelClosed));
    }

    #[test]
    fn test_fn_channel_closes_on_false() {
        let channel = FnChannel::new(|e: &Event| e.seq < 2);
        assert!(channel.send(&event(1)).is_ok());
        assert!(channel.send(&event(2)).is_err());
        assert!(!channel.is_open());
        assert!(channel.send(&event(1)).is_err());
    }
}
