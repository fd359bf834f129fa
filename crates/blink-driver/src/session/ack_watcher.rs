//! Correlates inbound notification bytes with the single awaited ack.
//!
//! The panel pushes raw frames on its notify characteristic.  The watcher
//! decodes each one, classifies the payload through the variant's
//! vocabulary, and resolves the one pending wait when the expected kind
//! arrives.  Everything else is logged and dropped: corruption, noise, and
//! known acks arriving out of order all leave the wait running until the
//! stage timeout fires.  The timeout is authoritative; no amount of
//! unmatched traffic fails a wait early.

use std::time::Duration;

use blink_core::protocol::frame;
use blink_core::{AckKind, AckVocabulary, PanelVariant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transport::TransportEvent;

/// Ways a wait can end without the expected ack.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AckWaitError {
    /// The stage timeout elapsed.
    #[error("timed out after {timeout:?} waiting for {kind:?}")]
    Timeout { kind: AckKind, timeout: Duration },

    /// The link dropped while waiting.
    #[error("link dropped while waiting for {kind:?}")]
    LinkDropped { kind: AckKind },

    /// The notification stream closed; the transport is gone.
    #[error("notification stream closed")]
    StreamClosed,
}

/// Consumes one transport's notification stream on behalf of a session.
///
/// Exclusive `&mut` access makes overlapping waits unrepresentable, which
/// is what keeps the one-pending-wait contract honest.
pub struct AckWatcher {
    events: mpsc::Receiver<TransportEvent>,
    vocabulary: &'static AckVocabulary,
}

impl AckWatcher {
    pub fn new(variant: PanelVariant, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self {
            events,
            vocabulary: variant.vocabulary(),
        }
    }

    /// Swaps in the stream from a fresh [`crate::transport::PanelTransport::subscribe`]
    /// call.  Required after every reconnect: the old stream belongs to the
    /// dead link.
    pub fn resubscribe(&mut self, events: mpsc::Receiver<TransportEvent>) {
        self.events = events;
    }

    /// Next raw event, for idle-time link monitoring between waits.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Waits until the panel sends an ack of `kind`, or until `timeout`
    /// elapses.
    pub async fn wait_for(&mut self, kind: AckKind, timeout: Duration) -> Result<(), AckWaitError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AckWaitError::Timeout { kind, timeout });
            }

            let event = match tokio::time::timeout(remaining, self.events.recv()).await {
                Err(_) => return Err(AckWaitError::Timeout { kind, timeout }),
                Ok(None) => return Err(AckWaitError::StreamClosed),
                Ok(Some(event)) => event,
            };

            let wire = match event {
                TransportEvent::Disconnected => return Err(AckWaitError::LinkDropped { kind }),
                TransportEvent::Notification(wire) => wire,
            };

            let payload = match frame::decode(&wire) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(%err, len = wire.len(), "discarding corrupt notification");
                    continue;
                }
            };

            match self.vocabulary.classify(&payload) {
                matched if matched == kind => return Ok(()),
                AckKind::Unrecognized => {
                    debug!(len = payload.len(), "ignoring unrecognized notification");
                }
                other => {
                    debug!(got = ?other, awaiting = ?kind, "ignoring out-of-order ack");
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher() -> (AckWatcher, mpsc::Sender<TransportEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (AckWatcher::new(PanelVariant::Square32, rx), tx)
    }

    fn framed(payload: &[u8]) -> TransportEvent {
        TransportEvent::Notification(frame::encode(payload).unwrap())
    }

    #[tokio::test]
    async fn test_matching_ack_resolves_wait() {
        let (mut watcher, tx) = watcher();
        let vocab = PanelVariant::Square32.vocabulary();
        tx.send(framed(vocab.ack_one)).await.unwrap();

        let result = watcher
            .wait_for(AckKind::AckOne, Duration::from_millis(100))
            .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_noise_does_not_resolve_or_fail_the_wait() {
        let (mut watcher, tx) = watcher();
        let vocab = PanelVariant::Square32.vocabulary();
        tx.send(framed(&[0xDE, 0xAD])).await.unwrap();
        tx.send(framed(&[0x00])).await.unwrap();
        tx.send(framed(vocab.ack_two)).await.unwrap();

        let result = watcher
            .wait_for(AckKind::AckTwo, Duration::from_millis(100))
            .await;
        assert_eq!(result, Ok(()), "noise before the ack must be skipped");
    }

    #[tokio::test]
    async fn test_out_of_order_ack_is_ignored_until_timeout() {
        let (mut watcher, tx) = watcher();
        let vocab = PanelVariant::Square32.vocabulary();
        // Wrong stage's ack: the timeout stays authoritative.
        tx.send(framed(vocab.ack_three)).await.unwrap();

        let timeout = Duration::from_millis(30);
        let result = watcher.wait_for(AckKind::AckOne, timeout).await;
        assert_eq!(
            result,
            Err(AckWaitError::Timeout {
                kind: AckKind::AckOne,
                timeout
            })
        );
    }

    #[tokio::test]
    async fn test_corrupt_notification_is_discarded() {
        let (mut watcher, tx) = watcher();
        let vocab = PanelVariant::Square32.vocabulary();

        // A bit-flipped ack must not resolve the wait; the clean retransmit
        // behind it must.
        let mut corrupted = frame::encode(vocab.ack_one).unwrap();
        corrupted[2] ^= 0x40;
        tx.send(TransportEvent::Notification(corrupted)).await.unwrap();
        tx.send(framed(vocab.ack_one)).await.unwrap();

        let result = watcher
            .wait_for(AckKind::AckOne, Duration::from_millis(100))
            .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_disconnect_fails_the_wait_immediately() {
        let (mut watcher, tx) = watcher();
        tx.send(TransportEvent::Disconnected).await.unwrap();

        let result = watcher
            .wait_for(AckKind::AckThree, Duration::from_secs(5))
            .await;
        assert_eq!(
            result,
            Err(AckWaitError::LinkDropped {
                kind: AckKind::AckThree
            })
        );
    }

    #[tokio::test]
    async fn test_closed_stream_fails_the_wait() {
        let (mut watcher, tx) = watcher();
        drop(tx);

        let result = watcher
            .wait_for(AckKind::AckOne, Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(AckWaitError::StreamClosed));
    }

    #[tokio::test]
    async fn test_resubscribe_switches_streams() {
        let (mut watcher, old_tx) = watcher();
        let (new_tx, new_rx) = mpsc::channel(16);
        watcher.resubscribe(new_rx);
        drop(old_tx);

        let vocab = PanelVariant::Square32.vocabulary();
        new_tx.send(framed(vocab.ack_one)).await.unwrap();
        let result = watcher
            .wait_for(AckKind::AckOne, Duration::from_millis(100))
            .await;
        assert_eq!(result, Ok(()));
    }
}
