//! In-memory simulated panel for tests and headless runs.
//!
//! # Why a mock panel?
//!
//! The real link talks to physical LED hardware over a radio: tests cannot
//! observe what was written, cannot force a mid-transfer disconnect, and
//! cannot run without a panel on the desk.  `MockPanelTransport` replaces
//! the radio with in-memory recording plus a scripted firmware: every write
//! is reassembled into frames exactly as the panel would, and recognized
//! handshake/bitmap commands are answered with the variant's real ack bytes.
//!
//! # Usage in tests
//!
//! ```ignore
//! let (transport, panel) = MockPanelTransport::new(PanelVariant::Square32);
//! let session = DisplaySession::spawn("left", Arc::new(transport), config);
//!
//! session.connect().await.unwrap();
//!
//! // Assert on the reassembled frame payloads the "panel" received.
//! let frames = panel.frames.lock().unwrap();
//! assert_eq!(frames[0], PanelVariant::Square32.vocabulary().handshake_first);
//! ```
//!
//! The shared [`MockPanelState`] handle also scripts faults: failed connect
//! attempts, a silent firmware that never acks, delayed acks, injected noise
//! notifications, and spontaneous link drops.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blink_core::protocol::frame;
use blink_core::PanelVariant;
use tokio::sync::mpsc;

use super::{PanelTransport, TransportError, TransportEvent};

/// Observable and scriptable state shared between the transport handed to a
/// session and the test that drives it.
pub struct MockPanelState {
    /// Every link-layer chunk, in write order.
    pub writes: Mutex<Vec<Vec<u8>>>,
    /// Every complete frame payload reassembled from the chunks, decoded.
    pub frames: Mutex<Vec<Vec<u8>>>,
    /// Total connect attempts, including failed ones.
    pub connect_attempts: AtomicU32,
    /// Number of upcoming connect calls that will fail before one succeeds.
    pub fail_next_connects: AtomicU32,
    /// When `true`, the firmware stops acknowledging anything.
    pub silent: AtomicBool,
    /// Delay before each automatic ack is delivered.
    pub ack_delay: Mutex<Duration>,

    variant: PanelVariant,
    connected: AtomicBool,
    rx_buffer: Mutex<Vec<u8>>,
    subscriber: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl MockPanelState {
    /// Delivers a pre-framed notification to the current subscriber.
    pub async fn notify_raw(&self, wire: Vec<u8>) {
        let tx = self.subscriber.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Notification(wire)).await;
        }
    }

    /// Frames `payload` and delivers it as a notification.  Used to inject
    /// noise or out-of-order acks.
    pub async fn notify_payload(&self, payload: &[u8]) {
        let wire = frame::encode(payload).expect("notification payload fits a frame");
        self.notify_raw(wire).await;
    }

    /// Drops the link from the panel side and tells the subscriber.
    pub async fn inject_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let tx = self.subscriber.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Disconnected).await;
        }
    }

    /// Snapshot of the reassembled frame payloads received so far.
    pub fn frame_payloads(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    /// Whether the link is up, seen from the panel's side.
    pub fn is_link_up(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A simulated panel link.  See the module docs for the firmware script.
pub struct MockPanelTransport {
    address: String,
    state: Arc<MockPanelState>,
}

impl MockPanelTransport {
    /// Creates a simulated panel of the given variant, returning the
    /// transport (for the session) and the shared state (for the test).
    pub fn new(variant: PanelVariant) -> (Self, Arc<MockPanelState>) {
        Self::with_address(variant, "mock:00")
    }

    /// As [`MockPanelTransport::new`] with an explicit link address, so
    /// multi-panel tests get distinguishable log output.
    pub fn with_address(variant: PanelVariant, address: &str) -> (Self, Arc<MockPanelState>) {
        let state = Arc::new(MockPanelState {
            writes: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
            connect_attempts: AtomicU32::new(0),
            fail_next_connects: AtomicU32::new(0),
            silent: AtomicBool::new(false),
            ack_delay: Mutex::new(Duration::ZERO),
            variant,
            connected: AtomicBool::new(false),
            rx_buffer: Mutex::new(Vec::new()),
            subscriber: Mutex::new(None),
        });
        let transport = Self {
            address: address.to_string(),
            state: Arc::clone(&state),
        };
        (transport, state)
    }
}

#[async_trait]
impl PanelTransport for MockPanelTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let state = &self.state;
        state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if state.fail_next_connects.load(Ordering::SeqCst) > 0 {
            state.fail_next_connects.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::ConnectFailed {
                address: self.address.clone(),
                reason: "scripted connect failure".to_string(),
            });
        }
        state.rx_buffer.lock().unwrap().clear();
        state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let state = &self.state;
        if !state.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        state.writes.lock().unwrap().push(bytes.to_vec());

        // Reassemble frames from the chunk stream the way the firmware does:
        // length prefix first, then payload plus the 4-byte trailer.
        let complete = {
            let mut buffer = state.rx_buffer.lock().unwrap();
            buffer.extend_from_slice(bytes);
            drain_complete_frames(&mut buffer)
        };

        for wire in complete {
            if let Ok(payload) = frame::decode(&wire) {
                state.frames.lock().unwrap().push(payload.clone());
                react(state, payload);
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel(64);
        *self.state.subscriber.lock().unwrap() = Some(tx);
        rx
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }
}

/// Splits off every complete `[len][payload][crc]` frame at the front of the
/// reassembly buffer.
fn drain_complete_frames(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    loop {
        if buffer.len() < 2 {
            return frames;
        }
        let payload_len = u16::from_le_bytes([buffer[0], buffer[1]]) as usize;
        let total = 2 + payload_len + 4;
        if buffer.len() < total {
            return frames;
        }
        frames.push(buffer.drain(..total).collect());
    }
}

/// The scripted firmware: answers recognized commands with the variant's ack
/// bytes after the configured delay.  Brightness, rotation, and commit are
/// accepted silently, as the hardware does.
fn react(state: &Arc<MockPanelState>, payload: Vec<u8>) {
    if state.silent.load(Ordering::SeqCst) {
        return;
    }
    let vocab = state.variant.vocabulary();
    let ack = if payload == vocab.handshake_first {
        vocab.ack_one
    } else if payload == vocab.handshake_second {
        vocab.ack_two
    } else if payload.first() == Some(&0x02) {
        // Bitmap transfer.
        vocab.ack_three
    } else {
        return;
    };

    let wire = frame::encode(ack).expect("ack fits a frame");
    let delay = *state.ack_delay.lock().unwrap();
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        state.notify_raw(wire).await;
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failure_script_runs_out() {
        let (transport, panel) = MockPanelTransport::new(PanelVariant::Square32);
        panel.fail_next_connects.store(2, Ordering::SeqCst);

        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(panel.connect_attempts.load(Ordering::SeqCst), 3);
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let (transport, _panel) = MockPanelTransport::new(PanelVariant::Square32);
        let err = transport.write(&[0x00]).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_chunked_writes_reassemble_into_one_frame() {
        let (transport, panel) = MockPanelTransport::new(PanelVariant::Square32);
        let mut rx = transport.subscribe();
        transport.connect().await.unwrap();

        let vocab = PanelVariant::Square32.vocabulary();
        let wire = frame::encode(vocab.handshake_first).unwrap();

        // Two chunks for one frame: the firmware must reassemble and ack.
        let split = wire.len() / 2;
        transport.write(&wire[..split]).await.unwrap();
        assert!(panel.frame_payloads().is_empty());
        transport.write(&wire[split..]).await.unwrap();

        assert_eq!(panel.frame_payloads(), vec![vocab.handshake_first.to_vec()]);
        match rx.recv().await.unwrap() {
            TransportEvent::Notification(ack_wire) => {
                assert_eq!(frame::decode(&ack_wire).unwrap(), vocab.ack_one);
            }
            other => panic!("expected ack notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_firmware_never_acks() {
        let (transport, panel) = MockPanelTransport::new(PanelVariant::Square32);
        panel.silent.store(true, Ordering::SeqCst);
        let mut rx = transport.subscribe();
        transport.connect().await.unwrap();

        let wire = frame::encode(PanelVariant::Square32.vocabulary().handshake_first).unwrap();
        transport.write(&wire).await.unwrap();

        assert!(tokio::time::timeout(Duration::from_millis(20), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_inject_disconnect_reaches_subscriber() {
        let (transport, panel) = MockPanelTransport::new(PanelVariant::Square32);
        let mut rx = transport.subscribe();
        transport.connect().await.unwrap();

        panel.inject_disconnect().await;

        assert_eq!(rx.recv().await, Some(TransportEvent::Disconnected));
        assert!(!transport.is_connected());
    }
}
