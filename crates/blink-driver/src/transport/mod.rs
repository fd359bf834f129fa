//! The link-layer seam between a session and a physical panel.
//!
//! Everything above this trait is transport-agnostic: the session writes
//! opaque byte chunks and consumes a stream of [`TransportEvent`]s.  A real
//! backend wraps a BLE characteristic pair; the [`mock`] backend simulates a
//! panel in memory for tests and for headless runs.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mock;

/// Error type for link-layer operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link could not be established.
    #[error("connect to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// A write was attempted while the link is down.
    #[error("link is not connected")]
    NotConnected,

    /// The link failed mid-write.
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Events delivered on the notification stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw bytes the panel pushed on its notify characteristic.  Framing and
    /// classification happen above this layer.
    Notification(Vec<u8>),
    /// The link dropped without an explicit disconnect from our side.
    Disconnected,
}

/// Async capability set a panel link must provide.
///
/// Implementations are shared across tasks behind an `Arc`, so every method
/// takes `&self` and interior state must be thread-safe.
#[async_trait]
pub trait PanelTransport: Send + Sync {
    /// Establishes the link.  Calling while already connected is a no-op.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tears the link down.  Infallible: a link that is already down stays
    /// down.
    async fn disconnect(&self);

    /// Writes one link-layer chunk to the panel's command characteristic.
    /// Chunks are at most the negotiated MTU; the panel reassembles frames
    /// from the length prefix.
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Opens a fresh notification stream, replacing any previous subscriber.
    /// Called before each connect so no early notification is lost.
    fn subscribe(&self) -> mpsc::Receiver<TransportEvent>;

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;
}
