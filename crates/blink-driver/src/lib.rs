//! # blink-driver
//!
//! Async driver for BLE RGB matrix panels: per-panel session actors with
//! handshake and reconnect handling, a transport seam for the link layer,
//! and a manager that orchestrates a grid of panels as one composite
//! display.
//!
//! The pure protocol (frame codec, ack vocabularies, handshake state
//! machine, grid geometry) lives in `blink-core`; this crate owns every
//! timer, channel, and byte that crosses a link.

pub mod config;
pub mod manager;
pub mod session;
pub mod transport;

pub use manager::{FailurePolicy, ManagedPanelSpec, ManagerError, PanelManager, StartupPolicy};
pub use session::{DisplaySession, SessionConfig, SessionError, SessionState};
pub use transport::{PanelTransport, TransportError, TransportEvent};
