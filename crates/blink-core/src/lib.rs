//! # blink-core
//!
//! Shared library for the panel driver containing the wire frame codec,
//! command builders, acknowledgement vocabularies, the handshake state
//! machine, and grid/bitmap geometry.
//!
//! This crate is pure computation: it has zero dependencies on sockets,
//! radios, timers, or any other I/O.  The driver crate owns all transport
//! concerns and drives these types from its session loop.
//!
//! # Architecture overview
//!
//! The panels are addressable RGB LED matrices reached over a
//! low-bandwidth serial link.  Every byte written to a panel is a *frame*:
//! a length-prefixed payload with a CRC trailer.  Before a panel accepts
//! pixel data it requires a fixed two-command handshake, and it
//! acknowledges every frame before the next may be sent.
//!
//! - **`protocol`** – How bytes travel over the link.  `frame` is the outer
//!   codec, `commands` builds the device command payloads, and `vocabulary`
//!   holds the per-variant handshake/ack byte tables.
//!
//! - **`handshake`** – The pure state machine that sequences the handshake
//!   and the one-frame-in-flight send loop.
//!
//! - **`geometry`** – Grid placement validation and bitmap tiling for
//!   multi-panel composite displays.

pub mod geometry;
pub mod handshake;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `blink_core::PanelVariant` instead of the full module path.
pub use geometry::{Bitmap, GeometryError, GridGeometry, PanelPlacement};
pub use handshake::{AckDisposition, AckStage, HandshakeError, HandshakeStateMachine};
pub use protocol::commands::{CommandError, Rotation};
pub use protocol::{AckKind, AckVocabulary, FrameError, PanelVariant};
