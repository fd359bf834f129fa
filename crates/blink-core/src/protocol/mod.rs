//! Wire protocol for the panel link: frame codec, command payload builders,
//! and the per-variant acknowledgement vocabularies.

pub mod commands;
pub mod frame;
pub mod vocabulary;

pub use frame::FrameError;
pub use vocabulary::{AckKind, AckVocabulary, PanelVariant};
