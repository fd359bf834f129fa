//! Acknowledgement vocabularies for the two supported panel hardware variants.
//!
//! The 32×32 and 64×16 panels run the same handshake protocol but answer with
//! different notification byte patterns.  Rather than branching per stage at
//! every call site, each variant selects one constant table
//! ([`AckVocabulary`]) and a single classifier turns raw notification
//! payloads into a tagged [`AckKind`].
//!
//! The byte sequences below were captured from real hardware; they must match
//! the firmware exactly.  A firmware change means a new vocabulary entry, not
//! a new state machine.

use serde::{Deserialize, Serialize};

/// Which panel hardware a session is talking to.
///
/// The variant decides both the first handshake command (it carries the panel
/// mode word) and the ack patterns the firmware answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelVariant {
    /// 32×32 square panel.
    Square32,
    /// 64×16 wide panel.
    Wide64x16,
}

impl PanelVariant {
    /// Returns the constant command/ack table for this variant.
    pub fn vocabulary(self) -> &'static AckVocabulary {
        match self {
            PanelVariant::Square32 => &SQUARE32,
            PanelVariant::Wide64x16 => &WIDE64X16,
        }
    }

    /// Native tile dimensions of the hardware, `(width, height)`.
    pub fn tile_size(self) -> (u32, u32) {
        match self {
            PanelVariant::Square32 => (32, 32),
            PanelVariant::Wide64x16 => (64, 16),
        }
    }
}

/// Classification of one inbound notification payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// Reply to the first handshake command.
    AckOne,
    /// Reply to the second handshake command.
    AckTwo,
    /// Reply to a transmitted frame.
    AckThree,
    /// Bytes that match no known pattern.  Pure noise: logged and dropped,
    /// never advances or fails a stage.
    Unrecognized,
}

/// The fixed command and acknowledgement bytes for one hardware variant.
///
/// All fields are frame *payloads*; the wire length prefix and integrity
/// trailer are applied by [`crate::protocol::frame`].
#[derive(Debug)]
pub struct AckVocabulary {
    /// First handshake command, carries the panel mode word.
    pub handshake_first: &'static [u8],
    /// Second handshake command.
    pub handshake_second: &'static [u8],
    /// Expected reply to `handshake_first`.
    pub ack_one: &'static [u8],
    /// Expected reply to `handshake_second`.
    pub ack_two: &'static [u8],
    /// Expected reply to a frame transfer.
    pub ack_three: &'static [u8],
}

impl AckVocabulary {
    /// Classifies a decoded notification payload against this vocabulary.
    pub fn classify(&self, payload: &[u8]) -> AckKind {
        if payload == self.ack_one {
            AckKind::AckOne
        } else if payload == self.ack_two {
            AckKind::AckTwo
        } else if payload == self.ack_three {
            AckKind::AckThree
        } else {
            AckKind::Unrecognized
        }
    }

    /// Returns the expected ack pattern for `kind`, or `None` for
    /// [`AckKind::Unrecognized`].
    pub fn pattern(&self, kind: AckKind) -> Option<&'static [u8]> {
        match kind {
            AckKind::AckOne => Some(self.ack_one),
            AckKind::AckTwo => Some(self.ack_two),
            AckKind::AckThree => Some(self.ack_three),
            AckKind::Unrecognized => None,
        }
    }
}

/// Vocabulary for the 32×32 panel (mode word `32 00`).
pub static SQUARE32: AckVocabulary = AckVocabulary {
    handshake_first: &[0x01, 0x80, 0x0E, 0x06, 0x32, 0x00],
    handshake_second: &[0x05, 0x80],
    ack_one: &[0x01, 0x80, 0x81, 0x06, 0x32, 0x00, 0x00, 0x01, 0x00, 0x01],
    ack_two: &[0x05, 0x80, 0x0B, 0x03, 0x07, 0x02],
    ack_three: &[0x02, 0x00, 0x03],
};

/// Vocabulary for the 64×16 panel (mode word `40 10`).
pub static WIDE64X16: AckVocabulary = AckVocabulary {
    handshake_first: &[0x01, 0x80, 0x0E, 0x06, 0x40, 0x10],
    handshake_second: &[0x05, 0x80],
    ack_one: &[0x01, 0x80, 0x81, 0x06, 0x40, 0x10, 0x00, 0x01, 0x00, 0x01],
    ack_two: &[0x05, 0x80, 0x0B, 0x03, 0x07, 0x04],
    ack_three: &[0x02, 0x00, 0x04],
};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square32_classifies_all_three_acks() {
        let vocab = PanelVariant::Square32.vocabulary();
        assert_eq!(vocab.classify(vocab.ack_one), AckKind::AckOne);
        assert_eq!(vocab.classify(vocab.ack_two), AckKind::AckTwo);
        assert_eq!(vocab.classify(vocab.ack_three), AckKind::AckThree);
    }

    #[test]
    fn test_wide64x16_classifies_all_three_acks() {
        let vocab = PanelVariant::Wide64x16.vocabulary();
        assert_eq!(vocab.classify(vocab.ack_one), AckKind::AckOne);
        assert_eq!(vocab.classify(vocab.ack_two), AckKind::AckTwo);
        assert_eq!(vocab.classify(vocab.ack_three), AckKind::AckThree);
    }

    #[test]
    fn test_noise_is_unrecognized() {
        let vocab = PanelVariant::Square32.vocabulary();
        assert_eq!(vocab.classify(&[]), AckKind::Unrecognized);
        assert_eq!(vocab.classify(&[0xDE, 0xAD]), AckKind::Unrecognized);
        // A near miss (one byte off) must not classify.
        let mut near = vocab.ack_one.to_vec();
        near[4] ^= 0xFF;
        assert_eq!(vocab.classify(&near), AckKind::Unrecognized);
    }

    #[test]
    fn test_vocabularies_do_not_cross_match() {
        // The wide panel's acks must look like noise to the square vocabulary,
        // otherwise a misconfigured variant could silently half-work.
        let square = PanelVariant::Square32.vocabulary();
        let wide = PanelVariant::Wide64x16.vocabulary();
        assert_eq!(square.classify(wide.ack_one), AckKind::Unrecognized);
        assert_eq!(square.classify(wide.ack_two), AckKind::Unrecognized);
        assert_eq!(square.classify(wide.ack_three), AckKind::Unrecognized);
    }

    #[test]
    fn test_pattern_lookup_matches_classify() {
        let vocab = PanelVariant::Square32.vocabulary();
        for kind in [AckKind::AckOne, AckKind::AckTwo, AckKind::AckThree] {
            let pattern = vocab.pattern(kind).unwrap();
            assert_eq!(vocab.classify(pattern), kind);
        }
        assert!(vocab.pattern(AckKind::Unrecognized).is_none());
    }

    #[test]
    fn test_tile_sizes() {
        assert_eq!(PanelVariant::Square32.tile_size(), (32, 32));
        assert_eq!(PanelVariant::Wide64x16.tile_size(), (64, 16));
    }
}
