//! Handshake and acknowledgement state machine.
//!
//! The panel requires a fixed two-command handshake before it accepts a
//! frame, and acknowledges every frame before the next may be sent:
//!
//! ```text
//! (idle) ─first cmd→ FirstSent ─ack1→ AckOne ─second cmd→ SecondSent
//!        ─ack2→ AckTwo ─→ Ready ─frame→ FrameSent ─ack3→ AckThree ─→ Ready …
//! ```
//!
//! The handshake runs once per connection; only the frame/ack-three loop
//! repeats.  The machine is pure: it owns no I/O and no timers.  The session
//! drives it by reporting what was sent and which acks were observed, and by
//! calling [`HandshakeStateMachine::reset`] when a stage timeout or link drop
//! aborts the sequence.  Out-of-order acks never advance a stage — observing
//! ack-two while only the first command is out leaves the machine in
//! `FirstSent`.
//!
//! Both hardware variants share this machine; the variant only selects which
//! ack byte patterns the classifier matches (see
//! [`crate::protocol::vocabulary`]).

use thiserror::Error;

use crate::protocol::vocabulary::{AckKind, PanelVariant};

/// One checkpoint in the handshake/send sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStage {
    /// First handshake command written, awaiting ack-one.
    FirstSent,
    /// Ack-one observed.
    AckOne,
    /// Second handshake command written, awaiting ack-two.
    SecondSent,
    /// Ack-two observed; handshake complete pending promotion to `Ready`.
    AckTwo,
    /// A frame was written, awaiting ack-three.
    FrameSent,
    /// Ack-three observed; frame delivery confirmed pending return to `Ready`.
    AckThree,
    /// The link is handshaken and idle; a frame may be sent.
    Ready,
}

/// Errors from driving the state machine out of order.
///
/// These are local programming-contract violations, not remote faults: the
/// firmware never causes them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("{operation} is not valid at handshake stage {stage:?}")]
    WrongStage {
        operation: &'static str,
        stage: Option<AckStage>,
    },
}

/// What [`HandshakeStateMachine::on_ack`] did with an observed ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDisposition {
    /// The ack matched the awaited stage; the machine advanced to this stage.
    Advanced(AckStage),
    /// The ack did not match the awaited stage (or nothing is awaited) and
    /// was ignored without failing anything.
    Ignored,
}

/// Drives the fixed handshake and per-frame acknowledgement sequence.
///
/// `stage` is `None` between connections: nothing has been sent and nothing
/// is awaited.
#[derive(Debug)]
pub struct HandshakeStateMachine {
    variant: PanelVariant,
    stage: Option<AckStage>,
}

impl HandshakeStateMachine {
    /// Creates a machine for the given hardware variant, in the idle state.
    pub fn new(variant: PanelVariant) -> Self {
        Self {
            variant,
            stage: None,
        }
    }

    /// The hardware variant this machine matches acks for.
    pub fn variant(&self) -> PanelVariant {
        self.variant
    }

    /// Current stage, or `None` if the handshake has not started.
    pub fn stage(&self) -> Option<AckStage> {
        self.stage
    }

    /// `true` once the handshake is complete and no frame is in flight.
    pub fn is_ready(&self) -> bool {
        self.stage == Some(AckStage::Ready)
    }

    /// Which ack resolves the stage currently being awaited, if any.
    pub fn awaited(&self) -> Option<AckKind> {
        match self.stage {
            Some(AckStage::FirstSent) => Some(AckKind::AckOne),
            Some(AckStage::SecondSent) => Some(AckKind::AckTwo),
            Some(AckStage::FrameSent) => Some(AckKind::AckThree),
            _ => None,
        }
    }

    /// Aborts whatever was in progress.  Called on stage timeout or link
    /// drop; the full handshake must run again before the next frame.
    pub fn reset(&mut self) {
        self.stage = None;
    }

    /// Records that the first handshake command was written.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::WrongStage`] unless the machine is idle.
    pub fn first_sent(&mut self) -> Result<(), HandshakeError> {
        match self.stage {
            None => {
                self.stage = Some(AckStage::FirstSent);
                Ok(())
            }
            stage => Err(HandshakeError::WrongStage {
                operation: "first_sent",
                stage,
            }),
        }
    }

    /// Records that the second handshake command was written.
    pub fn second_sent(&mut self) -> Result<(), HandshakeError> {
        match self.stage {
            Some(AckStage::AckOne) => {
                self.stage = Some(AckStage::SecondSent);
                Ok(())
            }
            stage => Err(HandshakeError::WrongStage {
                operation: "second_sent",
                stage,
            }),
        }
    }

    /// Records that a frame was written.  Only valid from `Ready`; the
    /// session must never have more than one frame in flight.
    pub fn frame_sent(&mut self) -> Result<(), HandshakeError> {
        match self.stage {
            Some(AckStage::Ready) => {
                self.stage = Some(AckStage::FrameSent);
                Ok(())
            }
            stage => Err(HandshakeError::WrongStage {
                operation: "frame_sent",
                stage,
            }),
        }
    }

    /// Feeds one classified ack into the machine.
    ///
    /// Advances only if the ack matches the awaited stage; every other ack —
    /// including [`AckKind::Unrecognized`] and known acks arriving out of
    /// order — is reported as [`AckDisposition::Ignored`].
    pub fn on_ack(&mut self, kind: AckKind) -> AckDisposition {
        let next = match (self.stage, kind) {
            (Some(AckStage::FirstSent), AckKind::AckOne) => AckStage::AckOne,
            (Some(AckStage::SecondSent), AckKind::AckTwo) => AckStage::AckTwo,
            (Some(AckStage::FrameSent), AckKind::AckThree) => AckStage::AckThree,
            _ => return AckDisposition::Ignored,
        };
        self.stage = Some(next);
        AckDisposition::Advanced(next)
    }

    /// Promotes the machine to `Ready` after a completed stage: `AckTwo`
    /// (handshake done) or `AckThree` (frame confirmed).
    pub fn mark_ready(&mut self) -> Result<(), HandshakeError> {
        match self.stage {
            Some(AckStage::AckTwo) | Some(AckStage::AckThree) => {
                self.stage = Some(AckStage::Ready);
                Ok(())
            }
            stage => Err(HandshakeError::WrongStage {
                operation: "mark_ready",
                stage,
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
