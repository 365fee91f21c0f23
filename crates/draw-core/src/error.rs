use referral_module::{ParticipantId, ReferralError, TierError};
use thiserror::Error;

use crate::cycle::CycleId;
use crate::store::StoreError;

/// Coarse classification callers use to decide how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse or malformed input; retrying the same call cannot succeed.
    Structural,
    /// The caller's view of a cycle or ticket is stale.
    StateConflict,
    /// An expected outcome such as an unpaid entry or an empty month.
    BusinessOutcome,
    /// Collaborator or storage fault; safe to retry with backoff.
    Unavailable,
}

/// Canonical error type of the draw engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    #[error(transparent)]
    Referral(#[from] ReferralError),

    #[error(transparent)]
    Tier(#[from] TierError),

    #[error("invalid cycle id: {0}")]
    InvalidCycleId(&'static str),

    #[error("cycle {cycle} already exists")]
    DuplicateCycle { cycle: CycleId },

    #[error("cycle window must close after it opens (opens {opens_at}, closes {closes_at})")]
    InvalidWindow { opens_at: u64, closes_at: u64 },

    #[error("unknown cycle {cycle}")]
    UnknownCycle { cycle: CycleId },

    #[error("unknown participant {participant}")]
    UnknownParticipant { participant: ParticipantId },

    #[error("ticket of {participant} has non-positive weight")]
    InvalidWeight { participant: ParticipantId },

    #[error("cycle {cycle} is not open for entries")]
    CycleNotOpen { cycle: CycleId },

    #[error("cycle {cycle} must be locked before drawing")]
    CycleNotLocked { cycle: CycleId },

    #[error("{participant} already holds a ticket for {cycle}")]
    AlreadyTicketed {
        participant: ParticipantId,
        cycle: CycleId,
    },

    #[error("cycle {cycle} has already been drawn")]
    AlreadyDrawn { cycle: CycleId },

    #[error("{participant} has not paid for {cycle}")]
    NotPaid {
        participant: ParticipantId,
        cycle: CycleId,
    },

    #[error("cycle {cycle} closed without any tickets")]
    EmptyTicketPool { cycle: CycleId },

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl DrawError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DrawError::Referral(_)
            | DrawError::Tier(_)
            | DrawError::InvalidCycleId(_)
            | DrawError::DuplicateCycle { .. }
            | DrawError::InvalidWindow { .. }
            | DrawError::UnknownCycle { .. }
            | DrawError::UnknownParticipant { .. }
            | DrawError::InvalidWeight { .. } => ErrorKind::Structural,
            DrawError::CycleNotOpen { .. }
            | DrawError::CycleNotLocked { .. }
            | DrawError::AlreadyTicketed { .. }
            | DrawError::AlreadyDrawn { .. } => ErrorKind::StateConflict,
            DrawError::NotPaid { .. } | DrawError::EmptyTicketPool { .. } => {
                ErrorKind::BusinessOutcome
            }
            DrawError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Only internal faults are worth retrying; the engine itself never does.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

impl From<StoreError> for DrawError {
    fn from(err: StoreError) -> Self {
        DrawError::Unavailable(err.to_string())
    }
}
