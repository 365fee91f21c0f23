use thiserror::Error;

use crate::graph::{ParticipantId, ReferralCode};

/// Errors raised while registering participants or referral edges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferralError {
    #[error("participant {participant} cannot refer themself")]
    SelfReferral { participant: ParticipantId },

    #[error("unknown referrer {referrer}")]
    UnknownReferrer { referrer: ParticipantId },

    #[error("unknown participant {participant}")]
    UnknownParticipant { participant: ParticipantId },

    #[error("participant {referee} is already referred by {referrer}")]
    AlreadyReferred {
        referee: ParticipantId,
        referrer: ParticipantId,
    },

    #[error("linking {referee} under {referrer} would create a referral cycle")]
    CycleDetected {
        referrer: ParticipantId,
        referee: ParticipantId,
    },

    #[error("participant {participant} is already registered")]
    DuplicateParticipant { participant: ParticipantId },

    #[error("referral code {code} is already taken")]
    DuplicateReferralCode { code: ReferralCode },

    #[error("unknown referral code {code}")]
    UnknownReferralCode { code: ReferralCode },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(&'static str),
}

/// Tier ladder construction failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierError {
    #[error("invalid tier table: {0}")]
    InvalidTierTable(String),
}
