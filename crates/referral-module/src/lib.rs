//! Referral accounting for the Voyage monthly draw.
//!
//! Two building blocks live here:
//!
//! * [`graph`]: the referrer → referee forest, referral codes and the
//!   direct-referral counts that everything else derives from.
//! * [`tiers`]: the ordered tier ladder that turns a referral count into a
//!   priority bonus for draw tickets.
//!
//! Neither module knows about draw cycles or payments; the draw engine reads
//! counts from the graph and weights from the tier table at ticket issuance.

pub mod graph;
pub mod tiers;

mod error;

pub use error::{ReferralError, TierError};
pub use graph::{referral_link, Participant, ParticipantId, ReferralCode, ReferralEdge, ReferralGraph};
pub use tiers::{Tier, TierProgress, TierTable, BASE_WEIGHT};
