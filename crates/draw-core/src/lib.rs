//! Draw engine for the Voyage monthly lottery.
//!
//! Participants pay for a monthly cycle, receive one ticket whose weight
//! depends on their referral tier, and one winner is drawn per cycle once the
//! cycle is locked.
//!
//! * [`eligibility`]: payment gate consulted before any ticket is issued.
//! * [`scheduler`]: cycle lifecycle (open → locked → drawn) and ticket
//!   issuance, serialized per cycle.
//! * [`selector`]: cumulative-weight winner selection over a seeded RNG.
//! * [`store`]: the journal events every mutation is recorded as, and the
//!   persistence trait they are written through.
//! * [`service`]: the facade combining referrals, tiers and the scheduler.
//!
//! Payment lookups, notification delivery and durable storage are external
//! collaborators reached through the traits in this crate.

pub mod audit;
pub mod clock;
pub mod cycle;
pub mod eligibility;
pub mod notify;
pub mod scheduler;
pub mod selector;
pub mod service;
pub mod store;

mod error;

pub use audit::CycleAudit;
pub use clock::{Clock, ManualClock, SystemClock};
pub use cycle::{
    CycleId, CycleState, DrawCycle, DrawOutcome, DrawSeed, Participation, ParticipationStatus,
    Ticket,
};
pub use eligibility::{
    CollaboratorError, EligibilityGate, PaymentService, PaymentStatus, MAX_PENDING_LOOKUPS,
};
pub use error::{DrawError, ErrorKind};
pub use notify::{MemorySink, Notification, NotificationSink, NullSink, Outcome, SinkError};
pub use scheduler::DrawScheduler;
pub use selector::{FixedSeed, OsSeedSource, SeedSource, WeightedSelector};
pub use service::{Collaborators, DrawService, Standing};
pub use store::{DrawEvent, DrawStore, MemoryStore, StoreError};

pub use referral_module::{
    Participant, ParticipantId, ReferralEdge, ReferralError, Tier, TierError, TierProgress,
    TierTable, BASE_WEIGHT,
};
