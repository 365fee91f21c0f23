use std::sync::Mutex;

use referral_module::{ParticipantId, ReferralCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cycle::{CycleId, DrawSeed, Ticket};

/// Every state change the engine commits, in the order it committed them.
/// Replaying the sequence rebuilds the engine exactly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DrawEvent {
    ParticipantRegistered {
        participant: ParticipantId,
        referral_code: ReferralCode,
        referred_by: Option<ParticipantId>,
        registered_at: u64,
    },
    ReferralLinked {
        referrer: ParticipantId,
        referee: ParticipantId,
    },
    CycleOpened {
        cycle: CycleId,
        opens_at: u64,
        closes_at: u64,
    },
    TicketIssued {
        ticket: Ticket,
    },
    CycleLocked {
        cycle: CycleId,
        at: u64,
    },
    CycleDrawn {
        cycle: CycleId,
        winner: Option<Ticket>,
        seed: Option<DrawSeed>,
        at: u64,
    },
}

impl DrawEvent {
    pub fn label(&self) -> &'static str {
        match self {
            DrawEvent::ParticipantRegistered { .. } => "participant_registered",
            DrawEvent::ReferralLinked { .. } => "referral_linked",
            DrawEvent::CycleOpened { .. } => "cycle_opened",
            DrawEvent::TicketIssued { .. } => "ticket_issued",
            DrawEvent::CycleLocked { .. } => "cycle_locked",
            DrawEvent::CycleDrawn { .. } => "cycle_drawn",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("journal io: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal encoding: {0}")]
    Encoding(String),

    #[error("journal corrupted at entry {height}: {reason}")]
    Corrupt { height: u64, reason: String },

    #[error("journal unavailable: {0}")]
    Unavailable(String),
}

/// Persistence collaborator.
///
/// `append` must be durable when it returns `Ok`; the engine only changes its
/// in-memory state after a successful append.
pub trait DrawStore: Send + Sync {
    fn append(&self, event: &DrawEvent) -> Result<(), StoreError>;

    fn load(&self) -> Result<Vec<DrawEvent>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Mutex<Vec<DrawEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DrawStore for MemoryStore {
    fn append(&self, event: &DrawEvent) -> Result<(), StoreError> {
        self.events
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?
            .push(event.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<DrawEvent>, StoreError> {
        self.events
            .lock()
            .map(|events| events.clone())
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))
    }
}
