use std::fmt;

use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use referral_module::ParticipantId;
use serde::{Deserialize, Serialize};

/// Cycle identifier, conventionally the calendar month (`"2024-08"`).
pub type CycleId = String;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Open,
    Locked,
    Drawn,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CycleState::Open => "open",
            CycleState::Locked => "locked",
            CycleState::Drawn => "drawn",
        };
        f.write_str(label)
    }
}

/// One entry into one cycle. The weight is fixed when the ticket is issued.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub participant: ParticipantId,
    pub cycle: CycleId,
    pub weight: u64,
    pub issued_at: u64,
    /// Position in the cycle's issuance order; breaks same-second ties.
    pub sequence: u64,
}

/// 32 bytes of entropy a draw was run from, recorded for replay.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DrawSeed(pub [u8; 32]);

impl DrawSeed {
    /// Seed whose first eight bytes hold `value` little-endian.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        Self(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, String> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| format!("{e}"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("draw seed must be 32 bytes, got {}", v.len()))?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Deterministic generator the selector consumes. ChaCha20 keeps its
    /// output stream fixed across crate releases, so journaled draws replay.
    pub fn rng(&self) -> ChaCha20Rng {
        ChaCha20Rng::from_seed(self.0)
    }
}

impl fmt::Debug for DrawSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DrawSeed({})", self.to_hex())
    }
}

impl From<DrawSeed> for String {
    fn from(seed: DrawSeed) -> Self {
        seed.to_hex()
    }
}

impl TryFrom<String> for DrawSeed {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawCycle {
    pub id: CycleId,
    pub state: CycleState,
    pub opens_at: u64,
    pub closes_at: u64,
    pub tickets: Vec<Ticket>,
    pub winner: Option<Ticket>,
    pub seed: Option<DrawSeed>,
}

impl DrawCycle {
    pub fn new(id: &str, opens_at: u64, closes_at: u64) -> Self {
        Self {
            id: id.to_string(),
            state: CycleState::Open,
            opens_at,
            closes_at,
            tickets: Vec::new(),
            winner: None,
            seed: None,
        }
    }

    pub fn ticket_for(&self, participant: &str) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.participant == participant)
    }

    pub fn holds_ticket(&self, participant: &str) -> bool {
        self.ticket_for(participant).is_some()
    }

    pub fn total_weight(&self) -> u64 {
        self.tickets
            .iter()
            .fold(0u64, |acc, t| acc.saturating_add(t.weight))
    }

    /// Open and inside its `[opens_at, closes_at)` window.
    pub fn accepts_entries_at(&self, now: u64) -> bool {
        self.state == CycleState::Open && self.opens_at <= now && now < self.closes_at
    }

    /// Still open although its window has closed.
    pub fn is_due(&self, now: u64) -> bool {
        self.state == CycleState::Open && now >= self.closes_at
    }
}

/// Result of a committed draw.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DrawOutcome {
    pub cycle: CycleId,
    pub winner: Ticket,
    pub seed: DrawSeed,
    pub total_weight: u64,
    pub ticket_count: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationStatus {
    Pending,
    Selected,
    NotSelected,
}

/// One line of a participant's draw history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participation {
    pub cycle: CycleId,
    pub weight: u64,
    pub issued_at: u64,
    pub status: ParticipationStatus,
}

impl Participation {
    pub fn from_cycle(cycle: &DrawCycle, ticket: &Ticket) -> Self {
        let status = match (&cycle.state, &cycle.winner) {
            (CycleState::Drawn, Some(winner)) if winner.participant == ticket.participant => {
                ParticipationStatus::Selected
            }
            (CycleState::Drawn, _) => ParticipationStatus::NotSelected,
            _ => ParticipationStatus::Pending,
        };
        Self {
            cycle: cycle.id.clone(),
            weight: ticket.weight,
            issued_at: ticket.issued_at,
            status,
        }
    }
}
