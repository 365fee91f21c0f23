use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cycle::{CycleId, CycleState, DrawCycle, DrawSeed, Ticket};
use crate::error::DrawError;
use crate::selector::WeightedSelector;

/// Everything needed to check a cycle's draw after the fact.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleAudit {
    pub cycle: CycleId,
    pub state: CycleState,
    pub ticket_count: usize,
    pub total_weight: u64,
    /// Hex SHA-256 Merkle root over the tickets in issuance order.
    pub ticket_root: String,
    pub seed: Option<DrawSeed>,
    pub winner: Option<Ticket>,
}

impl CycleAudit {
    pub fn of(cycle: &DrawCycle) -> Self {
        Self {
            cycle: cycle.id.clone(),
            state: cycle.state,
            ticket_count: cycle.tickets.len(),
            total_weight: cycle.total_weight(),
            ticket_root: hex::encode(ticket_root(&cycle.tickets)),
            seed: cycle.seed,
            winner: cycle.winner.clone(),
        }
    }
}

/// Re-run a drawn cycle from its recorded seed. `Ok(true)` when the
/// recorded winner is reproduced; `Ok(false)` for a cycle that has no seed
/// to replay (not drawn yet, or drawn with no tickets).
pub fn verify_draw(cycle: &DrawCycle) -> Result<bool, DrawError> {
    let (Some(seed), Some(winner)) = (&cycle.seed, &cycle.winner) else {
        return Ok(false);
    };
    let selector = WeightedSelector::new(&cycle.id, &cycle.tickets)?;
    Ok(selector.draw(seed) == winner)
}

fn ticket_leaf(ticket: &Ticket) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"ticket");
    hasher.update(ticket.cycle.as_bytes());
    hasher.update([0u8]);
    hasher.update(ticket.participant.as_bytes());
    hasher.update([0u8]);
    hasher.update(ticket.weight.to_le_bytes());
    hasher.update(ticket.issued_at.to_le_bytes());
    hasher.update(ticket.sequence.to_le_bytes());
    hasher.finalize().into()
}

/// Merkle root over tickets sorted by `(issued_at, sequence)`.
pub fn ticket_root(tickets: &[Ticket]) -> [u8; 32] {
    let mut ordered: Vec<&Ticket> = tickets.iter().collect();
    ordered.sort_by_key(|t| (t.issued_at, t.sequence));
    build_merkle(ordered.into_iter().map(ticket_leaf).collect())
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"voyage-draw-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
