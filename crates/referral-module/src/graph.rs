use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ReferralError;

pub type ParticipantId = String;
pub type ReferralCode = String;

/// A registered draw participant.
///
/// The referral count is not stored here; it is derived from the edge set
/// through [`ReferralGraph::count_for`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub referral_code: ReferralCode,
    pub referred_by: Option<ParticipantId>,
    pub registered_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReferralEdge {
    pub referrer: ParticipantId,
    pub referee: ParticipantId,
}

/// Referrer → referee forest.
///
/// Every participant has at most one referrer and no participant can reach
/// themself by following `referred_by` upward.
#[derive(Clone, Debug, Default)]
pub struct ReferralGraph {
    participants: BTreeMap<ParticipantId, Participant>,
    codes: BTreeMap<ReferralCode, ParticipantId>,
    referees: BTreeMap<ParticipantId, BTreeSet<ParticipantId>>,
    edges: Vec<ReferralEdge>,
}

impl ReferralGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `id` and `referral_code` could be registered, without
    /// registering them.
    pub fn validate_participant(&self, id: &str, referral_code: &str) -> Result<(), ReferralError> {
        if id.trim().is_empty() {
            return Err(ReferralError::InvalidIdentifier("participant id is empty"));
        }
        if referral_code.trim().is_empty() {
            return Err(ReferralError::InvalidIdentifier("referral code is empty"));
        }
        if self.participants.contains_key(id) {
            return Err(ReferralError::DuplicateParticipant {
                participant: id.to_string(),
            });
        }
        if self.codes.contains_key(referral_code) {
            return Err(ReferralError::DuplicateReferralCode {
                code: referral_code.to_string(),
            });
        }
        Ok(())
    }

    pub fn register_participant(
        &mut self,
        id: &str,
        referral_code: &str,
        registered_at: u64,
    ) -> Result<&Participant, ReferralError> {
        self.validate_participant(id, referral_code)?;
        self.codes.insert(referral_code.to_string(), id.to_string());
        let participant = self
            .participants
            .entry(id.to_string())
            .or_insert_with(|| Participant {
                id: id.to_string(),
                referral_code: referral_code.to_string(),
                referred_by: None,
                registered_at,
            });
        Ok(participant)
    }

    /// Check every precondition of [`register_edge`](Self::register_edge)
    /// without mutating the graph.
    pub fn validate_edge(&self, referrer: &str, referee: &str) -> Result<(), ReferralError> {
        if referrer == referee {
            return Err(ReferralError::SelfReferral {
                participant: referrer.to_string(),
            });
        }
        if !self.participants.contains_key(referrer) {
            return Err(ReferralError::UnknownReferrer {
                referrer: referrer.to_string(),
            });
        }
        let target = self
            .participants
            .get(referee)
            .ok_or_else(|| ReferralError::UnknownParticipant {
                participant: referee.to_string(),
            })?;
        if let Some(existing) = &target.referred_by {
            return Err(ReferralError::AlreadyReferred {
                referee: referee.to_string(),
                referrer: existing.clone(),
            });
        }
        if referrer_chain_contains(&self.participants, referrer, referee) {
            return Err(ReferralError::CycleDetected {
                referrer: referrer.to_string(),
                referee: referee.to_string(),
            });
        }
        Ok(())
    }

    /// Link `referee` under `referrer`. The referrer's count grows by exactly
    /// one; a referee that already has a referrer is always rejected.
    pub fn register_edge(&mut self, referrer: &str, referee: &str) -> Result<ReferralEdge, ReferralError> {
        self.validate_edge(referrer, referee)?;
        if let Some(target) = self.participants.get_mut(referee) {
            target.referred_by = Some(referrer.to_string());
        }
        self.referees
            .entry(referrer.to_string())
            .or_default()
            .insert(referee.to_string());
        let edge = ReferralEdge {
            referrer: referrer.to_string(),
            referee: referee.to_string(),
        };
        self.edges.push(edge.clone());
        Ok(edge)
    }

    /// Resolve `referral_code` and check that `id` could join under it.
    /// Returns the referrer's id.
    pub fn validate_with_code(
        &self,
        id: &str,
        referral_code: &str,
        referrer_code: &str,
    ) -> Result<ParticipantId, ReferralError> {
        let referrer = self
            .resolve_code(referrer_code)
            .ok_or_else(|| ReferralError::UnknownReferralCode {
                code: referrer_code.to_string(),
            })?
            .clone();
        self.validate_participant(id, referral_code)?;
        Ok(referrer)
    }

    /// Register a new participant who signed up through someone's referral
    /// link. Nothing is recorded if the code does not resolve.
    pub fn register_with_code(
        &mut self,
        id: &str,
        referral_code: &str,
        referrer_code: &str,
        registered_at: u64,
    ) -> Result<ReferralEdge, ReferralError> {
        let referrer = self.validate_with_code(id, referral_code, referrer_code)?;
        self.register_participant(id, referral_code, registered_at)?;
        self.register_edge(&referrer, id)
    }

    /// Number of direct referees. Referrals are not transitive.
    pub fn count_for(&self, id: &str) -> u32 {
        self.referees
            .get(id)
            .map(|set| u32::try_from(set.len()).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }

    pub fn resolve_code(&self, code: &str) -> Option<&ParticipantId> {
        self.codes.get(code)
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.participants.contains_key(id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn referrer_of(&self, id: &str) -> Option<&ParticipantId> {
        self.participants.get(id).and_then(|p| p.referred_by.as_ref())
    }

    pub fn referees_of(&self, id: &str) -> Vec<ParticipantId> {
        self.referees
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Accepted edges in registration order.
    pub fn edges(&self) -> &[ReferralEdge] {
        &self.edges
    }

    /// Referrer chain above `id`, nearest first, at most `limit` entries.
    pub fn ancestry(&self, id: &str, limit: usize) -> Vec<ParticipantId> {
        let mut chain = Vec::new();
        let mut visited = BTreeSet::new();
        let mut node = id;
        while let Some(parent) = self.referrer_of(node) {
            if chain.len() >= limit || !visited.insert(parent.clone()) {
                break;
            }
            chain.push(parent.clone());
            node = parent.as_str();
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Walk `referred_by` upward from `start` (inclusive) looking for `needle`.
fn referrer_chain_contains(
    participants: &BTreeMap<ParticipantId, Participant>,
    start: &str,
    needle: &str,
) -> bool {
    let mut visited = BTreeSet::new();
    let mut node = Some(start);
    while let Some(current) = node {
        if current == needle {
            return true;
        }
        if !visited.insert(current) {
            // Only reachable if the forest invariant was already broken.
            return true;
        }
        node = participants
            .get(current)
            .and_then(|p| p.referred_by.as_deref());
    }
    false
}

/// Shareable registration link for a referral code.
pub fn referral_link(base_url: &str, code: &str) -> String {
    format!("{}/register?ref={}", base_url.trim_end_matches('/'), code)
}
