use serde::{Deserialize, Serialize};

use crate::error::TierError;

/// Weight every ticket starts from before the tier bonus is added.
pub const BASE_WEIGHT: u64 = 1;

/// One rung of the tier ladder.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tier {
    pub name: String,
    pub min_referrals: u32,
    pub priority_bonus: u64,
}

impl Tier {
    pub fn new(name: impl Into<String>, min_referrals: u32, priority_bonus: u64) -> Self {
        Self {
            name: name.into(),
            min_referrals,
            priority_bonus,
        }
    }
}

/// Where a referral count sits on the ladder.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TierProgress {
    pub current: Tier,
    pub next: Option<Tier>,
    pub remaining: u32,
    /// Share of the way from `current` to `next`, `100` at the top tier.
    pub percent: u8,
}

/// Validated tier ladder: ascending, distinct `min_referrals`, first rung at 0.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Vec<Tier>", into = "Vec<Tier>")]
pub struct TierTable {
    rungs: Vec<Tier>,
}

impl TierTable {
    pub fn new(rungs: Vec<Tier>) -> Result<Self, TierError> {
        let first = rungs
            .first()
            .ok_or_else(|| TierError::InvalidTierTable("no rungs".into()))?;
        if first.min_referrals != 0 {
            return Err(TierError::InvalidTierTable(format!(
                "first rung {} starts at {} referrals, expected 0",
                first.name, first.min_referrals
            )));
        }
        if let Some(unnamed) = rungs.iter().position(|t| t.name.trim().is_empty()) {
            return Err(TierError::InvalidTierTable(format!("rung {unnamed} has no name")));
        }
        for pair in rungs.windows(2) {
            if pair[1].min_referrals == pair[0].min_referrals {
                return Err(TierError::InvalidTierTable(format!(
                    "rungs {} and {} share min_referrals {}",
                    pair[0].name, pair[1].name, pair[1].min_referrals
                )));
            }
            if pair[1].min_referrals < pair[0].min_referrals {
                return Err(TierError::InvalidTierTable(format!(
                    "rung {} is out of order",
                    pair[1].name
                )));
            }
        }
        Ok(Self { rungs })
    }

    /// Bronze / Silver / Gold ladder used when nothing else is configured.
    pub fn standard() -> Self {
        Self {
            rungs: vec![
                Tier::new("Bronze", 0, 0),
                Tier::new("Silver", 5, 1),
                Tier::new("Gold", 15, 2),
            ],
        }
    }

    pub fn rungs(&self) -> &[Tier] {
        &self.rungs
    }

    fn index_for(&self, referral_count: u32) -> usize {
        self.rungs
            .partition_point(|t| t.min_referrals <= referral_count)
            .saturating_sub(1)
    }

    /// Highest rung whose `min_referrals` does not exceed `referral_count`.
    pub fn tier_for(&self, referral_count: u32) -> &Tier {
        &self.rungs[self.index_for(referral_count)]
    }

    pub fn progress_to_next(&self, referral_count: u32) -> TierProgress {
        let idx = self.index_for(referral_count);
        let current = self.rungs[idx].clone();
        match self.rungs.get(idx + 1) {
            Some(next) => {
                let span = u64::from(next.min_referrals - current.min_referrals);
                let covered = u64::from(referral_count - current.min_referrals);
                TierProgress {
                    remaining: next.min_referrals.saturating_sub(referral_count),
                    percent: (covered * 100 / span) as u8,
                    current,
                    next: Some(next.clone()),
                }
            }
            None => TierProgress {
                current,
                next: None,
                remaining: 0,
                percent: 100,
            },
        }
    }

    /// Ticket weight for a participant with `referral_count` direct referrals.
    pub fn weight_for(&self, referral_count: u32) -> u64 {
        BASE_WEIGHT.saturating_add(self.tier_for(referral_count).priority_bonus)
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<Vec<Tier>> for TierTable {
    type Error = TierError;

    fn try_from(rungs: Vec<Tier>) -> Result<Self, Self::Error> {
        Self::new(rungs)
    }
}

impl From<TierTable> for Vec<Tier> {
    fn from(table: TierTable) -> Self {
        table.rungs
    }
}
