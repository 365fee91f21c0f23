use std::sync::{Arc, Mutex};
use std::time::Duration;

use referral_module::{
    referral_link, Participant, ParticipantId, ReferralEdge, ReferralGraph, Tier, TierProgress,
    TierTable,
};
use serde::Serialize;
use tracing::info;

use crate::audit::CycleAudit;
use crate::clock::{Clock, SystemClock};
use crate::cycle::{CycleId, DrawCycle, DrawOutcome, Participation, Ticket};
use crate::eligibility::{EligibilityGate, PaymentService, DEFAULT_ELIGIBILITY_TIMEOUT};
use crate::error::DrawError;
use crate::notify::{NotificationSink, NullSink};
use crate::scheduler::{lock, DrawScheduler};
use crate::selector::{OsSeedSource, SeedSource};
use crate::store::{DrawEvent, DrawStore, MemoryStore};

/// External collaborators the engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub payments: Arc<dyn PaymentService>,
    pub store: Arc<dyn DrawStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub seeds: Arc<dyn SeedSource>,
    pub clock: Arc<dyn Clock>,
    pub eligibility_timeout: Duration,
}

impl Collaborators {
    /// In-memory journal, silent notifications, OS seeds and the wall clock.
    pub fn new(payments: Arc<dyn PaymentService>) -> Self {
        Self {
            payments,
            store: Arc::new(MemoryStore::new()),
            notifier: Arc::new(NullSink),
            seeds: Arc::new(OsSeedSource),
            clock: Arc::new(SystemClock),
            eligibility_timeout: DEFAULT_ELIGIBILITY_TIMEOUT,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DrawStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_seeds(mut self, seeds: Arc<dyn SeedSource>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_eligibility_timeout(mut self, timeout: Duration) -> Self {
        self.eligibility_timeout = timeout;
        self
    }
}

/// A participant's referral standing, the engine's answer to the
/// dashboard's "priority tier" panel.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Standing {
    pub participant: ParticipantId,
    pub referral_code: String,
    pub referral_count: u32,
    /// Participants this one brought in, sorted by id.
    pub referees: Vec<ParticipantId>,
    pub weight: u64,
    pub progress: TierProgress,
}

/// Entry point for everything the surrounding application calls.
pub struct DrawService {
    referrals: Arc<Mutex<ReferralGraph>>,
    scheduler: DrawScheduler,
    store: Arc<dyn DrawStore>,
    clock: Arc<dyn Clock>,
}

impl DrawService {
    pub fn new(tiers: TierTable, collaborators: Collaborators) -> Self {
        let referrals = Arc::new(Mutex::new(ReferralGraph::new()));
        let gate = EligibilityGate::new(
            Arc::clone(&collaborators.payments),
            collaborators.eligibility_timeout,
        );
        let scheduler = DrawScheduler::new(
            Arc::clone(&referrals),
            tiers,
            gate,
            collaborators.seeds,
            Arc::clone(&collaborators.store),
            collaborators.notifier,
            Arc::clone(&collaborators.clock),
        );
        Self {
            referrals,
            scheduler,
            store: collaborators.store,
            clock: collaborators.clock,
        }
    }

    /// Build a service and replay everything its store already holds.
    pub fn restore(tiers: TierTable, collaborators: Collaborators) -> Result<Self, DrawError> {
        let service = Self::new(tiers, collaborators);
        let events = service.store.load()?;
        for (idx, event) in events.iter().enumerate() {
            service.replay(event).map_err(|err| {
                DrawError::Unavailable(format!(
                    "journal replay failed at entry {idx} ({}): {err}",
                    event.label()
                ))
            })?;
        }
        info!(events = events.len(), "draw state restored");
        Ok(service)
    }

    fn replay(&self, event: &DrawEvent) -> Result<(), DrawError> {
        match event {
            DrawEvent::ParticipantRegistered {
                participant,
                referral_code,
                referred_by,
                registered_at,
            } => {
                let mut graph = lock(&self.referrals, "referral graph")?;
                graph.register_participant(participant, referral_code, *registered_at)?;
                if let Some(referrer) = referred_by {
                    graph.register_edge(referrer, participant)?;
                }
                Ok(())
            }
            DrawEvent::ReferralLinked { referrer, referee } => {
                lock(&self.referrals, "referral graph")?.register_edge(referrer, referee)?;
                Ok(())
            }
            other => self.scheduler.replay(other),
        }
    }

    pub fn register_participant(&self, id: &str, referral_code: &str) -> Result<Participant, DrawError> {
        let mut graph = lock(&self.referrals, "referral graph")?;
        graph.validate_participant(id, referral_code)?;
        let registered_at = self.clock.now();
        self.store.append(&DrawEvent::ParticipantRegistered {
            participant: id.to_string(),
            referral_code: referral_code.to_string(),
            referred_by: None,
            registered_at,
        })?;
        let participant = graph.register_participant(id, referral_code, registered_at)?.clone();
        info!(participant = id, "participant registered");
        Ok(participant)
    }

    /// Register a participant who arrived through `referrer_code`'s link.
    pub fn register_with_code(
        &self,
        id: &str,
        referral_code: &str,
        referrer_code: &str,
    ) -> Result<ReferralEdge, DrawError> {
        let mut graph = lock(&self.referrals, "referral graph")?;
        let referrer = graph.validate_with_code(id, referral_code, referrer_code)?;
        let registered_at = self.clock.now();
        self.store.append(&DrawEvent::ParticipantRegistered {
            participant: id.to_string(),
            referral_code: referral_code.to_string(),
            referred_by: Some(referrer),
            registered_at,
        })?;
        let edge = graph.register_with_code(id, referral_code, referrer_code, registered_at)?;
        info!(participant = id, referrer = %edge.referrer, "participant registered by referral");
        Ok(edge)
    }

    /// Link two registered participants. Check and insert happen under one
    /// lock, so concurrent claims on the same referee have a single winner.
    pub fn register_edge(&self, referrer: &str, referee: &str) -> Result<ReferralEdge, DrawError> {
        let mut graph = lock(&self.referrals, "referral graph")?;
        graph.validate_edge(referrer, referee)?;
        self.store.append(&DrawEvent::ReferralLinked {
            referrer: referrer.to_string(),
            referee: referee.to_string(),
        })?;
        let edge = graph.register_edge(referrer, referee)?;
        info!(referrer, referee, count = graph.count_for(referrer), "referral linked");
        Ok(edge)
    }

    pub fn participant(&self, id: &str) -> Result<Participant, DrawError> {
        lock(&self.referrals, "referral graph")?
            .participant(id)
            .cloned()
            .ok_or_else(|| DrawError::UnknownParticipant {
                participant: id.to_string(),
            })
    }

    /// Every registered participant, sorted by id.
    pub fn participants(&self) -> Result<Vec<Participant>, DrawError> {
        Ok(lock(&self.referrals, "referral graph")?
            .participants()
            .cloned()
            .collect())
    }

    pub fn referral_count(&self, id: &str) -> Result<u32, DrawError> {
        let graph = lock(&self.referrals, "referral graph")?;
        if !graph.contains(id) {
            return Err(DrawError::UnknownParticipant {
                participant: id.to_string(),
            });
        }
        Ok(graph.count_for(id))
    }

    pub fn referral_link(&self, base_url: &str, id: &str) -> Result<String, DrawError> {
        let participant = self.participant(id)?;
        Ok(referral_link(base_url, &participant.referral_code))
    }

    pub fn tier_for(&self, referral_count: u32) -> Tier {
        self.scheduler.tiers().tier_for(referral_count).clone()
    }

    pub fn progress_to_next(&self, referral_count: u32) -> TierProgress {
        self.scheduler.tiers().progress_to_next(referral_count)
    }

    pub fn standing(&self, id: &str) -> Result<Standing, DrawError> {
        let graph = lock(&self.referrals, "referral graph")?;
        let participant = graph
            .participant(id)
            .ok_or_else(|| DrawError::UnknownParticipant {
                participant: id.to_string(),
            })?;
        let referral_count = graph.count_for(id);
        let tiers = self.scheduler.tiers();
        Ok(Standing {
            participant: participant.id.clone(),
            referral_code: participant.referral_code.clone(),
            referral_count,
            referees: graph.referees_of(id),
            weight: tiers.weight_for(referral_count),
            progress: tiers.progress_to_next(referral_count),
        })
    }

    pub fn tiers(&self) -> &TierTable {
        self.scheduler.tiers()
    }

    pub fn open_cycle(&self, id: &str, opens_at: u64, closes_at: u64) -> Result<DrawCycle, DrawError> {
        self.scheduler.open_cycle(id, opens_at, closes_at)
    }

    pub fn issue_ticket(&self, participant: &str, cycle: &str) -> Result<Ticket, DrawError> {
        self.scheduler.issue_ticket(participant, cycle)
    }

    pub fn lock_cycle(&self, cycle: &str) -> Result<DrawCycle, DrawError> {
        self.scheduler.lock_cycle(cycle)
    }

    pub fn lock_due_cycles(&self) -> Result<Vec<CycleId>, DrawError> {
        self.scheduler.lock_due_cycles()
    }

    pub fn close_cycle_with_winner(&self, cycle: &str) -> Result<DrawOutcome, DrawError> {
        self.scheduler.close_cycle_with_winner(cycle)
    }

    pub fn cycle(&self, cycle: &str) -> Result<DrawCycle, DrawError> {
        self.scheduler.cycle(cycle)
    }

    pub fn cycles(&self) -> Result<Vec<DrawCycle>, DrawError> {
        self.scheduler.cycles()
    }

    pub fn history_for(&self, participant: &str) -> Result<Vec<Participation>, DrawError> {
        self.scheduler.history_for(participant)
    }

    pub fn winners(&self) -> Result<Vec<Ticket>, DrawError> {
        self.scheduler.winners()
    }

    pub fn audit(&self, cycle: &str) -> Result<CycleAudit, DrawError> {
        self.scheduler.audit(cycle)
    }

    pub fn verify_draw(&self, cycle: &str) -> Result<bool, DrawError> {
        self.scheduler.verify_draw(cycle)
    }

    pub fn scheduler(&self) -> &DrawScheduler {
        &self.scheduler
    }
}
