use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use referral_module::{ReferralGraph, TierTable};
use tracing::{debug, info};

use crate::audit::{self, CycleAudit};
use crate::clock::Clock;
use crate::cycle::{CycleId, CycleState, DrawCycle, DrawOutcome, Participation, Ticket};
use crate::eligibility::EligibilityGate;
use crate::error::DrawError;
use crate::notify::{dispatch, Notification, NotificationSink, Outcome};
use crate::selector::{SeedSource, WeightedSelector};
use crate::store::{DrawEvent, DrawStore};

type CycleHandle = Arc<Mutex<DrawCycle>>;

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, DrawError> {
    mutex
        .lock()
        .map_err(|_| DrawError::Unavailable(format!("{what} lock poisoned")))
}

/// Owns every draw cycle and serializes work on each one.
///
/// Each cycle sits behind its own mutex. Issuance, locking and drawing all
/// run with that mutex held, so the eligibility check, the weight
/// computation and the ticket append form one critical section, and state
/// transitions only succeed from the state they expect. The referral graph
/// lock is always taken after a cycle lock, never before.
pub struct DrawScheduler {
    cycles: RwLock<BTreeMap<CycleId, CycleHandle>>,
    referrals: Arc<Mutex<ReferralGraph>>,
    tiers: TierTable,
    gate: EligibilityGate,
    seeds: Arc<dyn SeedSource>,
    store: Arc<dyn DrawStore>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl DrawScheduler {
    pub fn new(
        referrals: Arc<Mutex<ReferralGraph>>,
        tiers: TierTable,
        gate: EligibilityGate,
        seeds: Arc<dyn SeedSource>,
        store: Arc<dyn DrawStore>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cycles: RwLock::new(BTreeMap::new()),
            referrals,
            tiers,
            gate,
            seeds,
            store,
            notifier,
            clock,
        }
    }

    fn handle(&self, id: &str) -> Result<CycleHandle, DrawError> {
        let cycles = self
            .cycles
            .read()
            .map_err(|_| DrawError::Unavailable("cycle index lock poisoned".into()))?;
        cycles
            .get(id)
            .cloned()
            .ok_or_else(|| DrawError::UnknownCycle {
                cycle: id.to_string(),
            })
    }

    fn handles(&self) -> Result<Vec<CycleHandle>, DrawError> {
        let cycles = self
            .cycles
            .read()
            .map_err(|_| DrawError::Unavailable("cycle index lock poisoned".into()))?;
        Ok(cycles.values().cloned().collect())
    }

    pub fn open_cycle(&self, id: &str, opens_at: u64, closes_at: u64) -> Result<DrawCycle, DrawError> {
        if id.trim().is_empty() {
            return Err(DrawError::InvalidCycleId("cycle id is empty"));
        }
        if closes_at <= opens_at {
            return Err(DrawError::InvalidWindow {
                opens_at,
                closes_at,
            });
        }
        let mut cycles = self
            .cycles
            .write()
            .map_err(|_| DrawError::Unavailable("cycle index lock poisoned".into()))?;
        if cycles.contains_key(id) {
            return Err(DrawError::DuplicateCycle {
                cycle: id.to_string(),
            });
        }
        self.store.append(&DrawEvent::CycleOpened {
            cycle: id.to_string(),
            opens_at,
            closes_at,
        })?;
        let cycle = DrawCycle::new(id, opens_at, closes_at);
        cycles.insert(id.to_string(), Arc::new(Mutex::new(cycle.clone())));
        info!(cycle = id, opens_at, closes_at, "draw cycle opened");
        Ok(cycle)
    }

    /// Issue `participant` a ticket for `cycle_id`.
    ///
    /// A cycle whose window has passed is locked here and the entry refused.
    pub fn issue_ticket(&self, participant: &str, cycle_id: &str) -> Result<Ticket, DrawError> {
        let handle = self.handle(cycle_id)?;
        let mut cycle = lock(&handle, "cycle")?;
        let now = self.clock.now();
        if cycle.is_due(now) {
            self.commit_lock(&mut cycle, now)?;
        }
        if !cycle.accepts_entries_at(now) {
            return Err(DrawError::CycleNotOpen {
                cycle: cycle_id.to_string(),
            });
        }
        if !lock(&self.referrals, "referral graph")?.contains(participant) {
            return Err(DrawError::UnknownParticipant {
                participant: participant.to_string(),
            });
        }

        self.gate.check_eligibility(participant, &cycle)?;

        let referral_count = lock(&self.referrals, "referral graph")?.count_for(participant);
        let weight = self.tiers.weight_for(referral_count);
        let ticket = Ticket {
            participant: participant.to_string(),
            cycle: cycle_id.to_string(),
            weight,
            issued_at: now,
            sequence: cycle.tickets.len() as u64,
        };
        self.store.append(&DrawEvent::TicketIssued {
            ticket: ticket.clone(),
        })?;
        cycle.tickets.push(ticket.clone());
        drop(cycle);

        info!(
            cycle = cycle_id,
            participant,
            weight,
            referral_count,
            tier = %self.tiers.tier_for(referral_count).name,
            "ticket issued"
        );
        dispatch(
            self.notifier.as_ref(),
            Notification {
                participant: participant.to_string(),
                cycle: cycle_id.to_string(),
                outcome: Outcome::TicketIssued { weight },
            },
        );
        Ok(ticket)
    }

    /// Open → Locked. Fails with `CycleNotOpen` from any other state.
    fn commit_lock(&self, cycle: &mut DrawCycle, at: u64) -> Result<(), DrawError> {
        if cycle.state != CycleState::Open {
            return Err(DrawError::CycleNotOpen {
                cycle: cycle.id.clone(),
            });
        }
        self.store.append(&DrawEvent::CycleLocked {
            cycle: cycle.id.clone(),
            at,
        })?;
        cycle.state = CycleState::Locked;
        info!(cycle = %cycle.id, tickets = cycle.tickets.len(), "draw cycle locked");
        Ok(())
    }

    pub fn lock_cycle(&self, cycle_id: &str) -> Result<DrawCycle, DrawError> {
        let handle = self.handle(cycle_id)?;
        let mut cycle = lock(&handle, "cycle")?;
        self.commit_lock(&mut cycle, self.clock.now())?;
        Ok(cycle.clone())
    }

    /// Lock every open cycle whose window has closed. Returns their ids.
    pub fn lock_due_cycles(&self) -> Result<Vec<CycleId>, DrawError> {
        let now = self.clock.now();
        let mut locked = Vec::new();
        for handle in self.handles()? {
            let mut cycle = lock(&handle, "cycle")?;
            if cycle.is_due(now) {
                self.commit_lock(&mut cycle, now)?;
                locked.push(cycle.id.clone());
            }
        }
        Ok(locked)
    }

    /// Draw the winner of a locked cycle and commit it.
    ///
    /// A cycle without tickets still moves to Drawn, with no winner, and the
    /// call reports `EmptyTicketPool`. A committed result is final.
    pub fn close_cycle_with_winner(&self, cycle_id: &str) -> Result<DrawOutcome, DrawError> {
        let handle = self.handle(cycle_id)?;
        let mut cycle = lock(&handle, "cycle")?;
        match cycle.state {
            CycleState::Open => {
                return Err(DrawError::CycleNotLocked {
                    cycle: cycle_id.to_string(),
                })
            }
            CycleState::Drawn => {
                return Err(DrawError::AlreadyDrawn {
                    cycle: cycle_id.to_string(),
                })
            }
            CycleState::Locked => {}
        }
        let now = self.clock.now();

        if cycle.tickets.is_empty() {
            self.store.append(&DrawEvent::CycleDrawn {
                cycle: cycle_id.to_string(),
                winner: None,
                seed: None,
                at: now,
            })?;
            cycle.state = CycleState::Drawn;
            info!(cycle = cycle_id, "draw cycle closed without tickets");
            return Err(DrawError::EmptyTicketPool {
                cycle: cycle_id.to_string(),
            });
        }

        let seed = self.seeds.next_seed();
        let (winner, total_weight) = {
            let selector = WeightedSelector::new(cycle_id, &cycle.tickets)?;
            (selector.draw(&seed).clone(), selector.total_weight())
        };
        self.store.append(&DrawEvent::CycleDrawn {
            cycle: cycle_id.to_string(),
            winner: Some(winner.clone()),
            seed: Some(seed),
            at: now,
        })?;
        cycle.state = CycleState::Drawn;
        cycle.winner = Some(winner.clone());
        cycle.seed = Some(seed);
        let holders: Vec<String> = cycle.tickets.iter().map(|t| t.participant.clone()).collect();
        let ticket_count = holders.len();
        drop(cycle);

        info!(
            cycle = cycle_id,
            winner = %winner.participant,
            weight = winner.weight,
            total_weight,
            tickets = ticket_count,
            seed = %seed.to_hex(),
            "draw committed"
        );
        for participant in holders {
            let outcome = if participant == winner.participant {
                Outcome::Won
            } else {
                Outcome::NotSelected
            };
            dispatch(
                self.notifier.as_ref(),
                Notification {
                    participant,
                    cycle: cycle_id.to_string(),
                    outcome,
                },
            );
        }

        Ok(DrawOutcome {
            cycle: cycle_id.to_string(),
            winner,
            seed,
            total_weight,
            ticket_count,
        })
    }

    /// Apply a journaled cycle event without journaling or notifying again.
    pub(crate) fn replay(&self, event: &DrawEvent) -> Result<(), DrawError> {
        match event {
            DrawEvent::CycleOpened {
                cycle,
                opens_at,
                closes_at,
            } => {
                let mut cycles = self
                    .cycles
                    .write()
                    .map_err(|_| DrawError::Unavailable("cycle index lock poisoned".into()))?;
                if cycles.contains_key(cycle) {
                    return Err(DrawError::DuplicateCycle {
                        cycle: cycle.clone(),
                    });
                }
                cycles.insert(
                    cycle.clone(),
                    Arc::new(Mutex::new(DrawCycle::new(cycle, *opens_at, *closes_at))),
                );
            }
            DrawEvent::TicketIssued { ticket } => {
                let handle = self.handle(&ticket.cycle)?;
                let mut cycle = lock(&handle, "cycle")?;
                if cycle.state != CycleState::Open {
                    return Err(DrawError::CycleNotOpen {
                        cycle: ticket.cycle.clone(),
                    });
                }
                if cycle.holds_ticket(&ticket.participant) {
                    return Err(DrawError::AlreadyTicketed {
                        participant: ticket.participant.clone(),
                        cycle: ticket.cycle.clone(),
                    });
                }
                cycle.tickets.push(ticket.clone());
            }
            DrawEvent::CycleLocked { cycle: id, .. } => {
                let handle = self.handle(id)?;
                let mut cycle = lock(&handle, "cycle")?;
                if cycle.state != CycleState::Open {
                    return Err(DrawError::CycleNotOpen { cycle: id.clone() });
                }
                cycle.state = CycleState::Locked;
            }
            DrawEvent::CycleDrawn {
                cycle: id,
                winner,
                seed,
                ..
            } => {
                let handle = self.handle(id)?;
                let mut cycle = lock(&handle, "cycle")?;
                match cycle.state {
                    CycleState::Open => return Err(DrawError::CycleNotLocked { cycle: id.clone() }),
                    CycleState::Drawn => return Err(DrawError::AlreadyDrawn { cycle: id.clone() }),
                    CycleState::Locked => {}
                }
                cycle.state = CycleState::Drawn;
                cycle.winner = winner.clone();
                cycle.seed = *seed;
            }
            DrawEvent::ParticipantRegistered { .. } | DrawEvent::ReferralLinked { .. } => {
                debug!(event = event.label(), "not a cycle event, skipped");
            }
        }
        Ok(())
    }

    pub fn cycle(&self, cycle_id: &str) -> Result<DrawCycle, DrawError> {
        let handle = self.handle(cycle_id)?;
        let cycle = lock(&handle, "cycle")?;
        Ok(cycle.clone())
    }

    /// Snapshot of every cycle, ordered by id.
    pub fn cycles(&self) -> Result<Vec<DrawCycle>, DrawError> {
        self.handles()?
            .iter()
            .map(|handle| lock(handle, "cycle").map(|c| c.clone()))
            .collect()
    }

    /// Every cycle `participant` holds a ticket in, most recent first.
    pub fn history_for(&self, participant: &str) -> Result<Vec<Participation>, DrawError> {
        let mut history: Vec<Participation> = self
            .cycles()?
            .iter()
            .filter_map(|cycle| {
                cycle
                    .ticket_for(participant)
                    .map(|ticket| Participation::from_cycle(cycle, ticket))
            })
            .collect();
        history.reverse();
        Ok(history)
    }

    /// Winning tickets of all drawn cycles, ordered by cycle id.
    pub fn winners(&self) -> Result<Vec<Ticket>, DrawError> {
        Ok(self
            .cycles()?
            .into_iter()
            .filter_map(|cycle| cycle.winner)
            .collect())
    }

    pub fn audit(&self, cycle_id: &str) -> Result<CycleAudit, DrawError> {
        Ok(CycleAudit::of(&self.cycle(cycle_id)?))
    }

    /// Re-run a drawn cycle from its journaled seed.
    pub fn verify_draw(&self, cycle_id: &str) -> Result<bool, DrawError> {
        audit::verify_draw(&self.cycle(cycle_id)?)
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }
}
