#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use draw_core::{
    CollaboratorError, Collaborators, DrawService, DrawStore, FixedSeed, ManualClock, MemorySink,
    MemoryStore, PaymentService, PaymentStatus, TierTable,
};

pub const AUGUST: &str = "2024-08";
pub const OPENS: u64 = 1_722_470_400;
pub const CLOSES: u64 = 1_725_148_800;

/// Payment service whose answers tests can flip.
#[derive(Default)]
pub struct Payments {
    statuses: Mutex<BTreeMap<(String, String), PaymentStatus>>,
}

impl Payments {
    pub fn set(&self, participant: &str, cycle: &str, status: PaymentStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert((participant.to_string(), cycle.to_string()), status);
    }
}

impl PaymentService for Payments {
    fn payment_status(&self, participant: &str, cycle: &str) -> Result<PaymentStatus, CollaboratorError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&(participant.to_string(), cycle.to_string()))
            .copied()
            .unwrap_or(PaymentStatus::Unpaid))
    }
}

pub struct Harness {
    pub service: DrawService,
    pub payments: Arc<Payments>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<MemorySink>,
    pub store: Arc<dyn DrawStore>,
}

pub fn collaborators(
    payments: Arc<Payments>,
    clock: Arc<ManualClock>,
    sink: Arc<MemorySink>,
    store: Arc<dyn DrawStore>,
    seed: u64,
) -> Collaborators {
    Collaborators::new(payments)
        .with_store(store)
        .with_notifier(sink)
        .with_seeds(Arc::new(FixedSeed::from_u64(seed)))
        .with_clock(clock)
        .with_eligibility_timeout(Duration::from_millis(500))
}

pub fn harness_with_store(store: Arc<dyn DrawStore>, seed: u64) -> Harness {
    let payments = Arc::new(Payments::default());
    let clock = Arc::new(ManualClock::new(OPENS + 60));
    let sink = Arc::new(MemorySink::new());
    let service = DrawService::new(
        TierTable::standard(),
        collaborators(
            Arc::clone(&payments),
            Arc::clone(&clock),
            Arc::clone(&sink),
            Arc::clone(&store),
            seed,
        ),
    );
    Harness {
        service,
        payments,
        clock,
        sink,
        store,
    }
}

pub fn harness(seed: u64) -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()), seed)
}

impl Harness {
    /// Register `id` and give them `referrals` direct referees.
    pub fn participant_with_referrals(&self, id: &str, referrals: usize) {
        self.service
            .register_participant(id, &format!("{id}-code"))
            .unwrap();
        for n in 0..referrals {
            self.service
                .register_with_code(
                    &format!("{id}-friend-{n}"),
                    &format!("{id}-friend-{n}-code"),
                    &format!("{id}-code"),
                )
                .unwrap();
        }
    }

    pub fn paid(&self, participant: &str, cycle: &str) {
        self.payments.set(participant, cycle, PaymentStatus::Paid);
    }
}
