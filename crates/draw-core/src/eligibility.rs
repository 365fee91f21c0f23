use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cycle::DrawCycle;
use crate::error::DrawError;

pub const DEFAULT_ELIGIBILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// Lookups that may still be running, timed out or not. A payment service
/// that never answers holds one helper thread per lookup, so past this many
/// the gate refuses new lookups instead of spawning more threads.
pub const MAX_PENDING_LOOKUPS: usize = 32;

/// Payment state of one participant for one cycle, owned by the payment
/// service.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payment service error: {0}")]
pub struct CollaboratorError(pub String);

/// Read-only view of the external payment service.
pub trait PaymentService: Send + Sync + 'static {
    fn payment_status(&self, participant: &str, cycle: &str) -> Result<PaymentStatus, CollaboratorError>;
}

enum LookupFailure {
    TimedOut,
    Failed(CollaboratorError),
}

/// Decides whether a participant may receive a ticket for a cycle.
///
/// Must be called with the cycle's lock held so the duplicate check and the
/// ticket append cannot interleave with another issuance.
#[derive(Clone)]
pub struct EligibilityGate {
    payments: Arc<dyn PaymentService>,
    timeout: Duration,
    pending: Arc<AtomicUsize>,
}

/// Counts one running lookup until dropped.
struct PendingLookup(Arc<AtomicUsize>);

impl Drop for PendingLookup {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl EligibilityGate {
    pub fn new(payments: Arc<dyn PaymentService>, timeout: Duration) -> Self {
        Self {
            payments,
            timeout,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Lookups whose helper thread has not finished yet.
    pub fn pending_lookups(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn check_eligibility(&self, participant: &str, cycle: &DrawCycle) -> Result<(), DrawError> {
        if cycle.holds_ticket(participant) {
            return Err(DrawError::AlreadyTicketed {
                participant: participant.to_string(),
                cycle: cycle.id.clone(),
            });
        }
        let not_paid = || DrawError::NotPaid {
            participant: participant.to_string(),
            cycle: cycle.id.clone(),
        };
        match self.lookup(participant, &cycle.id) {
            Ok(PaymentStatus::Paid) => Ok(()),
            Ok(status) => {
                debug!(participant, cycle = %cycle.id, ?status, "entry refused, payment not settled");
                Err(not_paid())
            }
            Err(LookupFailure::TimedOut) => {
                warn!(
                    participant,
                    cycle = %cycle.id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "payment lookup timed out, treating as unpaid"
                );
                Err(not_paid())
            }
            Err(LookupFailure::Failed(err)) => {
                warn!(participant, cycle = %cycle.id, error = %err, "payment lookup failed");
                Err(DrawError::Unavailable(err.to_string()))
            }
        }
    }

    /// Query the payment service on a helper thread, giving up after
    /// `timeout`. A lookup that outlives the timeout finishes in the
    /// background and its answer is discarded. At most
    /// [`MAX_PENDING_LOOKUPS`] helper threads exist at once.
    fn lookup(&self, participant: &str, cycle: &str) -> Result<PaymentStatus, LookupFailure> {
        if self.pending.fetch_add(1, Ordering::SeqCst) >= MAX_PENDING_LOOKUPS {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(LookupFailure::Failed(CollaboratorError(format!(
                "{MAX_PENDING_LOOKUPS} payment lookups still pending"
            ))));
        }
        let slot = PendingLookup(Arc::clone(&self.pending));

        let (tx, rx) = mpsc::sync_channel(1);
        let payments = Arc::clone(&self.payments);
        let (participant, cycle) = (participant.to_string(), cycle.to_string());
        thread::Builder::new()
            .name("payment-lookup".into())
            .spawn(move || {
                let _slot = slot;
                let _ = tx.send(payments.payment_status(&participant, &cycle));
            })
            .map_err(|e| LookupFailure::Failed(CollaboratorError(e.to_string())))?;
        match rx.recv_timeout(self.timeout) {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(err)) => Err(LookupFailure::Failed(err)),
            Err(RecvTimeoutError::Timeout) => Err(LookupFailure::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(LookupFailure::Failed(CollaboratorError(
                "payment lookup ended without an answer".into(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cycle::Ticket;

    struct Answer(Result<PaymentStatus, CollaboratorError>);

    impl PaymentService for Answer {
        fn payment_status(&self, _: &str, _: &str) -> Result<PaymentStatus, CollaboratorError> {
            self.0.clone()
        }
    }

    struct Slow;

    impl PaymentService for Slow {
        fn payment_status(&self, _: &str, _: &str) -> Result<PaymentStatus, CollaboratorError> {
            thread::sleep(Duration::from_millis(500));
            Ok(PaymentStatus::Paid)
        }
    }

    fn gate(service: impl PaymentService) -> EligibilityGate {
        EligibilityGate::new(Arc::new(service), Duration::from_millis(200))
    }

    #[test]
    fn only_paid_entries_pass() {
        let cycle = DrawCycle::new("2024-08", 0, 100);
        assert!(gate(Answer(Ok(PaymentStatus::Paid)))
            .check_eligibility("carol", &cycle)
            .is_ok());
        for status in [PaymentStatus::Unpaid, PaymentStatus::Pending] {
            let err = gate(Answer(Ok(status)))
                .check_eligibility("carol", &cycle)
                .unwrap_err();
            assert!(matches!(err, DrawError::NotPaid { .. }));
        }
    }

    #[test]
    fn existing_ticket_wins_over_payment_state() {
        let mut cycle = DrawCycle::new("2024-08", 0, 100);
        cycle.tickets.push(Ticket {
            participant: "carol".into(),
            cycle: "2024-08".into(),
            weight: 1,
            issued_at: 1,
            sequence: 0,
        });
        let err = gate(Answer(Ok(PaymentStatus::Paid)))
            .check_eligibility("carol", &cycle)
            .unwrap_err();
        assert!(matches!(err, DrawError::AlreadyTicketed { .. }));
    }

    #[test]
    fn timeout_fails_closed() {
        let cycle = DrawCycle::new("2024-08", 0, 100);
        let err = gate(Slow).check_eligibility("carol", &cycle).unwrap_err();
        assert!(matches!(err, DrawError::NotPaid { .. }));
    }

    #[test]
    fn hung_lookups_are_capped() {
        struct Hung(mpsc::Receiver<()>);

        // Holds every lookup until the test lets go of the sender.
        impl PaymentService for std::sync::Mutex<Hung> {
            fn payment_status(&self, _: &str, _: &str) -> Result<PaymentStatus, CollaboratorError> {
                let _ = self.lock().map(|hung| hung.0.recv());
                Ok(PaymentStatus::Paid)
            }
        }

        let (release, held) = mpsc::channel();
        let gate = EligibilityGate::new(
            Arc::new(std::sync::Mutex::new(Hung(held))),
            Duration::from_millis(5),
        );
        let cycle = DrawCycle::new("2024-08", 0, 100);
        for _ in 0..MAX_PENDING_LOOKUPS {
            let err = gate.check_eligibility("carol", &cycle).unwrap_err();
            assert!(matches!(err, DrawError::NotPaid { .. }));
        }
        assert_eq!(gate.pending_lookups(), MAX_PENDING_LOOKUPS);

        let err = gate.check_eligibility("carol", &cycle).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(gate.pending_lookups(), MAX_PENDING_LOOKUPS);

        drop(release);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while gate.pending_lookups() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(gate.pending_lookups(), 0);
    }

    #[test]
    fn collaborator_error_is_unavailable() {
        let cycle = DrawCycle::new("2024-08", 0, 100);
        let err = gate(Answer(Err(CollaboratorError("gateway down".into()))))
            .check_eligibility("carol", &cycle)
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
