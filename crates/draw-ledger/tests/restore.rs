use std::sync::Arc;

use draw_core::{
    CollaboratorError, Collaborators, DrawError, DrawService, DrawStore, FixedSeed, ManualClock,
    PaymentService, PaymentStatus, TierTable,
};
use draw_ledger::FileJournal;

struct EveryonePaid;

impl PaymentService for EveryonePaid {
    fn payment_status(&self, _: &str, _: &str) -> Result<PaymentStatus, CollaboratorError> {
        Ok(PaymentStatus::Paid)
    }
}

fn service_on(journal: Arc<FileJournal>, clock: Arc<ManualClock>) -> DrawService {
    let collaborators = Collaborators::new(Arc::new(EveryonePaid))
        .with_store(journal)
        .with_seeds(Arc::new(FixedSeed::from_u64(31)))
        .with_clock(clock);
    DrawService::restore(TierTable::standard(), collaborators).unwrap()
}

#[test]
fn service_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("draw.jsonl");
    let clock = Arc::new(ManualClock::new(50));

    let outcome = {
        let service = service_on(Arc::new(FileJournal::open(&path).unwrap()), Arc::clone(&clock));
        service.register_participant("alice", "ALICE").unwrap();
        for n in 0..5 {
            service
                .register_with_code(&format!("f{n}"), &format!("F{n}"), "ALICE")
                .unwrap();
        }
        service.open_cycle("2024-08", 0, 100).unwrap();
        service.open_cycle("2024-09", 100, 200).unwrap();
        service.issue_ticket("alice", "2024-08").unwrap();
        service.issue_ticket("f0", "2024-08").unwrap();
        clock.set(100);
        service.lock_due_cycles().unwrap();
        service.close_cycle_with_winner("2024-08").unwrap()
    };

    let journal = Arc::new(FileJournal::open(&path).unwrap());
    assert_eq!(journal.head().unwrap().len, journal.load().unwrap().len() as u64);
    let service = service_on(journal, clock);
    assert_eq!(service.referral_count("alice").unwrap(), 5);
    assert_eq!(service.standing("alice").unwrap().weight, 2);
    assert_eq!(service.winners().unwrap(), vec![outcome.winner]);
    assert!(service.verify_draw("2024-08").unwrap());

    // The September cycle keeps accepting entries after the restart.
    let ticket = service.issue_ticket("f1", "2024-09").unwrap();
    assert_eq!(ticket.sequence, 0);
    assert!(service.issue_ticket("f1", "2024-09").is_err());
}

#[test]
fn separate_handles_on_one_journal_issue_one_ticket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("draw.jsonl");
    let clock = Arc::new(ManualClock::new(50));
    {
        let service = service_on(Arc::new(FileJournal::open(&path).unwrap()), Arc::clone(&clock));
        service.register_participant("carol", "CAROL").unwrap();
        service.open_cycle("2024-08", 0, 100).unwrap();
    }

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (path, clock) = (&path, &clock);
                s.spawn(move || {
                    let journal = Arc::new(FileJournal::open_waiting(path).unwrap());
                    service_on(journal, Arc::clone(clock)).issue_ticket("carol", "2024-08")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(DrawError::AlreadyTicketed { .. }))));

    let service = service_on(Arc::new(FileJournal::open(&path).unwrap()), clock);
    assert_eq!(service.cycle("2024-08").unwrap().tickets.len(), 1);
}
