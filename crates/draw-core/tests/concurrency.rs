mod common;

use std::sync::Barrier;
use std::thread;

use common::*;
use draw_core::{DrawError, ReferralError};

const THREADS: usize = 8;

#[test]
fn racing_entries_issue_exactly_one_ticket() {
    let h = harness(1);
    h.participant_with_referrals("alice", 0);
    h.service.open_cycle(AUGUST, OPENS, CLOSES).unwrap();
    h.paid("alice", AUGUST);

    let barrier = Barrier::new(THREADS);
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let (h, barrier) = (&h, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    h.service.issue_ticket("alice", AUGUST)
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, DrawError::AlreadyTicketed { .. })));
    assert_eq!(h.service.cycle(AUGUST).unwrap().tickets.len(), 1);
}

#[test]
fn racing_referral_claims_have_one_winner() {
    let h = harness(1);
    for n in 0..THREADS {
        h.participant_with_referrals(&format!("referrer-{n}"), 0);
    }
    h.participant_with_referrals("newcomer", 0);

    let barrier = Barrier::new(THREADS);
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|n| {
                let (h, barrier) = (&h, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    h.service.register_edge(&format!("referrer-{n}"), "newcomer")
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
        e,
        DrawError::Referral(ReferralError::AlreadyReferred { .. })
    )));
    let total: u32 = (0..THREADS)
        .map(|n| h.service.referral_count(&format!("referrer-{n}")).unwrap())
        .sum();
    assert_eq!(total, 1);
}

#[test]
fn entries_racing_the_lock_never_land_after_it() {
    let h = harness(1);
    let ids: Vec<String> = (0..THREADS).map(|n| format!("p{n}")).collect();
    for id in &ids {
        h.participant_with_referrals(id, 0);
        h.paid(id, AUGUST);
    }
    h.service.open_cycle(AUGUST, OPENS, CLOSES).unwrap();

    let barrier = Barrier::new(THREADS + 1);
    let (issued, locked) = thread::scope(|s| {
        let entries: Vec<_> = ids
            .iter()
            .map(|id| {
                let (h, barrier) = (&h, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    h.service.issue_ticket(id, AUGUST)
                })
            })
            .collect();
        let locker = s.spawn(|| {
            barrier.wait();
            h.service.lock_cycle(AUGUST)
        });
        let issued: Vec<_> = entries.into_iter().map(|t| t.join().unwrap()).collect();
        (issued, locker.join().unwrap().unwrap())
    });

    let accepted = issued.iter().filter(|r| r.is_ok()).count();
    assert!(issued
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, DrawError::CycleNotOpen { .. })));
    let final_cycle = h.service.cycle(AUGUST).unwrap();
    assert_eq!(final_cycle.tickets.len(), accepted);
    assert_eq!(locked.tickets.len(), accepted);
}
