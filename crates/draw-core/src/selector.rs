use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::cycle::{DrawSeed, Ticket};
use crate::error::DrawError;

/// Where draw seeds come from.
///
/// Production draws use [`OsSeedSource`]; tests and replays pin the seed
/// with [`FixedSeed`]. Either way the seed is journaled with the result so
/// the draw can be re-run later.
pub trait SeedSource: Send + Sync {
    fn next_seed(&self) -> DrawSeed;
}

/// Seeds from the operating system CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next_seed(&self) -> DrawSeed {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        DrawSeed(bytes)
    }
}

/// Always hands out the same seed.
#[derive(Clone, Copy, Debug)]
pub struct FixedSeed(pub DrawSeed);

impl FixedSeed {
    pub fn from_u64(value: u64) -> Self {
        Self(DrawSeed::from_u64(value))
    }
}

impl SeedSource for FixedSeed {
    fn next_seed(&self) -> DrawSeed {
        self.0
    }
}

/// Cumulative-weight partition over a cycle's tickets.
///
/// Tickets are ordered by `(issued_at, sequence)` so the partition, and
/// therefore the winner for a given seed, does not depend on the order the
/// caller passed them in.
pub struct WeightedSelector<'a> {
    tickets: Vec<&'a Ticket>,
    /// Exclusive upper bound of each ticket's range.
    bounds: Vec<u64>,
    total: u64,
}

impl<'a> WeightedSelector<'a> {
    pub fn new(cycle: &str, tickets: &'a [Ticket]) -> Result<Self, DrawError> {
        if tickets.is_empty() {
            return Err(DrawError::EmptyTicketPool {
                cycle: cycle.to_string(),
            });
        }
        let mut ordered: Vec<&Ticket> = tickets.iter().collect();
        ordered.sort_by_key(|t| (t.issued_at, t.sequence));

        let mut bounds = Vec::with_capacity(ordered.len());
        let mut total = 0u64;
        for ticket in &ordered {
            if ticket.weight == 0 {
                return Err(DrawError::InvalidWeight {
                    participant: ticket.participant.clone(),
                });
            }
            total = total
                .checked_add(ticket.weight)
                .ok_or_else(|| DrawError::InvalidWeight {
                    participant: ticket.participant.clone(),
                })?;
            bounds.push(total);
        }
        Ok(Self {
            tickets: ordered,
            bounds,
            total,
        })
    }

    pub fn total_weight(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Pick the ticket whose range contains a uniform draw from `[0, total)`.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &'a Ticket {
        let point = rng.gen_range(0..self.total);
        let idx = self.bounds.partition_point(|&upper| upper <= point);
        self.tickets[idx]
    }

    /// Run the draw for `seed`. Same seed and tickets, same winner.
    pub fn draw(&self, seed: &DrawSeed) -> &'a Ticket {
        self.select(&mut seed.rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ticket(participant: &str, weight: u64, issued_at: u64, sequence: u64) -> Ticket {
        Ticket {
            participant: participant.into(),
            cycle: "2024-08".into(),
            weight,
            issued_at,
            sequence,
        }
    }

    #[test]
    fn rejects_empty_pool_and_zero_weight() {
        assert!(matches!(
            WeightedSelector::new("2024-08", &[]),
            Err(DrawError::EmptyTicketPool { .. })
        ));
        let tickets = vec![ticket("a", 1, 0, 0), ticket("b", 0, 1, 1)];
        assert_eq!(
            WeightedSelector::new("2024-08", &tickets).err(),
            Some(DrawError::InvalidWeight {
                participant: "b".into()
            })
        );
    }

    #[test]
    fn partition_boundaries_map_to_tickets() {
        struct Fixed(u64);
        impl RngCore for Fixed {
            fn next_u32(&mut self) -> u32 {
                self.0 as u32
            }
            fn next_u64(&mut self) -> u64 {
                self.0
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                dest.fill(0);
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
                dest.fill(0);
                Ok(())
            }
        }

        // Passed out of order; issuance order is a(2) then b(1).
        let tickets = vec![ticket("b", 1, 20, 1), ticket("a", 2, 10, 0)];
        let selector = WeightedSelector::new("2024-08", &tickets).unwrap();
        assert_eq!(selector.total_weight(), 3);
        assert_eq!(selector.bounds, vec![2, 3]);
        // A zero draw lands in the first range.
        assert_eq!(selector.select(&mut Fixed(0)).participant, "a");
    }

    #[test]
    fn same_seed_same_winner() {
        let tickets: Vec<Ticket> = (0..50)
            .map(|i| ticket(&format!("p{i}"), 1 + i % 3, i, i))
            .collect();
        let selector = WeightedSelector::new("2024-08", &tickets).unwrap();
        let seed = DrawSeed::from_u64(202_408);
        let first = selector.draw(&seed).participant.clone();
        for _ in 0..10 {
            assert_eq!(selector.draw(&seed).participant, first);
        }

        let mut shuffled = tickets.clone();
        shuffled.reverse();
        let reordered = WeightedSelector::new("2024-08", &shuffled).unwrap();
        assert_eq!(reordered.draw(&seed).participant, first);
    }

    #[test]
    fn recorded_seeds_keep_their_winners() {
        // Fixed ChaCha20 output: seed 42 lands on point 1, seed 3 on point 2.
        let tickets = vec![ticket("alice", 2, 10, 0), ticket("bob", 1, 11, 1)];
        let selector = WeightedSelector::new("2024-08", &tickets).unwrap();
        assert_eq!(selector.draw(&DrawSeed::from_u64(42)).participant, "alice");
        assert_eq!(selector.draw(&DrawSeed::from_u64(3)).participant, "bob");
    }

    #[test]
    fn win_rates_follow_weights() {
        let tickets = vec![ticket("gold", 3, 0, 0), ticket("bronze", 1, 0, 1)];
        let selector = WeightedSelector::new("2024-08", &tickets).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let trials = 100_000;
        let gold_wins = (0..trials)
            .filter(|_| selector.select(&mut rng).participant == "gold")
            .count();
        // Expected 75_000 with a standard deviation of about 137.
        assert!(
            (73_500..=76_500).contains(&gold_wins),
            "gold won {gold_wins} of {trials}"
        );
        let ratio = gold_wins as f64 / (trials - gold_wins) as f64;
        assert!((ratio - 3.0).abs() < 0.25, "ratio {ratio}");
    }

    #[test]
    fn os_seeds_differ() {
        let source = OsSeedSource;
        assert_ne!(source.next_seed(), source.next_seed());
        assert_eq!(
            FixedSeed::from_u64(9).next_seed(),
            FixedSeed::from_u64(9).next_seed()
        );
    }

    proptest! {
        #[test]
        fn winner_comes_from_the_pool(
            weights in prop::collection::vec(1u64..50, 1..40),
            seed in any::<u64>(),
        ) {
            let tickets: Vec<Ticket> = weights
                .iter()
                .enumerate()
                .map(|(i, w)| ticket(&format!("p{i}"), *w, 0, i as u64))
                .collect();
            let selector = WeightedSelector::new("2024-08", &tickets).unwrap();
            prop_assert_eq!(selector.total_weight(), weights.iter().sum::<u64>());
            prop_assert_eq!(selector.bounds.last().copied(), Some(selector.total_weight()));

            let seed = DrawSeed::from_u64(seed);
            let winner = selector.draw(&seed);
            prop_assert!(tickets.contains(winner));
            prop_assert_eq!(selector.draw(&seed), winner);
        }
    }
}
