//! Randomized join/leave/accept/reply interleavings.
//!
//! As long as the group never empties, every accepted connection must end up
//! with exactly one worker and none may be closed by the coordinator.

use std::collections::HashMap;

use handoff_core::WorkerId;

use crate::testutil::{Harness, Offer};

/// Small deterministic generator so failures replay by seed.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

async fn run(seed: u64, steps: usize) {
    let mut rng = Lcg(seed);
    let mut h = Harness::new();
    let mut members: Vec<u32> = vec![1];
    let mut next_handle = 0u32;
    let mut open: Vec<Offer> = Vec::new();
    let mut delivered: HashMap<u32, usize> = HashMap::new();

    let _ack = h.join(1);
    h.settle().await;

    for _ in 0..steps {
        match rng.below(6) {
            0 => {
                let id = 1 + rng.below(5) as u32;
                if !members.contains(&id) {
                    let _ack = h.join(id);
                    members.push(id);
                }
            }
            1 if members.len() > 1 => {
                let idx = rng.below(members.len() as u64) as usize;
                let id = members.swap_remove(idx);
                assert!(h.dist.leave(WorkerId(id)).removed());
            }
            2 | 3 => {
                next_handle += 1;
                h.accept(next_handle);
            }
            _ if !open.is_empty() => {
                let idx = rng.below(open.len() as u64) as usize;
                let offer = open.swap_remove(idx);
                if rng.below(4) == 0 {
                    offer.refuse();
                } else {
                    *delivered.entry(offer.handle_id()).or_insert(0) += 1;
                    offer.accept();
                }
            }
            _ => {}
        }
        open.extend(h.offers.take());
        h.settle().await;
        open.extend(h.offers.take());
    }

    // Accept everything until the queue is empty and nothing is in flight.
    for _ in 0..10_000 {
        open.extend(h.offers.take());
        if open.is_empty() && h.dist.stats().pending == 0 {
            break;
        }
        for offer in open.drain(..) {
            *delivered.entry(offer.handle_id()).or_insert(0) += 1;
            offer.accept();
        }
        h.settle().await;
    }

    assert!(open.is_empty(), "seed {seed}: offers still in flight");
    assert_eq!(h.dist.stats().pending, 0, "seed {seed}: connections stuck");
    for id in 1..=next_handle {
        assert_eq!(
            delivered.get(&id).copied().unwrap_or(0),
            1,
            "seed {seed}: connection {id} delivered wrong number of times"
        );
        assert_eq!(h.ledger.closes(id), 0, "seed {seed}: connection {id} closed");
    }
}

#[tokio::test]
async fn no_loss_no_duplication_under_interleavings() {
    for seed in 1..=40 {
        run(seed, 200).await;
    }
}

#[tokio::test]
async fn single_worker_long_run() {
    let mut h = Harness::new();
    let _ack = h.join(1);
    h.settle().await;

    for c in 1..=50 {
        h.accept(c);
    }
    for expected in 1..=50 {
        let mut offers = h.offers.take();
        assert_eq!(offers.len(), 1);
        let offer = offers.pop().unwrap();
        assert_eq!(offer.handle_id(), expected);
        offer.accept();
        h.settle().await;
    }
    assert_eq!(h.dist.free_workers(), vec![WorkerId(1)]);
}
