//! Weighted queue ordering for each lease.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};

use super::config::QueueWeight;
use crate::domain::QueueName;

/// Decides in which order a worker asks the broker for queues.
///
/// Weighted mode samples queues without replacement, each pick proportional
/// to the remaining weights. The chance that a queue comes first is
/// `weight / total`, and every queue appears in every order, so none is
/// starved. Cost depends on the number of queues, not on the weights.
#[derive(Debug, Clone)]
pub struct QueueSelector {
    weights: Vec<QueueWeight>,
    strict: bool,
}

impl QueueSelector {
    pub fn new(weights: &[QueueWeight], strict: bool) -> Self {
        let mut weights: Vec<QueueWeight> =
            weights.iter().copied().filter(|qw| qw.weight > 0).collect();
        if strict {
            weights.sort_by(|a, b| b.weight.cmp(&a.weight));
        }
        Self { weights, strict }
    }

    pub fn order<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<QueueName> {
        if self.strict {
            return self.weights.iter().map(|qw| qw.queue).collect();
        }

        let mut remaining = self.weights.clone();
        let mut order = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            // u64 so that several u32::MAX weights cannot overflow the sum
            let Ok(dist) = WeightedIndex::new(remaining.iter().map(|qw| u64::from(qw.weight)))
            else {
                break;
            };
            order.push(remaining.swap_remove(dist.sample(rng)).queue);
        }
        order
    }
}
