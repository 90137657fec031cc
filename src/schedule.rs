//! Producer schedule: the ordered ring of accounts entitled to produce in
//! the current round, and deterministic round-boundary reshuffling.
//!
//! The reshuffle sorts candidates into a canonical order, seeds a `StdRng`
//! from a block id, and shuffles. Determinism only requires that every
//! honest node computes the same seed from the same block id, which a
//! content hash guarantees.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::crypto::Hash;

/// Sentinel returned by [`ProducerSchedule::get_scheduled_producer`] for
/// `slot_num == 0`, which designates no producer.
pub const NULL_PRODUCER: &str = "";

/// The active round: an ordered list of producer account names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProducerSchedule {
    round: Vec<String>,
}

impl ProducerSchedule {
    pub fn new(round: Vec<String>) -> Self {
        Self { round }
    }

    pub fn len(&self) -> usize {
        self.round.len()
    }

    pub fn is_empty(&self) -> bool {
        self.round.is_empty()
    }

    pub fn round(&self) -> &[String] {
        &self.round
    }

    /// The account scheduled to produce `slot_num`. `slot_num == 0` or an
    /// empty round both yield [`NULL_PRODUCER`].
    pub fn get_scheduled_producer(&self, slot_num: u64) -> &str {
        if slot_num == 0 || self.round.is_empty() {
            return NULL_PRODUCER;
        }
        let idx = ((slot_num - 1) as usize) % self.round.len();
        &self.round[idx]
    }

    /// Recomputes the active round from the top-voted producer accounts
    /// (already ranked by vote weight, most votes first, by the caller) and
    /// deterministically reshuffles by a seed derived from `last_block_id`,
    /// the id of the final block of the prior round.
    pub fn update(top_voted: &[String], producer_count: usize, last_block_id: Hash) -> Self {
        let mut candidates: Vec<String> = top_voted.iter().take(producer_count).cloned().collect();
        candidates.sort();

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&last_block_id.0);
        let mut rng = StdRng::from_seed(seed);
        candidates.shuffle(&mut rng);

        ProducerSchedule::new(candidates)
    }
}
