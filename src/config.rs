//! Controller and blockchain configuration.
//!
//! `ControllerConfiguration` is a plain, `Default`-implementing,
//! serde-deserializable settings struct loaded once at startup.
//! `BlockchainConfiguration` is the subset of those settings that lives
//! *inside* consensus (mutated only by producer vote, not by the node
//! operator) and therefore must be replicated in the object store rather
//! than read from a local file.

use serde::{Deserialize, Serialize};

/// Node-local settings: everything that is safe to differ between honest
/// peers because it never affects which blocks are valid.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfiguration {
    /// Seconds between consecutive slots.
    pub block_interval_secs: u64,
    /// Number of producers in a round.
    pub producer_count: usize,
    /// Numerator of the irreversibility fraction (default 2).
    pub irreversibility_numerator: u64,
    /// Denominator of the irreversibility fraction (default 3); the
    /// last-irreversible block requires `numerator/denominator + 1` of
    /// `producer_count` to have confirmed it.
    pub irreversibility_denominator: u64,
    /// Default skip-flags applied when none are supplied explicitly.
    pub default_skip_flags: u32,
    /// Soft cap, in bytes, on a locally generated block.
    pub max_block_size_bytes: u32,
    /// Width, in slots, of the rolling participation window.
    pub participation_window: usize,
    /// Scope used when a native handler is registered without specifying
    /// one explicitly. Surfaces the "should we be setting `o.base_scope`"
    /// open question from the original source as an explicit default:
    /// handlers that want per-message scoping must set it themselves.
    pub default_handler_base_scope: String,
}

impl Default for ControllerConfiguration {
    fn default() -> Self {
        Self {
            block_interval_secs: 3,
            producer_count: 21,
            irreversibility_numerator: 2,
            irreversibility_denominator: 3,
            default_skip_flags: 0,
            max_block_size_bytes: 1024 * 1024,
            participation_window: 128,
            default_handler_base_scope: String::new(),
        }
    }
}

impl ControllerConfiguration {
    /// Number of producer confirmations required to advance
    /// last-irreversible, i.e. `2/3 + 1` of the active round by default.
    pub fn irreversibility_threshold(&self) -> usize {
        let n = self.producer_count as u64;
        let threshold = (n * self.irreversibility_numerator) / self.irreversibility_denominator;
        (threshold + 1) as usize
    }
}

/// Consensus-visible static properties, mutated only by
/// `update_blockchain_configuration` as the median of producer votes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BlockchainConfiguration {
    pub max_transaction_lifetime_secs: u64,
    pub max_block_size_bytes: u32,
    pub max_transactions_per_block: u32,
}

impl Default for BlockchainConfiguration {
    fn default() -> Self {
        Self {
            max_transaction_lifetime_secs: 60 * 60,
            max_block_size_bytes: 1024 * 1024,
            max_transactions_per_block: 10_000,
        }
    }
}

impl BlockchainConfiguration {
    /// Recomputes static properties as the median of producer-submitted
    /// votes. Producers that haven't voted are excluded; an empty vote set
    /// leaves the configuration unchanged.
    pub fn update_from_votes(&mut self, votes: &[BlockchainConfiguration]) {
        if votes.is_empty() {
            return;
        }
        self.max_transaction_lifetime_secs =
            median(votes.iter().map(|v| v.max_transaction_lifetime_secs));
        self.max_block_size_bytes = median(votes.iter().map(|v| v.max_block_size_bytes as u64)) as u32;
        self.max_transactions_per_block =
            median(votes.iter().map(|v| v.max_transactions_per_block as u64)) as u32;
    }
}

fn median(values: impl Iterator<Item = u64>) -> u64 {
    let mut values: Vec<u64> = values.collect();
    values.sort_unstable();
    values[values.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irreversibility_threshold_is_two_thirds_plus_one() {
        let cfg = ControllerConfiguration {
            producer_count: 21,
            ..Default::default()
        };
        assert_eq!(cfg.irreversibility_threshold(), 15);
    }

    #[test]
    fn median_vote_picks_middle_value() {
        let mut cfg = BlockchainConfiguration::default();
        let votes = vec![
            BlockchainConfiguration {
                max_transaction_lifetime_secs: 10,
                ..Default::default()
            },
            BlockchainConfiguration {
                max_transaction_lifetime_secs: 20,
                ..Default::default()
            },
            BlockchainConfiguration {
                max_transaction_lifetime_secs: 30,
                ..Default::default()
            },
        ];
        cfg.update_from_votes(&votes);
        assert_eq!(cfg.max_transaction_lifetime_secs, 20);
    }

    #[test]
    fn empty_votes_leave_configuration_unchanged() {
        let mut cfg = BlockchainConfiguration::default();
        let before = cfg.clone();
        cfg.update_from_votes(&[]);
        assert_eq!(cfg, before);
    }
}
