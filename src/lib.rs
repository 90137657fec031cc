//! A delegated-proof-of-stake chain controller core: slot scheduling, fork
//! selection, transaction validation, and the single-writer block applier
//! that ties them together behind [`controller::Controller`].
//!
//! Networking, wallets, the production object store, and the RPC surface
//! are all external collaborators — this crate owns only the deterministic
//! state machine: given a set of blocks and transactions, what is the
//! canonical chain, and what does the ledger look like at its head.

pub mod applier;
pub mod block;
pub mod blocklog;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod event;
pub mod fork;
pub mod genesis;
pub mod queue;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod time;
pub mod tx;
pub mod validation;

/// The commonly-needed types, re-exported for `use chain_core::prelude::*;`.
pub mod prelude {
    pub use crate::block::{BlockBuilder, BlockHeader, SignedBlock};
    pub use crate::config::{BlockchainConfiguration, ControllerConfiguration};
    pub use crate::controller::Controller;
    pub use crate::crypto::{Hash, PublicKey, Signature};
    pub use crate::error::{ChainError, Result};
    pub use crate::genesis::{ChainInitializer, RawGenesis, RawGenesisBuilder};
    pub use crate::registry::HandlerRegistry;
    pub use crate::store::{Account, Authority, Ledger};
    pub use crate::tx::{Message, SignedTransaction, TransactionBody};
}
