//! The closed error surface returned by public controller operations.
//!
//! Internal helpers are free to build up context with [`eyre::Result`] and
//! `.wrap_err(..)` the way the rest of this crate family does; at the point
//! a failure crosses a public boundary (header validation, a session
//! commit/rollback edge, a façade entry point) it is narrowed down to one of
//! the variants below so callers get a stable, matchable error kind plus the
//! offending id.

use thiserror::Error;

use crate::crypto::Hash;

/// Every error kind the controller can report, carrying the id of the
/// offending block or transaction where one exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("block {id} has an invalid header: {reason}")]
    InvalidBlockHeader { id: Hash, reason: String },

    #[error("block {id} references unknown parent {parent}")]
    UnknownParent { id: Hash, parent: Hash },

    #[error("signature on {id} does not verify")]
    BadSignature { id: Hash },

    #[error("block {id} was produced by the wrong producer for its slot")]
    WrongProducer { id: Hash },

    #[error("block {id} has a bad timestamp")]
    BadTimestamp { id: Hash },

    #[error("block {id} transaction merkle root does not match header")]
    MerkleMismatch { id: Hash },

    #[error("block at height {height} does not match checkpointed id {expected}")]
    CheckpointMismatch { height: u64, expected: Hash, actual: Hash },

    #[error("transaction {id} is a duplicate within the uniqueness window")]
    DuplicateTransaction { id: Hash },

    #[error("transaction {id} is expired")]
    ExpiredTransaction { id: Hash },

    #[error("transaction {id} fails its TAPoS reference check")]
    TaposMismatch { id: Hash },

    #[error("account {account} referenced by transaction {id} is unknown")]
    UnknownAccount { id: Hash, account: String },

    #[error("message in transaction {id} declares unknown type {type_name}")]
    UnknownMessageType { id: Hash, type_name: String },

    #[error("authority check failed for transaction {id}")]
    AuthorityInsufficient { id: Hash },

    #[error("no handler registered for ({contract}, {scope}, {action}) in transaction {id}")]
    HandlerMissing {
        id: Hash,
        contract: String,
        scope: String,
        action: String,
    },

    #[error("handler assertion failed for transaction {id}: {reason}")]
    HandlerAssert { id: Hash, reason: String },

    #[error("reorg to {attempted_head} failed and was rolled back: {reason}")]
    ReorgFailure { attempted_head: Hash, reason: String },

    #[error("operation would violate irreversibility at block {num}")]
    IrreversibleViolation { num: u64 },
}

impl ChainError {
    /// The id most relevant to this error, when one exists.
    pub fn offending_id(&self) -> Option<Hash> {
        use ChainError::*;
        match self {
            InvalidBlockHeader { id, .. }
            | UnknownParent { id, .. }
            | BadSignature { id }
            | WrongProducer { id }
            | BadTimestamp { id }
            | MerkleMismatch { id }
            | DuplicateTransaction { id }
            | ExpiredTransaction { id }
            | TaposMismatch { id }
            | UnknownAccount { id, .. }
            | UnknownMessageType { id, .. }
            | AuthorityInsufficient { id }
            | HandlerMissing { id, .. }
            | HandlerAssert { id, .. } => Some(*id),
            CheckpointMismatch { actual, .. } => Some(*actual),
            ReorgFailure { attempted_head, .. } => Some(*attempted_head),
            IrreversibleViolation { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
