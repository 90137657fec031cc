//! Transaction and message data types.
//!
//! A [`SignedTransaction`] is the wire-level shape the core accepts; most
//! of the controller only ever touches its id and the structural
//! accessors below (`is_expired`, `referenced_accounts`, ...). There is
//! deliberately no separate accepted/valid staged type: validation and
//! application both just take a `&SignedTransaction` and a set of skip
//! flags, since block replay and first-time acceptance differ only in
//! which flags are set, not in the type being processed.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, PublicKey, Signature};
use crate::time::Timestamp;

pub type AccountName = String;

/// A single effect a transaction asks the ledger to apply, dispatched by
/// `(contract, scope, action)` to a registered [`crate::registry::Handler`].
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Message {
    pub sender_account: AccountName,
    pub recipient_account: AccountName,
    pub scope: AccountName,
    pub type_name: String,
    pub payload: Vec<u8>,
    pub authorization: Vec<AccountName>,
}

/// The unsigned body of a transaction; hashing this (not the signed
/// envelope) gives the transaction id, so re-signing never changes it.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct TransactionBody {
    /// Low 16 bits of a recent block number, the TAPoS reference.
    pub ref_block_num: u16,
    /// Low 32 bits of that block's id, confirming the signer saw this fork.
    pub ref_block_prefix: u32,
    pub expiration: Timestamp,
    pub messages: Vec<Message>,
}

/// A transaction as received from the network: an unsigned body plus the
/// signatures over its hash.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub body: TransactionBody,
    pub signatures: Vec<Signature>,
}

impl SignedTransaction {
    /// The transaction id: the hash of the unsigned body.
    pub fn id(&self) -> Hash {
        Hash::of(&self.body)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.body.expiration <= now
    }

    /// `true` if `expiration` is further in the future than
    /// `max_lifetime_secs` allows.
    pub fn exceeds_max_lifetime(&self, now: Timestamp, max_lifetime_secs: u64) -> bool {
        self.body.expiration > now.saturating_add(max_lifetime_secs)
    }

    /// Every account name referenced anywhere in this transaction: as a
    /// sender, recipient, scope, or required authorization.
    pub fn referenced_accounts(&self) -> impl Iterator<Item = &str> {
        self.body.messages.iter().flat_map(|m| {
            std::iter::once(m.sender_account.as_str())
                .chain(std::iter::once(m.recipient_account.as_str()))
                .chain(std::iter::once(m.scope.as_str()))
                .chain(m.authorization.iter().map(String::as_str))
        })
    }

    /// Verifies each signature recovers one of the keys in `keys`, caching
    /// nothing itself — the validation pipeline owns the per-transaction
    /// recovery cache (§4.4 stage 6).
    pub fn signature_matches_any(&self, signature: &Signature, keys: &[PublicKey]) -> bool {
        let id = self.id();
        keys.iter().any(|k| crate::crypto::verify(k, &id, signature))
    }
}
