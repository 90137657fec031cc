//! Block data types.
//!
//! Splits an unsigned header/payload from the signed envelope around it,
//! but deliberately has no pending/chained/valid/committed type-state
//! ladder: a block's lifecycle is owned by the fork database and block
//! applier (§4.6-4.7), not encoded in the type system, because blocks here
//! can legitimately move backwards (popped during a reorg), which a linear
//! type-state chain does not model well.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::crypto::{merkle_root, Hash, PublicKey, Signature};
use crate::schedule::ProducerSchedule;
use crate::time::Timestamp;
use crate::tx::SignedTransaction;

/// The unsigned block header.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_id: Hash,
    pub timestamp: Timestamp,
    pub producer: String,
    pub transaction_mroot: Hash,
    /// `Some` only on the block that closes a round, carrying the freshly
    /// computed next round so replaying nodes do not need to re-derive the
    /// vote tally themselves.
    pub producer_changes: Option<Vec<String>>,
}

impl BlockHeader {
    /// The block number, one more than the parent's (genesis has no
    /// parent and is number 1, matching the height convention of the
    /// original source rather than a zero-based genesis).
    pub fn number(&self) -> u32 {
        if self.parent_id == Hash::ZERO {
            1
        } else {
            self.parent_id.block_num() + 1
        }
    }

    fn signing_hash(&self) -> Hash {
        Hash::of(self)
    }
}

/// A block together with its producer signature.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct SignedBlock {
    pub header: BlockHeader,
    pub transactions: Vec<SignedTransaction>,
    pub producer_signature: Signature,
}

impl SignedBlock {
    /// The block id: a content hash of the header whose leading four bytes
    /// are overwritten with the big-endian block number (§3).
    pub fn id(&self) -> Hash {
        let encoded = self.header.encode();
        Hash::block_id(self.header.number(), &encoded)
    }

    pub fn number(&self) -> u32 {
        self.header.number()
    }

    pub fn computed_mroot(&self) -> Hash {
        let leaves: Vec<Hash> = self.transactions.iter().map(SignedTransaction::id).collect();
        merkle_root(&leaves)
    }

    pub fn verify_signature(&self, producer_key: &PublicKey) -> bool {
        crate::crypto::verify(producer_key, &self.header.signing_hash(), &self.producer_signature)
    }

    pub fn producer_changes_schedule(&self) -> Option<ProducerSchedule> {
        self.header
            .producer_changes
            .clone()
            .map(ProducerSchedule::new)
    }
}

/// Builds and signs a [`SignedBlock`] on top of a known parent — the
/// counterpart of `generate_block` (§4.7) at the data-type layer; the
/// controller owns ordering, size capping and transaction selection.
pub struct BlockBuilder {
    header: BlockHeader,
    transactions: Vec<SignedTransaction>,
}

impl BlockBuilder {
    pub fn new(
        parent_id: Hash,
        timestamp: Timestamp,
        producer: String,
        producer_changes: Option<Vec<String>>,
    ) -> Self {
        Self {
            header: BlockHeader {
                parent_id,
                timestamp,
                producer,
                transaction_mroot: Hash::ZERO,
                producer_changes,
            },
            transactions: Vec::new(),
        }
    }

    pub fn push_transaction(&mut self, tx: SignedTransaction) {
        self.transactions.push(tx);
    }

    pub fn transactions(&self) -> &[SignedTransaction] {
        &self.transactions
    }

    /// Finalizes the header's Merkle root and signs with `sign`, a closure
    /// standing in for the external signing collaborator (the core only
    /// verifies signatures; see §1).
    pub fn sign(mut self, sign: impl FnOnce(&Hash) -> Signature) -> SignedBlock {
        let leaves: Vec<Hash> = self.transactions.iter().map(SignedTransaction::id).collect();
        self.header.transaction_mroot = merkle_root(&leaves);
        let signing_hash = self.header.signing_hash();
        let producer_signature = sign(&signing_hash);
        SignedBlock {
            header: self.header,
            transactions: self.transactions,
            producer_signature,
        }
    }
}
