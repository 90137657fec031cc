//! The transaction validation pipeline (§4.4): seven ordered, individually
//! skippable stages run against every transaction before its messages are
//! applied.
//!
//! One function per concern, short-circuiting with `?` on the first
//! failure, with a per-transaction cache (the recent-transaction window)
//! rather than per-message bookkeeping, since uniqueness and expiration are
//! properties of the transaction as a whole.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::crypto::{verify, Hash, PublicKey};
use crate::error::{ChainError, Result};
use crate::registry::HandlerRegistry;
use crate::store::Ledger;
use crate::time::Timestamp;
use crate::tx::SignedTransaction;

/// Skip-bitmask bit positions (§6). Bit 5 (`TAPOS_CHECK`) disables both the
/// TAPoS check and the expiration check, matching the source behavior
/// rather than the more orthogonal design a fresh bit layout might choose.
pub mod skip {
    pub const PRODUCER_SIGNATURE: u32 = 1 << 0;
    pub const TRANSACTION_SIGNATURES: u32 = 1 << 1;
    pub const TRANSACTION_DUPE_CHECK: u32 = 1 << 2;
    pub const FORK_DB: u32 = 1 << 3;
    pub const BLOCK_SIZE_CHECK: u32 = 1 << 4;
    pub const TAPOS_CHECK: u32 = 1 << 5;
    pub const AUTHORITY_CHECK: u32 = 1 << 6;
    pub const MERKLE_CHECK: u32 = 1 << 7;
    pub const ASSERT_EVALUATION: u32 = 1 << 8;
    pub const UNDO_HISTORY_CHECK: u32 = 1 << 9;
    pub const PRODUCER_SCHEDULE_CHECK: u32 = 1 << 10;
    pub const VALIDATE: u32 = 1 << 11;
}

fn has(skip_flags: u32, bit: u32) -> bool {
    skip_flags & bit != 0
}

/// Checks a message payload decodes against the type schema registered for
/// its declared `type_name`. The schema itself lives outside the core
/// (§1); callers that have no schema to check against pass `None` and
/// every payload is accepted.
pub type TypeSchemaCheck = dyn Fn(&str, &[u8]) -> bool + Send + Sync;

/// Reconstructs the full block number a TAPoS reference names from its low
/// 16 bits, picking whichever nearby candidate does not exceed
/// `current_block_num` (a reference can only point backward in time).
fn reconstruct_ref_block_num(current_block_num: u32, ref_block_num: u16) -> u32 {
    let mut candidate = (current_block_num & 0xFFFF_0000) | (ref_block_num as u32);
    if candidate > current_block_num {
        candidate = candidate.saturating_sub(0x1_0000);
    }
    candidate
}

fn block_id_prefix(id: Hash) -> u32 {
    u32::from_be_bytes([id.0[4], id.0[5], id.0[6], id.0[7]])
}

/// Per-transaction cache of which signatures recover which keys, so
/// authority checks across several messages in the same transaction never
/// re-run ed25519 verification for a key they have already tested.
struct SignatureCache<'t> {
    tx_id: Hash,
    signatures: &'t [crate::crypto::Signature],
    verified: RefCell<HashMap<[u8; 32], bool>>,
}

impl<'t> SignatureCache<'t> {
    fn new(tx_id: Hash, signatures: &'t [crate::crypto::Signature]) -> Self {
        Self {
            tx_id,
            signatures,
            verified: RefCell::new(HashMap::new()),
        }
    }

    fn is_key_present(&self, key: &PublicKey) -> bool {
        if let Some(result) = self.verified.borrow().get(&key.0) {
            return *result;
        }
        let result = self.signatures.iter().any(|sig| verify(key, &self.tx_id, sig));
        self.verified.borrow_mut().insert(key.0, result);
        result
    }
}

/// Runs the full validation pipeline against `tx`. On success, records the
/// transaction id into the ledger's uniqueness index (the pipeline's only
/// side effect per §4.4).
#[allow(clippy::too_many_arguments)]
pub fn validate_transaction(
    tx: &SignedTransaction,
    ledger: &mut Ledger,
    registry: &HandlerRegistry,
    type_schema: Option<&TypeSchemaCheck>,
    skip_flags: u32,
    now: Timestamp,
    current_block_num: u32,
) -> Result<()> {
    let id = tx.id();

    // 1. validate_expiration
    if !has(skip_flags, skip::TAPOS_CHECK) {
        if tx.is_expired(now) {
            return Err(ChainError::ExpiredTransaction { id });
        }
        if tx.exceeds_max_lifetime(now, ledger.static_config().max_transaction_lifetime_secs) {
            return Err(ChainError::ExpiredTransaction { id });
        }
    }

    // 2. validate_uniqueness
    if !has(skip_flags, skip::TRANSACTION_DUPE_CHECK) && ledger.has_recent_transaction(&id) {
        return Err(ChainError::DuplicateTransaction { id });
    }

    // 3. validate_tapos
    if !has(skip_flags, skip::TAPOS_CHECK) {
        let ref_num = reconstruct_ref_block_num(current_block_num, tx.body.ref_block_num);
        let summary = ledger
            .block_summary(ref_num)
            .ok_or(ChainError::TaposMismatch { id })?;
        if block_id_prefix(summary.id) != tx.body.ref_block_prefix {
            return Err(ChainError::TaposMismatch { id });
        }
    }

    // 4. validate_referenced_accounts
    for account in tx.referenced_accounts() {
        if account.is_empty() {
            continue;
        }
        if !ledger.account_exists(account) {
            return Err(ChainError::UnknownAccount {
                id,
                account: account.to_string(),
            });
        }
    }

    // 5. validate_message_types
    if let Some(schema) = type_schema {
        for message in &tx.body.messages {
            if !schema(&message.type_name, &message.payload) {
                return Err(ChainError::UnknownMessageType {
                    id,
                    type_name: message.type_name.clone(),
                });
            }
        }
    }

    // 6. authority check
    if !has(skip_flags, skip::AUTHORITY_CHECK) {
        let trivially_satisfied = has(skip_flags, skip::TRANSACTION_SIGNATURES);
        let cache = SignatureCache::new(id, &tx.signatures);
        for message in &tx.body.messages {
            for account_name in &message.authorization {
                if trivially_satisfied {
                    continue;
                }
                let Some(account) = ledger.account(account_name) else {
                    return Err(ChainError::UnknownAccount {
                        id,
                        account: account_name.clone(),
                    });
                };
                let present: Vec<PublicKey> = account
                    .authority
                    .keys
                    .iter()
                    .filter(|(key, _)| cache.is_key_present(key))
                    .map(|(key, _)| key.clone())
                    .collect();
                if !account.authority.satisfied_by(&present) {
                    return Err(ChainError::AuthorityInsufficient { id });
                }
            }
        }
    }

    // 7. per-message validate + precondition_validate
    for message in &tx.body.messages {
        if !has(skip_flags, skip::VALIDATE) {
            registry
                .validate(&message.recipient_account, &message.scope, &message.type_name, message)
                .map_err(|_| ChainError::HandlerAssert {
                    id,
                    reason: format!("validate failed for {}", message.type_name),
                })?;
        }
        registry
            .precondition_validate(&message.recipient_account, &message.scope, &message.type_name, message, ledger)
            .map_err(|_| ChainError::HandlerAssert {
                id,
                reason: format!("precondition_validate failed for {}", message.type_name),
            })?;
    }

    ledger.record_recent_transaction(id, tx.body.expiration);
    Ok(())
}

/// Applies every message in `tx` via the handler registry, inside a
/// caller-managed transaction session. `assert_evaluation` skip suppresses
/// `HandlerAssert` failures raised by `apply` handlers, treating them as a
/// no-op rather than aborting the transaction — used during replay of
/// history that has already been judged valid once.
pub fn apply_transaction(
    tx: &SignedTransaction,
    ledger: &mut Ledger,
    registry: &HandlerRegistry,
    skip_flags: u32,
) -> Result<()> {
    let id = tx.id();
    for message in &tx.body.messages {
        let result = registry.apply(
            &message.recipient_account,
            &message.scope,
            &message.type_name,
            message,
            ledger,
            id,
        );
        match result {
            Ok(()) => {}
            Err(ChainError::HandlerAssert { .. }) if has(skip_flags, skip::ASSERT_EVALUATION) => {}
            Err(other) => return Err(other),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Account, Authority, BlockSummary};
    use crate::tx::{Message, TransactionBody};

    fn sample_tx(ref_block_num: u16, ref_block_prefix: u32) -> SignedTransaction {
        SignedTransaction {
            body: TransactionBody {
                ref_block_num,
                ref_block_prefix,
                expiration: 1_000,
                messages: vec![Message {
                    sender_account: "alice".into(),
                    recipient_account: "bank".into(),
                    scope: "alice".into(),
                    type_name: "transfer".into(),
                    payload: vec![],
                    authorization: vec!["alice".into()],
                }],
            },
            signatures: vec![],
        }
    }

    fn ledger_with_alice() -> Ledger {
        let mut ledger = Ledger::new();
        ledger.put_account(Account {
            name: "alice".into(),
            authority: Authority {
                threshold: 0,
                keys: vec![],
            },
        });
        ledger.put_account(Account {
            name: "bank".into(),
            authority: Authority {
                threshold: 0,
                keys: vec![],
            },
        });
        ledger
    }

    #[test]
    fn expired_transaction_fails_first_stage() {
        let mut ledger = ledger_with_alice();
        let registry = HandlerRegistry::new();
        let tx = sample_tx(0, 0);
        let err = validate_transaction(&tx, &mut ledger, &registry, None, 0, 5_000, 1).unwrap_err();
        assert!(matches!(err, ChainError::ExpiredTransaction { .. }));
    }

    #[test]
    fn unknown_tapos_reference_is_rejected() {
        let mut ledger = ledger_with_alice();
        let registry = HandlerRegistry::new();
        let tx = sample_tx(5, 0xdead_beef);
        let err = validate_transaction(&tx, &mut ledger, &registry, None, 0, 0, 10).unwrap_err();
        assert!(matches!(err, ChainError::TaposMismatch { .. }));
    }

    #[test]
    fn matching_tapos_reference_passes() {
        let mut ledger = ledger_with_alice();
        let block_id = Hash::block_id(5, b"whatever");
        ledger.put_block_summary(
            5,
            BlockSummary {
                id: block_id,
                timestamp: 0,
            },
        );
        let registry = HandlerRegistry::new();
        let tx = sample_tx(5, block_id_prefix(block_id));
        assert!(validate_transaction(&tx, &mut ledger, &registry, None, 0, 0, 5).is_ok());
    }

    #[test]
    fn tapos_check_skip_also_skips_expiration() {
        let mut ledger = ledger_with_alice();
        let registry = HandlerRegistry::new();
        let tx = sample_tx(5, 0);
        assert!(validate_transaction(&tx, &mut ledger, &registry, None, skip::TAPOS_CHECK, 5_000, 1).is_ok());
    }

    #[test]
    fn unknown_account_is_rejected() {
        let mut ledger = Ledger::new();
        let registry = HandlerRegistry::new();
        let tx = sample_tx(0, 0);
        let err = validate_transaction(
            &tx,
            &mut ledger,
            &registry,
            None,
            skip::TAPOS_CHECK,
            0,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::UnknownAccount { .. }));
    }

    #[test]
    fn duplicate_transaction_is_rejected_on_second_pass() {
        let mut ledger = ledger_with_alice();
        let registry = HandlerRegistry::new();
        let tx = sample_tx(0, 0);
        validate_transaction(&tx, &mut ledger, &registry, None, skip::TAPOS_CHECK, 0, 0).unwrap();
        let err = validate_transaction(&tx, &mut ledger, &registry, None, skip::TAPOS_CHECK, 0, 0).unwrap_err();
        assert!(matches!(err, ChainError::DuplicateTransaction { .. }));
    }

    #[test]
    fn missing_apply_handler_fails_application() {
        let mut ledger = ledger_with_alice();
        let registry = HandlerRegistry::new();
        let tx = sample_tx(0, 0);
        let err = apply_transaction(&tx, &mut ledger, &registry, 0).unwrap_err();
        assert!(matches!(err, ChainError::HandlerMissing { .. }));
    }

    #[test]
    fn assert_evaluation_skip_suppresses_handler_assert() {
        let mut ledger = ledger_with_alice();
        let mut registry = HandlerRegistry::new();
        registry.register_apply(
            "bank",
            "alice",
            "transfer",
            Box::new(|_m, _ledger| {
                Err(ChainError::HandlerAssert {
                    id: Hash::ZERO,
                    reason: "insufficient funds".into(),
                })
            }),
        );
        let tx = sample_tx(0, 0);
        assert!(apply_transaction(&tx, &mut ledger, &registry, skip::ASSERT_EVALUATION).is_ok());
    }
}
