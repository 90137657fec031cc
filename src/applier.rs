//! The block applier (§4.7): `push_block`'s fast-path/reorg/no-op
//! decision, `_apply_block`'s header validation and housekeeping, and
//! `generate_block`/`pop_block`.
//!
//! Expressed as small private free functions operating on a shared mutable
//! state struct, each returning `Result` and propagating with `?`, rather
//! than as inherent methods on `Controller` itself — that keeps the public
//! façade in `controller.rs` thin and lets these functions share state
//! freely without fighting the borrow checker over `&mut self`.

use crate::block::{BlockBuilder, SignedBlock};
use crate::config::BlockchainConfiguration;
use crate::controller::ControllerState;
use crate::crypto::{Hash, Signature};
use crate::error::{ChainError, Result};
use crate::schedule::ProducerSchedule;
use crate::store::{BlockSummary, ProducerInfo};
use crate::time::{get_slot_at_time, is_slot_aligned, Timestamp};
use crate::tx::SignedTransaction;
use crate::validation::{apply_transaction, skip, validate_transaction};

fn has(flags: u32, bit: u32) -> bool {
    flags & bit != 0
}

fn close_pending(state: &mut ControllerState) {
    if state.pending_open {
        state.ledger.rollback_session();
        state.pending_open = false;
    }
}

fn open_pending(state: &mut ControllerState) {
    if !state.pending_open {
        state.ledger.begin_session();
        state.pending_open = true;
    }
}

/// Checks everything about a block's header that does not require
/// executing its transactions (§4.7 `_apply_block`, first bullet).
fn validate_block_header(state: &ControllerState, block: &SignedBlock, skip_flags: u32) -> Result<()> {
    let id = block.id();

    if let Some(expected) = state.checkpoints.get(&block.number()) {
        if *expected != id {
            return Err(ChainError::CheckpointMismatch {
                height: block.number() as u64,
                expected: *expected,
                actual: id,
            });
        }
    }
    let below_highest_checkpoint = state
        .checkpoints
        .keys()
        .max()
        .map(|highest| block.number() < *highest)
        .unwrap_or(false);
    let effective_skip = if below_highest_checkpoint {
        skip_flags | skip::PRODUCER_SIGNATURE
    } else {
        skip_flags
    };

    let dynamic = state.ledger.dynamic();
    if block.header.parent_id != dynamic.head_block_id {
        return Err(ChainError::UnknownParent {
            id,
            parent: block.header.parent_id,
        });
    }

    let interval = state.config.block_interval_secs;
    let slot = get_slot_at_time(interval, dynamic.head_block_time, block.header.timestamp);
    if slot == 0 {
        return Err(ChainError::BadTimestamp { id });
    }
    if !is_slot_aligned(interval, dynamic.head_block_time, block.header.timestamp) {
        return Err(ChainError::BadTimestamp { id });
    }

    let scheduled = state.ledger.schedule().get_scheduled_producer(slot);
    if !has(effective_skip, skip::PRODUCER_SCHEDULE_CHECK) && scheduled != block.header.producer {
        return Err(ChainError::WrongProducer { id });
    }

    if !has(effective_skip, skip::PRODUCER_SIGNATURE) {
        let producer = state
            .ledger
            .producer(&block.header.producer)
            .ok_or(ChainError::UnknownAccount {
                id,
                account: block.header.producer.clone(),
            })?;
        if !block.verify_signature(&producer.signing_key) {
            return Err(ChainError::BadSignature { id });
        }
    }

    if !has(effective_skip, skip::MERKLE_CHECK) && block.computed_mroot() != block.header.transaction_mroot {
        return Err(ChainError::MerkleMismatch { id });
    }

    Ok(())
}

/// Slot index used purely for participation-bitmap bookkeeping: an
/// absolute count of `block_interval_secs`-wide windows since the unix
/// epoch, distinct from [`crate::time::get_slot_at_time`]'s head-relative
/// numbering used for producer scheduling.
fn absolute_slot(interval: u64, timestamp: Timestamp) -> u64 {
    timestamp / interval
}

fn update_dynamic_properties(state: &mut ControllerState, block: &SignedBlock) {
    let interval = state.config.block_interval_secs;
    let mut dynamic = state.ledger.dynamic().clone();

    let gap = if dynamic.head_block_number == 0 {
        1
    } else {
        let prev = absolute_slot(interval, dynamic.head_block_time);
        let now = absolute_slot(interval, block.header.timestamp);
        now.saturating_sub(prev).max(1)
    };

    let window = state.config.participation_window as u32;
    let shift = gap.min(128) as u32;
    dynamic.participation_bitmap = dynamic.participation_bitmap.checked_shl(shift).unwrap_or(0);
    dynamic.participation_bitmap |= 1;

    let mask = if window >= 128 { u128::MAX } else { (1u128 << window) - 1 };
    dynamic.recent_slots_filled = (dynamic.participation_bitmap & mask).count_ones();

    dynamic.head_block_id = block.id();
    dynamic.head_block_number = block.number() as u64;
    dynamic.head_block_time = block.header.timestamp;
    dynamic.current_producer = block.header.producer.clone();

    state.ledger.set_dynamic(dynamic);
}

fn apply_transactions(state: &mut ControllerState, block: &SignedBlock, skip_flags: u32) -> Result<()> {
    for tx in &block.transactions {
        state.ledger.begin_session();
        let result = validate_transaction(
            tx,
            &mut state.ledger,
            &state.registry,
            state.type_schema.as_deref(),
            skip_flags,
            block.header.timestamp,
            block.number(),
        )
        .and_then(|()| apply_transaction(tx, &mut state.ledger, &state.registry, skip_flags));

        match result {
            Ok(()) => state.ledger.commit_session(),
            Err(e) => {
                state.ledger.rollback_session();
                return Err(e);
            }
        }
    }
    Ok(())
}

fn update_producer_stats(state: &mut ControllerState, block: &SignedBlock) {
    if let Some(mut producer) = state.ledger.producer(&block.header.producer).cloned() {
        producer.last_produced_block_num = block.number() as u64;
        state.ledger.put_producer(producer);
    }
}

/// §4.7 `update_last_irreversible_block`: the `(2/3+1)`-th highest
/// `last_produced_block_num` among known producers becomes the new
/// last-irreversible block, provided enough producers have produced at
/// all. Leaves last-irreversible unchanged otherwise, per the design's
/// resolution of its own open question.
fn update_last_irreversible_block(state: &mut ControllerState) {
    let threshold = state.config.irreversibility_threshold();
    let mut produced: Vec<u64> = state
        .ledger
        .producers()
        .map(|p| p.last_produced_block_num)
        .collect();
    if produced.len() < threshold {
        return;
    }
    produced.sort_unstable_by(|a, b| b.cmp(a));
    let candidate = produced[threshold - 1];

    let dynamic = state.ledger.dynamic();
    if candidate <= dynamic.last_irreversible_block_num {
        return;
    }
    let old_lib = dynamic.last_irreversible_block_num;
    let mut dynamic = dynamic.clone();
    dynamic.last_irreversible_block_num = candidate;
    let head_id = dynamic.head_block_id;
    state.ledger.set_dynamic(dynamic);

    // Walk the current branch from head back to just past the old LIB,
    // collecting newly-irreversible blocks oldest-first for the log.
    let path = state.fork_db.path_to_root(head_id);
    let newly_irreversible: Vec<SignedBlock> = path
        .into_iter()
        .filter_map(|id| state.fork_db.get(&id))
        .filter(|node| node.block.number() as u64 > old_lib && node.block.number() as u64 <= candidate)
        .map(|node| node.block)
        .collect();

    let advanced = newly_irreversible.len();
    state.pending_log_writes.extend(newly_irreversible.clone());
    for block in &newly_irreversible {
        state.fork_db.remove(&block.id());
    }
    state.ledger.forget_oldest_block_checkpoints(advanced);
}

fn maybe_update_round(state: &mut ControllerState, block: &SignedBlock) {
    if let Some(schedule) = block.producer_changes_schedule() {
        state.ledger.set_schedule(schedule);
    }
    if block.number() as usize % state.config.producer_count == 0 {
        let votes: Vec<BlockchainConfiguration> = state
            .ledger
            .producers()
            .map(|p| p.votes_on_configuration.clone())
            .collect();
        let mut config = state.ledger.static_config().clone();
        config.update_from_votes(&votes);
        state.ledger.set_static_config(config);
    }
}

/// `_apply_block` (§4.7): validates the header, executes every
/// transaction inside a freshly opened block session, runs housekeeping,
/// and commits. Any failure rolls the entire block session back — no
/// partial block ever persists (§7 propagation policy).
pub(crate) fn apply_block_internal(state: &mut ControllerState, block: &SignedBlock, skip_flags: u32) -> Result<()> {
    validate_block_header(state, block, skip_flags)?;

    state.ledger.begin_block_session();

    state.ledger.put_block_summary(
        block.number(),
        BlockSummary {
            id: block.id(),
            timestamp: block.header.timestamp,
        },
    );
    update_dynamic_properties(state, block);

    if let Err(e) = apply_transactions(state, block, skip_flags) {
        // The block session was only opened, never committed, so it is
        // discarded like any other uncommitted nested session rather than
        // through the pop_block_session machinery (which undoes a
        // previously *committed* checkpoint).
        state.ledger.rollback_session();
        return Err(e);
    }

    update_producer_stats(state, block);
    update_last_irreversible_block(state);
    state.ledger.clear_expired_transactions(block.header.timestamp);
    maybe_update_round(state, block);

    state.ledger.commit_block_session();
    state.signals.emit_applied_block(block);
    Ok(())
}

/// Undoes the most recently committed block session and detaches it from
/// the current branch, returning the popped block.
pub(crate) fn pop_block_internal(state: &mut ControllerState) -> Result<SignedBlock> {
    let head_id = state.ledger.dynamic().head_block_id;
    let node = state
        .fork_db
        .get(&head_id)
        .ok_or(ChainError::ReorgFailure {
            attempted_head: head_id,
            reason: "no fork-db entry for current head".into(),
        })?;
    state.ledger.pop_block_session();
    state.fork_db.set_in_current_branch(&head_id, false);
    Ok(node.block)
}

fn reorg_to(state: &mut ControllerState, new_tip: Hash, skip_flags: u32) -> Result<()> {
    let old_head = state.ledger.dynamic().head_block_id;
    let lca = state
        .fork_db
        .lowest_common_ancestor(old_head, new_tip)
        .ok_or(ChainError::ReorgFailure {
            attempted_head: new_tip,
            reason: "no common ancestor within the fork database".into(),
        })?;

    close_pending(state);

    let pop_count = state.fork_db.branch_from(lca, old_head).len();
    let mut popped = Vec::with_capacity(pop_count);
    for _ in 0..pop_count {
        popped.push(pop_block_internal(state)?);
    }

    let push_list = state.fork_db.branch_from(lca, new_tip);
    let mut applied = Vec::with_capacity(push_list.len());
    for block in &push_list {
        match apply_block_internal(state, block, skip_flags) {
            Ok(()) => {
                state.fork_db.mark_validated(&block.id());
                state.fork_db.set_in_current_branch(&block.id(), true);
                applied.push(block.clone());
            }
            Err(e) => {
                state.fork_db.remove(&block.id());
                for _ in 0..applied.len() {
                    pop_block_internal(state)?;
                }
                for original in popped.iter().rev() {
                    apply_block_internal(state, original, skip_flags)?;
                    state.fork_db.set_in_current_branch(&original.id(), true);
                }
                open_pending(state);
                return Err(ChainError::ReorgFailure {
                    attempted_head: new_tip,
                    reason: e.to_string(),
                });
            }
        }
    }

    for block in &popped {
        state.fork_db.set_in_current_branch(&block.id(), false);
    }

    // Best-effort re-submission of transactions from popped blocks; ones
    // that no longer validate are silently dropped (§7 "User-visible
    // behavior").
    let head_time = state.ledger.dynamic().head_block_time;
    for block in popped.iter().rev() {
        for tx in &block.transactions {
            let _ = state.queue.push(tx.clone(), &state.ledger, head_time);
        }
    }

    open_pending(state);
    Ok(())
}

/// `push_block` (§4.7): the entry point for externally received blocks.
/// Returns `Ok(false)` if the block was already known, `Ok(true)` if it
/// was newly accepted into the fork database (whether or not it ended up
/// on the best branch).
pub fn push_block(state: &mut ControllerState, block: SignedBlock, skip_flags: u32) -> Result<bool> {
    let id = block.id();
    if state.fork_db.contains(&id) {
        return Ok(false);
    }

    if has(skip_flags, skip::FORK_DB) {
        apply_block_internal(state, &block, skip_flags)?;
        state.fork_db.add(block, true);
        state.fork_db.set_in_current_branch(&id, true);
        return Ok(true);
    }

    let current_head_id = state.ledger.dynamic().head_block_id;
    let current_head_num = state.ledger.dynamic().head_block_number;
    let parent_id = block.header.parent_id;
    state.fork_db.add(block, false);

    let candidate = state.fork_db.best_candidate().expect("just inserted a node");
    let candidate_num = state
        .fork_db
        .get(&candidate)
        .expect("best_candidate returns a known id")
        .block
        .number();

    if candidate == id && parent_id == current_head_id {
        close_pending(state);
        let applied = state
            .fork_db
            .get(&id)
            .expect("just inserted")
            .block;
        match apply_block_internal(state, &applied, skip_flags) {
            Ok(()) => {
                state.fork_db.mark_validated(&id);
                state.fork_db.set_in_current_branch(&id, true);
                open_pending(state);
                Ok(true)
            }
            Err(e) => {
                state.fork_db.remove(&id);
                open_pending(state);
                Err(e)
            }
        }
    } else if (candidate_num as u64) > current_head_num {
        reorg_to(state, candidate, skip_flags).map(|()| true)
    } else {
        Ok(true)
    }
}

/// `generate_block` (§4.7): builds a candidate block from the pending
/// queue, signs it with `sign`, and applies it through the same
/// `_apply_block` path as an externally-received block.
pub fn generate_block(
    state: &mut ControllerState,
    when: Timestamp,
    producer: String,
    skip_flags: u32,
    sign: impl FnOnce(&Hash) -> Signature,
) -> Result<SignedBlock> {
    close_pending(state);

    let parent_id = state.ledger.dynamic().head_block_id;
    let round_closes = (state.ledger.dynamic().head_block_number + 1) as usize % state.config.producer_count == 0;
    let producer_changes = if round_closes {
        let votes: Vec<String> = state.ledger.producers().map(|p| p.owner_account.clone()).collect();
        Some(ProducerSchedule::update(&votes, state.config.producer_count, parent_id).round().to_vec())
    } else {
        None
    };

    let mut builder = BlockBuilder::new(parent_id, when, producer, producer_changes);

    let max_size = state.config.max_block_size_bytes as usize;
    let mut accepted: Vec<SignedTransaction> = Vec::new();
    let mut size_so_far = 0usize;
    // Peek the queue in order rather than popping: a transaction that does
    // not fit in this block must stay queued for the next one rather than
    // being discarded.
    for tx in state.queue.iter_in_order().collect::<Vec<_>>() {
        let encoded_len = parity_scale_codec::Encode::encoded_size(&tx);
        if !has(skip_flags, skip::BLOCK_SIZE_CHECK) && size_so_far + encoded_len > max_size {
            break;
        }
        state.queue.remove(&tx.id());
        builder.push_transaction(tx.clone());
        accepted.push(tx);
        size_so_far += encoded_len;
    }

    let block = builder.sign(sign);

    match apply_block_internal(state, &block, skip_flags) {
        Ok(()) => {
            state.fork_db.add(block.clone(), true);
            state.fork_db.set_in_current_branch(&block.id(), true);
            open_pending(state);
            Ok(block)
        }
        Err(e) => {
            for tx in accepted {
                let _ = state.queue.push(tx.clone(), &state.ledger, when);
            }
            open_pending(state);
            Err(e)
        }
    }
}

/// `pop_block` (§4.7): pops the current head off the best branch, requiring
/// a committed block session to undo.
pub fn pop_block(state: &mut ControllerState) -> Result<SignedBlock> {
    if state.ledger.committed_block_depth() == 0 {
        return Err(ChainError::ReorgFailure {
            attempted_head: state.ledger.dynamic().head_block_id,
            reason: "no committed block session to pop".into(),
        });
    }
    close_pending(state);
    let popped = pop_block_internal(state)?;
    for tx in &popped.transactions {
        let head_time = state.ledger.dynamic().head_block_time;
        let _ = state.queue.push(tx.clone(), &state.ledger, head_time);
    }
    open_pending(state);
    Ok(popped)
}

#[allow(unused)]
fn _assert_producer_info_shape(_p: ProducerInfo) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfiguration;
    use crate::controller::Controller;
    use crate::crypto::{generate_and_sign, PublicKey};
    use crate::store::{Account, Authority, ProducerInfo};

    /// Registers `name` as the sole scheduled producer with an arbitrary
    /// signing key — fine for tests that never need a block to actually
    /// verify against it (wrong-producer, bad-signature, checkpoint).
    fn controller_with_producer(name: &str) -> Controller {
        let config = ControllerConfiguration {
            producer_count: 1,
            block_interval_secs: 3,
            ..Default::default()
        };
        let mut controller = Controller::new(config);
        let (key, _sig) = generate_and_sign(&Hash::ZERO);
        controller.state.ledger.put_account(Account {
            name: name.to_string(),
            authority: Authority {
                threshold: 0,
                keys: vec![],
            },
        });
        controller.state.ledger.put_producer(ProducerInfo {
            owner_account: name.to_string(),
            signing_key: key,
            votes_on_configuration: BlockchainConfiguration::default(),
            last_produced_block_num: 0,
        });
        controller
            .state
            .ledger
            .set_schedule(ProducerSchedule::new(vec![name.to_string()]));
        controller
    }

    /// Builds and signs a block with a freshly generated key, then registers
    /// that exact key as `name`'s signing key, so the result verifies.
    fn signed_block(controller: &mut Controller, name: &str, parent: Hash, timestamp: Timestamp) -> SignedBlock {
        let mut captured_key: Option<PublicKey> = None;
        let block = BlockBuilder::new(parent, timestamp, name.to_string(), None).sign(|h| {
            let (key, sig) = generate_and_sign(h);
            captured_key = Some(key);
            sig
        });
        controller.state.ledger.put_producer(ProducerInfo {
            owner_account: name.to_string(),
            signing_key: captured_key.expect("sign closure always runs"),
            votes_on_configuration: BlockchainConfiguration::default(),
            last_produced_block_num: 0,
        });
        block
    }

    #[test]
    fn genesis_block_applies_and_becomes_head() {
        let mut controller = controller_with_producer("p1");
        let block = signed_block(&mut controller, "p1", Hash::ZERO, 3);
        let id = block.id();
        let accepted = controller.push_block(block).unwrap();
        assert!(accepted);
        assert_eq!(controller.head_block_id(), id);
        assert_eq!(controller.head_block_number(), 1);
    }

    #[test]
    fn wrong_producer_is_rejected() {
        let mut controller = controller_with_producer("p1");
        let block = BlockBuilder::new(Hash::ZERO, 3, "someone-else".into(), None).sign(|_| Signature([0u8; 64]));
        let err = controller.push_block(block).unwrap_err();
        assert!(matches!(err, ChainError::WrongProducer { .. }));
    }

    #[test]
    fn bad_signature_is_rejected_and_head_unchanged() {
        let mut controller = controller_with_producer("p1");
        let block = BlockBuilder::new(Hash::ZERO, 3, "p1".into(), None).sign(|_| Signature([9u8; 64]));
        let err = controller.push_block(block).unwrap_err();
        assert!(matches!(err, ChainError::BadSignature { .. }));
        assert_eq!(controller.head_block_number(), 0);
    }

    #[test]
    fn checkpoint_mismatch_is_rejected() {
        let mut controller = controller_with_producer("p1");
        controller.set_checkpoint(1, Hash::of(&"not-the-real-block"));
        let block = BlockBuilder::new(Hash::ZERO, 3, "p1".into(), None).sign(|_| Signature([0u8; 64]));
        let err = controller.push_block(block).unwrap_err();
        assert!(matches!(err, ChainError::CheckpointMismatch { .. }));
    }

    #[test]
    fn pop_block_restores_prior_head() {
        let mut controller = controller_with_producer("p1");
        let genesis = signed_block(&mut controller, "p1", Hash::ZERO, 3);
        controller.push_block(genesis).unwrap();
        assert_eq!(controller.head_block_number(), 1);

        let popped = controller.pop_block().unwrap();
        assert_eq!(popped.number(), 1);
        assert_eq!(controller.head_block_number(), 0);
        assert_eq!(controller.head_block_id(), Hash::ZERO);
    }
}
