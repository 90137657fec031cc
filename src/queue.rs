//! The pending transaction queue: transactions accepted off the wire but
//! not yet included in a block (§3 "Pending state").
//!
//! FIFO pop order via a `VecDeque` of ids plus a `DashMap` side index for
//! O(1) duplicate lookup and removal. `push` takes `&mut self` rather than
//! `&self`: the single-writer model (§5) never pushes from more than one
//! thread at a time, so the concurrent map is kept only for its lookup
//! shape, not for concurrent writers.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;

use crate::crypto::Hash;
use crate::error::{ChainError, Result};
use crate::store::Ledger;
use crate::time::Timestamp;
use crate::tx::SignedTransaction;

/// FIFO queue of pending transactions with O(1) duplicate detection.
///
/// A capacity-bounded ring of ids backed by a side map for O(1) lookup.
pub struct PendingQueue {
    order: VecDeque<Hash>,
    txs: DashMap<Hash, SignedTransaction>,
    max_txs: usize,
    /// Transactions claiming a timestamp further than this into the future
    /// relative to `now` are rejected outright.
    future_threshold: Duration,
}

impl PendingQueue {
    pub fn new(max_txs: usize, future_threshold: Duration) -> Self {
        Self {
            order: VecDeque::new(),
            txs: DashMap::new(),
            max_txs,
            future_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn check(&self, tx: &SignedTransaction, ledger: &Ledger, now: Timestamp) -> Result<()> {
        let id = tx.id();
        if tx.is_expired(now) {
            return Err(ChainError::ExpiredTransaction { id });
        }
        let max_lifetime = ledger.static_config().max_transaction_lifetime_secs;
        if tx.exceeds_max_lifetime(now, max_lifetime) {
            return Err(ChainError::ExpiredTransaction { id });
        }
        if ledger.has_recent_transaction(&id) {
            return Err(ChainError::DuplicateTransaction { id });
        }
        Ok(())
    }

    /// Admits a transaction, rejecting duplicates, expired transactions and
    /// transactions claiming an implausibly future timestamp. Re-submitting
    /// an already-queued transaction id is a no-op rather than an error,
    /// since a sender retrying after a dropped ack should not be punished.
    pub fn push(&mut self, tx: SignedTransaction, ledger: &Ledger, now: Timestamp) -> Result<()> {
        let id = tx.id();
        if self.txs.contains_key(&id) {
            return Ok(());
        }
        if tx.body.expiration > now.saturating_add(self.future_threshold.as_secs()) {
            return Err(ChainError::ExpiredTransaction { id });
        }
        self.check(&tx, ledger, now)?;
        if self.order.len() >= self.max_txs {
            return Err(ChainError::HandlerAssert {
                id,
                reason: "pending queue is full".into(),
            });
        }
        self.txs.insert(id, tx);
        self.order.push_back(id);
        Ok(())
    }

    /// Removes and returns the oldest transaction still present, skipping
    /// (and dropping) any id whose transaction has since been evicted from
    /// the side map by `remove`/`clear_expired`.
    pub fn pop_front(&mut self) -> Option<SignedTransaction> {
        loop {
            let id = self.order.pop_front()?;
            if let Some((_, tx)) = self.txs.remove(&id) {
                return Some(tx);
            }
        }
    }

    /// Drops a transaction by id without returning it, used once a
    /// transaction has landed in a block via another route (e.g. received
    /// inside a pushed block rather than generated locally).
    pub fn remove(&mut self, id: &Hash) {
        self.txs.remove(id);
        self.order.retain(|queued| queued != id);
    }

    /// Evicts every transaction that is expired or exceeds the ledger's
    /// current max lifetime, mirroring the controller's periodic
    /// `clear_expired_transactions` housekeeping (§4.7).
    pub fn clear_expired(&mut self, ledger: &Ledger, now: Timestamp) {
        let max_lifetime = ledger.static_config().max_transaction_lifetime_secs;
        let mut survivors = VecDeque::with_capacity(self.order.len());
        while let Some(id) = self.order.pop_front() {
            let keep = self
                .txs
                .get(&id)
                .map(|tx| !tx.is_expired(now) && !tx.exceeds_max_lifetime(now, max_lifetime))
                .unwrap_or(false);
            if keep {
                survivors.push_back(id);
            } else {
                self.txs.remove(&id);
            }
        }
        self.order = survivors;
    }

    pub fn contains(&self, id: &Hash) -> bool {
        self.txs.contains_key(id)
    }

    /// Snapshot of every currently pending transaction, in FIFO order —
    /// the candidate pool `generate_block` draws from (§4.7).
    pub fn iter_in_order(&self) -> impl Iterator<Item = SignedTransaction> + '_ {
        self.order.iter().filter_map(move |id| self.txs.get(id).map(|e| e.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TransactionBody;

    fn tx(expiration: Timestamp) -> SignedTransaction {
        SignedTransaction {
            body: TransactionBody {
                ref_block_num: 0,
                ref_block_prefix: 0,
                expiration,
                messages: vec![],
            },
            signatures: vec![],
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let ledger = Ledger::new();
        let mut q = PendingQueue::new(10, Duration::from_secs(60));
        q.push(tx(100), &ledger, 0).unwrap();
        q.push(tx(200), &ledger, 0).unwrap();
        let first = q.pop_front().unwrap();
        assert_eq!(first.body.expiration, 100);
        let second = q.pop_front().unwrap();
        assert_eq!(second.body.expiration, 200);
    }

    #[test]
    fn duplicate_push_is_a_no_op() {
        let ledger = Ledger::new();
        let mut q = PendingQueue::new(10, Duration::from_secs(60));
        let t = tx(100);
        q.push(t.clone(), &ledger, 0).unwrap();
        q.push(t, &ledger, 0).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn expired_transaction_is_rejected() {
        let ledger = Ledger::new();
        let mut q = PendingQueue::new(10, Duration::from_secs(60));
        let err = q.push(tx(50), &ledger, 100).unwrap_err();
        assert!(matches!(err, ChainError::ExpiredTransaction { .. }));
    }

    #[test]
    fn already_seen_transaction_is_rejected() {
        let mut ledger = Ledger::new();
        let t = tx(1_000);
        ledger.record_recent_transaction(t.id(), t.body.expiration);
        let mut q = PendingQueue::new(10, Duration::from_secs(60));
        let err = q.push(t, &ledger, 0).unwrap_err();
        assert!(matches!(err, ChainError::DuplicateTransaction { .. }));
    }

    #[test]
    fn full_queue_rejects_further_pushes() {
        let ledger = Ledger::new();
        let mut q = PendingQueue::new(1, Duration::from_secs(60));
        q.push(tx(100), &ledger, 0).unwrap();
        let err = q.push(tx(200), &ledger, 0).unwrap_err();
        assert!(matches!(err, ChainError::HandlerAssert { .. }));
    }

    #[test]
    fn clear_expired_drops_only_stale_entries() {
        let ledger = Ledger::new();
        let mut q = PendingQueue::new(10, Duration::from_secs(60));
        q.push(tx(100), &ledger, 0).unwrap();
        q.push(tx(900), &ledger, 0).unwrap();
        q.clear_expired(&ledger, 500);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_front().unwrap().body.expiration, 900);
    }
}
