//! The object store session manager (§4.5) and a reference in-memory
//! object store implementation (§4.9).
//!
//! The production database is explicitly out of scope (§1): a real
//! deployment supplies its own copy-on-write B-tree, shadow-paged arena, or
//! MVCC store. What the controller actually needs from it is narrow enough
//! to write down as a trait — [`Ledger::begin_session`] /
//! `commit_session` / `rollback_session` — and this module's `Ledger` type
//! is simultaneously that trait's reference implementation and the typed
//! schema (`Account`, `ProducerInfo`, `BlockSummary`, dynamic/static
//! globals) the rest of the controller reads and writes.
//!
//! `Ledger` is a directly-owned collection of typed tables behind simple
//! accessor methods, rather than a generic byte-oriented KV, plus the
//! nested-savepoint undo log a single-writer controller needs to revert a
//! transaction, a pending-queue speculative apply, or a whole historical
//! block: the prior value of each table entry is recorded the first time a
//! session touches it, so `rollback_session` is O(delta) rather than
//! O(state).

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::BlockchainConfiguration;
use crate::crypto::{Hash, PublicKey};
use crate::time::Timestamp;

/// A weighted-threshold authority: valid if the signing keys present carry
/// combined weight at least `threshold`. Deliberately single-level (no
/// delegation to other accounts) — see SPEC_FULL.md §3 "Ambient: permission
/// graph" for why the fuller EOS authority graph is out of scope here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub threshold: u32,
    pub keys: Vec<(PublicKey, u32)>,
}

impl Authority {
    pub fn satisfied_by(&self, present_keys: &[PublicKey]) -> bool {
        let weight: u32 = self
            .keys
            .iter()
            .filter(|(k, _)| present_keys.contains(k))
            .map(|(_, w)| *w)
            .sum();
        weight >= self.threshold
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub authority: Authority,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub owner_account: String,
    pub signing_key: PublicKey,
    pub votes_on_configuration: BlockchainConfiguration,
    pub last_produced_block_num: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub id: Hash,
    pub timestamp: Timestamp,
}

/// Mutable per-block data (§3 "Global dynamic properties").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_id: Hash,
    pub head_block_number: u64,
    pub head_block_time: Timestamp,
    pub current_producer: String,
    pub last_irreversible_block_num: u64,
    /// Rolling window of the last `participation_window` slots, one bit per
    /// slot, most recent in the low bit.
    pub participation_bitmap: u128,
    pub recent_slots_filled: u32,
}

impl Default for DynamicGlobalProperties {
    fn default() -> Self {
        Self {
            head_block_id: Hash::ZERO,
            head_block_number: 0,
            head_block_time: 0,
            current_producer: String::new(),
            last_irreversible_block_num: 0,
            participation_bitmap: 0,
            recent_slots_filled: 0,
        }
    }
}

/// One entry in the undo log: the prior state of whatever table slot a
/// session-scoped mutation is about to overwrite. Replaying these in
/// reverse order is exactly `rollback_session`.
enum UndoEntry {
    Account(String, Option<Account>),
    Producer(String, Option<ProducerInfo>),
    BlockSummary(u32, Option<BlockSummary>),
    RecentTransaction(Hash, Option<Timestamp>),
    Dynamic(Box<DynamicGlobalProperties>),
    StaticConfig(Box<BlockchainConfiguration>),
    ProducerSchedule(Box<crate::schedule::ProducerSchedule>),
}

/// The reference object store: typed tables plus a stack of nested
/// savepoints.
pub struct Ledger {
    accounts: HashMap<String, Account>,
    producers: HashMap<String, ProducerInfo>,
    /// Keyed by full block number; trimmed by the controller to the window
    /// needed for TAPoS and expiry checks.
    block_summaries: BTreeMap<u32, BlockSummary>,
    /// Transaction id -> expiration, the "recent transactions" uniqueness
    /// index (§4.4 stage 2).
    recent_transactions: HashMap<Hash, Timestamp>,
    dynamic: DynamicGlobalProperties,
    static_config: BlockchainConfiguration,
    schedule: crate::schedule::ProducerSchedule,

    undo_log: Vec<UndoEntry>,
    session_marks: Vec<usize>,

    /// One retained undo segment per committed block session, oldest at the
    /// front. Ordinary `commit_session` forgets its segment once merged
    /// into the parent; a block-level commit instead keeps its segment here
    /// so [`Self::pop_block_session`] can still undo it later, which is
    /// exactly the "undo window" `pop_block` (§4.7) needs.
    block_checkpoints: VecDeque<Vec<UndoEntry>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            accounts: HashMap::new(),
            producers: HashMap::new(),
            block_summaries: BTreeMap::new(),
            recent_transactions: HashMap::new(),
            dynamic: DynamicGlobalProperties::default(),
            static_config: BlockchainConfiguration::default(),
            schedule: crate::schedule::ProducerSchedule::default(),
            undo_log: Vec::new(),
            session_marks: Vec::new(),
            block_checkpoints: VecDeque::new(),
        }
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // -- session management (§4.5) ------------------------------------

    /// Opens a new nested savepoint. Mutations made after this call are
    /// undone by a matching [`Self::rollback_session`].
    pub fn begin_session(&mut self) {
        self.session_marks.push(self.undo_log.len());
        tracing::trace!(depth = self.session_marks.len(), "session opened");
    }

    /// Merges the innermost savepoint into its parent (or into permanent
    /// state, if this was the outermost session). O(1): commit never
    /// touches the undo entries themselves, it just forgets the boundary.
    pub fn commit_session(&mut self) {
        let popped = self.session_marks.pop();
        debug_assert!(popped.is_some(), "commit_session with no open session");
        tracing::trace!(depth = self.session_marks.len(), "session committed");
    }

    /// Discards every mutation made since the matching `begin_session`,
    /// restoring prior values in reverse order. O(delta).
    pub fn rollback_session(&mut self) {
        let mark = self
            .session_marks
            .pop()
            .expect("rollback_session with no open session");
        while self.undo_log.len() > mark {
            let entry = self.undo_log.pop().expect("checked len above");
            self.apply_undo(entry);
        }
        tracing::trace!(depth = self.session_marks.len(), "session rolled back");
    }

    pub fn session_depth(&self) -> usize {
        self.session_marks.len()
    }

    // -- block-level checkpoints (§4.7 pop_block) ------------------------

    /// Opens the outermost session for a block application. An alias of
    /// [`Self::begin_session`] kept distinct in name so call sites read as
    /// the block/transaction/pending session vocabulary the design uses.
    pub fn begin_block_session(&mut self) {
        self.begin_session();
    }

    /// Commits a block session, but — unlike an ordinary nested commit —
    /// retains its undo segment as a checkpoint so the block can later be
    /// popped with [`Self::pop_block_session`].
    pub fn commit_block_session(&mut self) {
        let mark = self
            .session_marks
            .pop()
            .expect("commit_block_session with no open session");
        let segment = self.undo_log.split_off(mark);
        self.block_checkpoints.push_back(segment);
    }

    /// Reverses the most recently committed block session, in reverse
    /// order, restoring the ledger to its state just before that block was
    /// applied.
    pub fn pop_block_session(&mut self) {
        let segment = self
            .block_checkpoints
            .pop_back()
            .expect("pop_block_session with no committed block to pop");
        for entry in segment.into_iter().rev() {
            self.apply_undo(entry);
        }
    }

    pub fn committed_block_depth(&self) -> usize {
        self.block_checkpoints.len()
    }

    /// Permanently forgets the oldest `count` block checkpoints, called once
    /// those blocks have passed beyond the irreversibility window and can
    /// never legitimately be popped again.
    pub fn forget_oldest_block_checkpoints(&mut self, count: usize) {
        for _ in 0..count.min(self.block_checkpoints.len()) {
            self.block_checkpoints.pop_front();
        }
    }

    fn record(&mut self, entry: UndoEntry) {
        if !self.session_marks.is_empty() {
            self.undo_log.push(entry);
        }
    }

    fn apply_undo(&mut self, entry: UndoEntry) {
        match entry {
            UndoEntry::Account(name, prior) => match prior {
                Some(a) => {
                    self.accounts.insert(name, a);
                }
                None => {
                    self.accounts.remove(&name);
                }
            },
            UndoEntry::Producer(name, prior) => match prior {
                Some(p) => {
                    self.producers.insert(name, p);
                }
                None => {
                    self.producers.remove(&name);
                }
            },
            UndoEntry::BlockSummary(num, prior) => match prior {
                Some(s) => {
                    self.block_summaries.insert(num, s);
                }
                None => {
                    self.block_summaries.remove(&num);
                }
            },
            UndoEntry::RecentTransaction(id, prior) => match prior {
                Some(exp) => {
                    self.recent_transactions.insert(id, exp);
                }
                None => {
                    self.recent_transactions.remove(&id);
                }
            },
            UndoEntry::Dynamic(prior) => self.dynamic = *prior,
            UndoEntry::StaticConfig(prior) => self.static_config = *prior,
            UndoEntry::ProducerSchedule(prior) => self.schedule = *prior,
        }
    }

    // -- accounts -------------------------------------------------------

    pub fn account(&self, name: &str) -> Option<&Account> {
        self.accounts.get(name)
    }

    pub fn put_account(&mut self, account: Account) {
        let prior = self.accounts.get(&account.name).cloned();
        self.record(UndoEntry::Account(account.name.clone(), prior));
        self.accounts.insert(account.name.clone(), account);
    }

    pub fn account_exists(&self, name: &str) -> bool {
        self.accounts.contains_key(name)
    }

    // -- producers --------------------------------------------------------

    pub fn producer(&self, name: &str) -> Option<&ProducerInfo> {
        self.producers.get(name)
    }

    pub fn put_producer(&mut self, producer: ProducerInfo) {
        let prior = self.producers.get(&producer.owner_account).cloned();
        self.record(UndoEntry::Producer(producer.owner_account.clone(), prior));
        self.producers.insert(producer.owner_account.clone(), producer);
    }

    pub fn producers(&self) -> impl Iterator<Item = &ProducerInfo> {
        self.producers.values()
    }

    // -- block summaries / TAPoS -----------------------------------------

    pub fn put_block_summary(&mut self, num: u32, summary: BlockSummary) {
        let prior = self.block_summaries.get(&num).cloned();
        self.record(UndoEntry::BlockSummary(num, prior));
        self.block_summaries.insert(num, summary);
    }

    pub fn block_summary(&self, num: u32) -> Option<&BlockSummary> {
        self.block_summaries.get(&num)
    }

    /// Drops summaries older than `oldest_kept`, freeing memory as the
    /// irreversible window advances. Pruning is not undo-logged: it is only
    /// ever called outside an open session, immediately after an
    /// irreversibility advance has already committed.
    pub fn prune_block_summaries_before(&mut self, oldest_kept: u32) {
        self.block_summaries = self.block_summaries.split_off(&oldest_kept);
    }

    // -- recent transaction / uniqueness index ----------------------------

    pub fn has_recent_transaction(&self, id: &Hash) -> bool {
        self.recent_transactions.contains_key(id)
    }

    pub fn record_recent_transaction(&mut self, id: Hash, expiration: Timestamp) {
        let prior = self.recent_transactions.get(&id).copied();
        self.record(UndoEntry::RecentTransaction(id, prior));
        self.recent_transactions.insert(id, expiration);
    }

    /// Sweeps transaction ids whose expiration is at or before `now`,
    /// outside of any session, the same way the controller's
    /// `clear_expired_transactions` housekeeping does (§4.7).
    pub fn clear_expired_transactions(&mut self, now: Timestamp) {
        self.recent_transactions.retain(|_, exp| *exp > now);
    }

    pub fn recent_transaction_count(&self) -> usize {
        self.recent_transactions.len()
    }

    // -- dynamic / static globals -----------------------------------------

    pub fn dynamic(&self) -> &DynamicGlobalProperties {
        &self.dynamic
    }

    pub fn set_dynamic(&mut self, dynamic: DynamicGlobalProperties) {
        let prior = self.dynamic.clone();
        self.record(UndoEntry::Dynamic(Box::new(prior)));
        self.dynamic = dynamic;
    }

    pub fn static_config(&self) -> &BlockchainConfiguration {
        &self.static_config
    }

    pub fn set_static_config(&mut self, config: BlockchainConfiguration) {
        let prior = self.static_config.clone();
        self.record(UndoEntry::StaticConfig(Box::new(prior)));
        self.static_config = config;
    }

    pub fn schedule(&self) -> &crate::schedule::ProducerSchedule {
        &self.schedule
    }

    pub fn set_schedule(&mut self, schedule: crate::schedule::ProducerSchedule) {
        let prior = self.schedule.clone();
        self.record(UndoEntry::ProducerSchedule(Box::new(prior)));
        self.schedule = schedule;
    }
}
