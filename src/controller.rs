//! The controller façade (§4.8): the single public entry point wrapping
//! the fork database, object store, pending queue, handler registry and
//! signals behind the small operation set external callers are allowed to
//! use — `push_block`, `push_transaction`, `generate_block`, `pop_block`,
//! plus fetch/query accessors and the scoped guards.
//!
//! One struct composing the pieces built up by the other modules, exposing
//! a narrow set of methods and leaving orchestration subtleties to its
//! private helpers (here, `applier.rs`). The scoped "save, set, run,
//! restore" guards (`with_skip_flags`, `with_producing`,
//! `without_pending_transactions`) express that pattern with a
//! `Drop`-based guard type rather than a closure-taking method, which
//! keeps call sites free to `?` out of the scope early.

use std::collections::HashMap;

use crate::applier;
use crate::block::SignedBlock;
use crate::blocklog::{BlockLog, MemoryBlockLog};
use crate::config::ControllerConfiguration;
use crate::crypto::{Hash, Signature};
use crate::error::{ChainError, Result};
use crate::event::Signals;
use crate::fork::ForkDatabase;
use crate::genesis::ChainInitializer;
use crate::queue::PendingQueue;
use crate::registry::HandlerRegistry;
use crate::store::Ledger;
use crate::time::Timestamp;
use crate::tx::SignedTransaction;
use crate::validation::TypeSchemaCheck;

/// Everything the block applier needs mutable access to, grouped so
/// `applier.rs` can operate on it without the façade's public surface
/// getting in the way. Fields are `pub(crate)`: this struct is an
/// implementation seam between `controller.rs` and `applier.rs`, not part
/// of the public API.
pub struct ControllerState {
    pub(crate) ledger: Ledger,
    pub(crate) fork_db: ForkDatabase,
    pub(crate) registry: HandlerRegistry,
    pub(crate) queue: PendingQueue,
    pub(crate) signals: Signals,
    pub(crate) config: ControllerConfiguration,
    pub(crate) checkpoints: HashMap<u32, Hash>,
    pub(crate) skip_flags: u32,
    pub(crate) producing: bool,
    pub(crate) pending_open: bool,
    pub(crate) block_log: Box<dyn BlockLog>,
    pub(crate) pending_log_writes: Vec<SignedBlock>,
    pub(crate) type_schema: Option<Box<TypeSchemaCheck>>,
}

/// The chain controller. Construct with [`Controller::new`] (an empty
/// chain) or [`Controller::from_genesis`], then drive it with `push_block`
/// / `push_transaction` / `generate_block`.
pub struct Controller {
    pub(crate) state: ControllerState,
}

impl Controller {
    pub fn new(config: ControllerConfiguration) -> Self {
        let mut state = Self::empty_state(config);
        state.ledger.begin_session();
        state.pending_open = true;
        Self { state }
    }

    /// Builds a controller and runs `initializer.prepare_database`,
    /// applying any bootstrap messages it returns before block 1 exists
    /// (§6 "Initializer interface"). Genesis installs happen with no
    /// session open, so they land as permanent ledger state rather than
    /// inside the pending session `push_block` later discards via
    /// `close_pending` — the pending session is only opened once genesis
    /// is fully in place.
    pub fn from_genesis(mut config: ControllerConfiguration, initializer: &dyn ChainInitializer) -> Result<Self> {
        config.producer_count = config.producer_count.max(1);
        let mut state = Self::empty_state(config);

        let bootstrap = initializer.prepare_database(&mut state.ledger, &mut state.registry);
        state.ledger.set_static_config(initializer.get_chain_start_configuration());
        let schedule = crate::schedule::ProducerSchedule::new(initializer.get_chain_start_producers());
        state.ledger.set_schedule(schedule);

        for message in bootstrap {
            let contract = message.recipient_account.clone();
            let scope = message.scope.clone();
            let action = message.type_name.clone();
            state
                .registry
                .apply(&contract, &scope, &action, &message, &mut state.ledger, Hash::ZERO)?;
        }

        state.ledger.begin_session();
        state.pending_open = true;
        Ok(Self { state })
    }

    fn empty_state(config: ControllerConfiguration) -> ControllerState {
        ControllerState {
            ledger: Ledger::new(),
            fork_db: ForkDatabase::new(),
            registry: HandlerRegistry::new(),
            queue: PendingQueue::new(10_000, std::time::Duration::from_secs(60)),
            signals: Signals::new(),
            config,
            checkpoints: HashMap::new(),
            skip_flags: 0,
            producing: false,
            pending_open: false,
            block_log: Box::new(MemoryBlockLog::default()),
            pending_log_writes: Vec::new(),
            type_schema: None,
        }
    }

    pub fn set_block_log(&mut self, log: Box<dyn BlockLog>) {
        self.state.block_log = log;
    }

    pub fn set_type_schema(&mut self, schema: Box<TypeSchemaCheck>) {
        self.state.type_schema = Some(schema);
    }

    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.state.registry
    }

    pub fn signals_mut(&mut self) -> &mut Signals {
        &mut self.state.signals
    }

    pub fn set_checkpoint(&mut self, block_num: u32, id: Hash) {
        self.state.checkpoints.insert(block_num, id);
    }

    // -- write operations -------------------------------------------------

    pub fn push_block(&mut self, block: SignedBlock) -> Result<bool> {
        let skip = self.state.skip_flags;
        applier::push_block(&mut self.state, block, skip)
    }

    pub fn push_transaction(&mut self, tx: SignedTransaction) -> Result<()> {
        let now = self.state.ledger.dynamic().head_block_time;
        self.state.queue.push(tx.clone(), &self.state.ledger, now)?;
        self.state.signals.emit_pending_transaction(&tx);
        Ok(())
    }

    pub fn generate_block(&mut self, when: Timestamp, producer: String, sign: impl FnOnce(&Hash) -> Signature) -> Result<SignedBlock> {
        let skip = self.state.skip_flags;
        applier::generate_block(&mut self.state, when, producer, skip, sign)
    }

    pub fn pop_block(&mut self) -> Result<SignedBlock> {
        applier::pop_block(&mut self.state)
    }

    pub fn clear_pending(&mut self) {
        if self.state.pending_open {
            self.state.ledger.rollback_session();
        }
        self.state.ledger.begin_session();
        self.state.pending_open = true;
    }

    /// Drains blocks that became irreversible during the most recent write
    /// operation into the block log. Kept separate from the synchronous
    /// write path (§5 "Suspension points: None within the controller") so
    /// the only asynchronous boundary in the crate is this explicit, caller
    /// driven flush.
    pub async fn flush_block_log(&mut self) -> std::io::Result<()> {
        for block in self.state.pending_log_writes.drain(..) {
            self.state.block_log.append(&block).await?;
        }
        Ok(())
    }

    // -- fetch / query accessors -------------------------------------------

    pub fn head_block_id(&self) -> Hash {
        self.state.ledger.dynamic().head_block_id
    }

    pub fn head_block_number(&self) -> u64 {
        self.state.ledger.dynamic().head_block_number
    }

    pub fn head_block_time(&self) -> Timestamp {
        self.state.ledger.dynamic().head_block_time
    }

    pub fn last_irreversible_block_num(&self) -> u64 {
        self.state.ledger.dynamic().last_irreversible_block_num
    }

    pub fn fetch_block_by_id(&self, id: &Hash) -> Option<SignedBlock> {
        self.state.fork_db.get(id).map(|node| node.block)
    }

    pub fn pending_transaction_count(&self) -> usize {
        self.state.queue.len()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.state.ledger
    }

    // -- scoped guards (§9 "Scoped state mutations") -----------------------

    pub fn with_skip_flags(&mut self, flags: u32) -> SkipFlagsGuard<'_> {
        let prior = self.state.skip_flags;
        self.state.skip_flags = flags;
        SkipFlagsGuard {
            controller: self,
            prior,
        }
    }

    pub fn with_producing(&mut self, producing: bool) -> ProducingGuard<'_> {
        let prior = self.state.producing;
        self.state.producing = producing;
        ProducingGuard {
            controller: self,
            prior,
        }
    }

    pub fn without_pending_transactions(&mut self) -> PendingSuppressGuard<'_> {
        let had_session = self.state.pending_open;
        if had_session {
            self.state.ledger.rollback_session();
            self.state.pending_open = false;
        }
        PendingSuppressGuard {
            controller: self,
            had_session,
        }
    }
}

/// Restores the prior skip-flags bitmask on drop, on every exit path
/// including `?`-propagated errors.
pub struct SkipFlagsGuard<'a> {
    controller: &'a mut Controller,
    prior: u32,
}

impl Drop for SkipFlagsGuard<'_> {
    fn drop(&mut self) {
        self.controller.state.skip_flags = self.prior;
    }
}

impl std::ops::Deref for SkipFlagsGuard<'_> {
    type Target = Controller;
    fn deref(&self) -> &Controller {
        self.controller
    }
}

impl std::ops::DerefMut for SkipFlagsGuard<'_> {
    fn deref_mut(&mut self) -> &mut Controller {
        self.controller
    }
}

pub struct ProducingGuard<'a> {
    controller: &'a mut Controller,
    prior: bool,
}

impl Drop for ProducingGuard<'_> {
    fn drop(&mut self) {
        self.controller.state.producing = self.prior;
    }
}

impl std::ops::Deref for ProducingGuard<'_> {
    type Target = Controller;
    fn deref(&self) -> &Controller {
        self.controller
    }
}

impl std::ops::DerefMut for ProducingGuard<'_> {
    fn deref_mut(&mut self) -> &mut Controller {
        self.controller
    }
}

pub struct PendingSuppressGuard<'a> {
    controller: &'a mut Controller,
    had_session: bool,
}

impl Drop for PendingSuppressGuard<'_> {
    fn drop(&mut self) {
        if self.had_session && !self.controller.state.pending_open {
            self.controller.state.ledger.begin_session();
            self.controller.state.pending_open = true;
        }
    }
}

impl std::ops::Deref for PendingSuppressGuard<'_> {
    type Target = Controller;
    fn deref(&self) -> &Controller {
        self.controller
    }
}

impl std::ops::DerefMut for PendingSuppressGuard<'_> {
    fn deref_mut(&mut self) -> &mut Controller {
        self.controller
    }
}

#[allow(unused)]
fn _assert_error_is_stable(_e: ChainError) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_controller_starts_at_genesis_zero() {
        let controller = Controller::new(ControllerConfiguration::default());
        assert_eq!(controller.head_block_number(), 0);
        assert_eq!(controller.last_irreversible_block_num(), 0);
    }

    #[test]
    fn skip_flags_guard_restores_prior_value_on_drop() {
        let mut controller = Controller::new(ControllerConfiguration::default());
        {
            let _guard = controller.with_skip_flags(0xFF);
            assert_eq!(_guard.state.skip_flags, 0xFF);
        }
        assert_eq!(controller.state.skip_flags, 0);
    }

    #[test]
    fn producing_guard_restores_prior_value_even_on_early_return() {
        fn scoped(controller: &mut Controller) -> Option<()> {
            let _guard = controller.with_producing(true);
            None?;
            Some(())
        }
        let mut controller = Controller::new(ControllerConfiguration::default());
        scoped(&mut controller);
        assert!(!controller.state.producing);
    }

    #[test]
    fn without_pending_transactions_reopens_session_on_drop() {
        let mut controller = Controller::new(ControllerConfiguration::default());
        assert!(controller.state.pending_open);
        {
            let _guard = controller.without_pending_transactions();
            assert!(!_guard.state.pending_open);
        }
        assert!(controller.state.pending_open);
    }
}
