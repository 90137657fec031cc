//! Synchronous signals: `applied_block` and `on_pending_transaction`
//! (§4.8, §6 "Signals").
//!
//! Signals here are synchronous and in-process, fired under the
//! controller's write lock, with the explicit rule that a subscriber must
//! never call back into the controller (§5 "Reentrancy"). An async
//! broadcast channel to a possibly-lagging, multi-consumer audience would
//! be the wrong tool for that contract, so dispatch is just a plain
//! observer list invoked in-line.

use crate::block::SignedBlock;
use crate::tx::SignedTransaction;

pub type AppliedBlockHandler = Box<dyn Fn(&SignedBlock) + Send + Sync>;
pub type PendingTransactionHandler = Box<dyn Fn(&SignedTransaction) + Send + Sync>;

/// The controller's signal dispatcher. Subscribers are added once (usually
/// at startup by the initializer) and fired in registration order.
#[derive(Default)]
pub struct Signals {
    applied_block: Vec<AppliedBlockHandler>,
    on_pending_transaction: Vec<PendingTransactionHandler>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_applied_block(&mut self, handler: AppliedBlockHandler) {
        self.applied_block.push(handler);
    }

    pub fn on_pending_transaction(&mut self, handler: PendingTransactionHandler) {
        self.on_pending_transaction.push(handler);
    }

    /// Fires after a block's session has committed and before pending
    /// transactions are re-queued (§5 "Ordering guarantees").
    pub fn emit_applied_block(&self, block: &SignedBlock) {
        for handler in &self.applied_block {
            handler(block);
        }
    }

    pub fn emit_pending_transaction(&self, tx: &SignedTransaction) {
        for handler in &self.on_pending_transaction {
            handler(tx);
        }
    }
}
