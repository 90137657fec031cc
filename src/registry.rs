//! Handler registry: dispatch table mapping `(contract, scope, action)` to
//! the native callbacks that interpret a [`Message`] (§4.3).
//!
//! Messages name their handler by `(contract, scope, action)` rather than
//! by a closed instruction enum, since contracts register their own
//! handlers at startup and the set of message types is open. Handlers are
//! explicit trait objects (`Box<dyn Fn(...) -> Result<()>>`) rather than
//! `Box<dyn Any>` downcasting, and a missing handler propagates as a
//! `Result` rather than panicking.

use std::collections::HashMap;

use crate::error::{ChainError, Result};
use crate::store::Ledger;
use crate::tx::Message;

/// Checks a message's well-formedness independent of ledger state: pure
/// structural validation (§4.4 stage 7a).
pub type ValidateHandler = Box<dyn Fn(&Message) -> Result<()> + Send + Sync>;

/// Checks a message against current ledger state without mutating it, e.g.
/// "does the recipient account exist" (§4.4 stage 7b).
pub type PreconditionHandler = Box<dyn Fn(&Message, &Ledger) -> Result<()> + Send + Sync>;

/// Applies a message's effect to the ledger (§4.7, inside the transaction
/// session).
pub type ApplyHandler = Box<dyn Fn(&Message, &mut Ledger) -> Result<()> + Send + Sync>;

/// A contract may register a handler for a specific scope, or for
/// [`HandlerRegistry::WILDCARD_SCOPE`] to catch every scope it hasn't
/// registered individually.
pub const WILDCARD_SCOPE: &str = "*";

type HandlerKey = (String, String, String);

fn lookup_key(contract: &str, scope: &str, action: &str) -> HandlerKey {
    (contract.to_string(), scope.to_string(), action.to_string())
}

fn wildcard_key(contract: &str, action: &str) -> HandlerKey {
    (contract.to_string(), WILDCARD_SCOPE.to_string(), action.to_string())
}

/// Three parallel dispatch tables, one per handler kind, all keyed the same
/// way. Registering the same key twice replaces the previous handler —
/// there is no "already registered" error, matching the original source's
/// `set_validate_handler` semantics of last-write-wins.
#[derive(Default)]
pub struct HandlerRegistry {
    validate: HashMap<HandlerKey, ValidateHandler>,
    precondition: HashMap<HandlerKey, PreconditionHandler>,
    apply: HashMap<HandlerKey, ApplyHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_validate(&mut self, contract: &str, scope: &str, action: &str, handler: ValidateHandler) {
        self.validate.insert(lookup_key(contract, scope, action), handler);
    }

    pub fn register_precondition(
        &mut self,
        contract: &str,
        scope: &str,
        action: &str,
        handler: PreconditionHandler,
    ) {
        self.precondition
            .insert(lookup_key(contract, scope, action), handler);
    }

    pub fn register_apply(&mut self, contract: &str, scope: &str, action: &str, handler: ApplyHandler) {
        self.apply.insert(lookup_key(contract, scope, action), handler);
    }

    fn resolve<'a, V>(map: &'a HashMap<HandlerKey, V>, contract: &str, scope: &str, action: &str) -> Option<&'a V> {
        map.get(&lookup_key(contract, scope, action))
            .or_else(|| map.get(&wildcard_key(contract, action)))
    }

    pub fn has_apply_handler(&self, contract: &str, scope: &str, action: &str) -> bool {
        Self::resolve(&self.apply, contract, scope, action).is_some()
    }

    /// Runs the registered validate handler, if any. A missing handler is
    /// not an error at this stage: stateless validation is optional, unlike
    /// `apply` which is mandatory (§4.4).
    pub fn validate(&self, contract: &str, scope: &str, action: &str, message: &Message) -> Result<()> {
        match Self::resolve(&self.validate, contract, scope, action) {
            Some(handler) => handler(message),
            None => Ok(()),
        }
    }

    pub fn precondition_validate(
        &self,
        contract: &str,
        scope: &str,
        action: &str,
        message: &Message,
        ledger: &Ledger,
    ) -> Result<()> {
        match Self::resolve(&self.precondition, contract, scope, action) {
            Some(handler) => handler(message, ledger),
            None => Ok(()),
        }
    }

    /// Runs the registered apply handler. Unlike `validate` and
    /// `precondition_validate`, a missing apply handler is an error: a
    /// message naming an action nobody implements can never take effect,
    /// so admitting it into a block would silently do nothing (§7
    /// `HandlerMissing`).
    pub fn apply(
        &self,
        contract: &str,
        scope: &str,
        action: &str,
        message: &Message,
        ledger: &mut Ledger,
        tx_id: crate::crypto::Hash,
    ) -> Result<()> {
        match Self::resolve(&self.apply, contract, scope, action) {
            Some(handler) => handler(message, ledger),
            None => Err(ChainError::HandlerMissing {
                id: tx_id,
                contract: contract.to_string(),
                scope: scope.to_string(),
                action: action.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash;

    fn sample_message() -> Message {
        Message {
            sender_account: "alice".into(),
            recipient_account: "bob".into(),
            scope: "bob".into(),
            type_name: "transfer".into(),
            payload: vec![],
            authorization: vec!["alice".into()],
        }
    }

    #[test]
    fn unregistered_action_fails_apply_but_passes_validate() {
        let registry = HandlerRegistry::new();
        let message = sample_message();
        assert!(registry.validate("token", "bob", "transfer", &message).is_ok());
        let mut ledger = Ledger::new();
        let err = registry
            .apply("token", "bob", "transfer", &message, &mut ledger, Hash::ZERO)
            .unwrap_err();
        assert!(matches!(err, ChainError::HandlerMissing { .. }));
    }

    #[test]
    fn exact_scope_match_wins_over_wildcard() {
        let mut registry = HandlerRegistry::new();
        registry.register_apply(
            "token",
            WILDCARD_SCOPE,
            "transfer",
            Box::new(|_m, _ledger| Err(ChainError::HandlerAssert {
                id: Hash::ZERO,
                reason: "wildcard".into(),
            })),
        );
        registry.register_apply("token", "bob", "transfer", Box::new(|_m, _ledger| Ok(())));

        let message = sample_message();
        let mut ledger = Ledger::new();
        assert!(registry
            .apply("token", "bob", "transfer", &message, &mut ledger, Hash::ZERO)
            .is_ok());
    }

    #[test]
    fn wildcard_handles_unregistered_scopes() {
        let mut registry = HandlerRegistry::new();
        registry.register_apply("token", WILDCARD_SCOPE, "transfer", Box::new(|_m, _ledger| Ok(())));
        let message = sample_message();
        let mut ledger = Ledger::new();
        assert!(registry
            .apply("token", "carol", "transfer", &message, &mut ledger, Hash::ZERO)
            .is_ok());
    }

    #[test]
    fn re_registering_replaces_prior_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register_apply("token", "bob", "transfer", Box::new(|_m, _ledger| Ok(())));
        registry.register_apply(
            "token",
            "bob",
            "transfer",
            Box::new(|_m, _ledger| {
                Err(ChainError::HandlerAssert {
                    id: Hash::ZERO,
                    reason: "replaced".into(),
                })
            }),
        );
        let message = sample_message();
        let mut ledger = Ledger::new();
        let err = registry
            .apply("token", "bob", "transfer", &message, &mut ledger, Hash::ZERO)
            .unwrap_err();
        assert!(matches!(err, ChainError::HandlerAssert { .. }));
    }
}
