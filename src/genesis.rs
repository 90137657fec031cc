//! The chain initializer interface (§6 "Initializer interface"): the
//! external collaborator responsible for genesis bootstrap — installing
//! initial indices, registering handlers, and naming the first round of
//! producers — consumed once at startup, before block 1 exists.
//!
//! `RawGenesis` is a plain, serde-deserializable description of the
//! starting world plus a builder for assembling one programmatically in
//! tests. Genesis *distribution* over the wire is explicitly out of scope
//! here — §1 names the P2P layer as an external collaborator — so there is
//! no peer-discovery machinery here, only the description format itself.

use std::path::Path;

use eyre::{Context, Result as EyreResult};
use serde::{Deserialize, Serialize};

use crate::config::BlockchainConfiguration;
use crate::registry::HandlerRegistry;
use crate::store::{Account, Authority, Ledger};
use crate::time::Timestamp;
use crate::tx::Message;

/// Implemented by whatever supplies the starting state of the chain.
/// `prepare_database` may register handlers and mutate the ledger directly
/// (installing the genesis accounts and producers); any [`Message`]s it
/// returns are applied, in order, before block 1, the same way a normal
/// block's messages are applied, so genesis effects that *should* go
/// through a handler (rather than being poked into the ledger directly)
/// can do so.
pub trait ChainInitializer {
    fn prepare_database(&self, ledger: &mut Ledger, registry: &mut HandlerRegistry) -> Vec<Message>;
    fn get_chain_start_time(&self) -> Timestamp;
    fn get_chain_start_configuration(&self) -> BlockchainConfiguration;
    fn get_chain_start_producers(&self) -> Vec<String>;
}

/// A plain, serializable description of a starting chain state — the
/// reference `ChainInitializer`, playable straight from a config file or
/// assembled with [`RawGenesisBuilder`] in tests.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawGenesis {
    pub chain_start_time: Timestamp,
    pub configuration: BlockchainConfiguration,
    pub producers: Vec<String>,
    pub accounts: Vec<Account>,
    pub bootstrap_messages: Vec<Message>,
}

impl RawGenesis {
    /// Loads a genesis description from a JSON file, the on-disk format an
    /// operator hands to a node at first startup. Parse failures are
    /// wrapped with the offending path so a bad genesis file is easy to
    /// track down, the same `.wrap_err` habit the crate family uses for
    /// every fallible startup step.
    pub fn from_path(path: impl AsRef<Path>) -> EyreResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading genesis file at {}", path.display()))?;
        serde_json::from_str(&contents)
            .wrap_err_with(|| format!("parsing genesis file at {}", path.display()))
    }
}

impl ChainInitializer for RawGenesis {
    fn prepare_database(&self, ledger: &mut Ledger, _registry: &mut HandlerRegistry) -> Vec<Message> {
        for account in &self.accounts {
            ledger.put_account(account.clone());
        }
        ledger.set_static_config(self.configuration.clone());
        self.bootstrap_messages.clone()
    }

    fn get_chain_start_time(&self) -> Timestamp {
        self.chain_start_time
    }

    fn get_chain_start_configuration(&self) -> BlockchainConfiguration {
        self.configuration.clone()
    }

    fn get_chain_start_producers(&self) -> Vec<String> {
        self.producers.clone()
    }
}

/// Assembles a [`RawGenesis`] incrementally via chained builder calls.
#[derive(Default)]
pub struct RawGenesisBuilder {
    chain_start_time: Timestamp,
    configuration: BlockchainConfiguration,
    producers: Vec<String>,
    accounts: Vec<Account>,
    bootstrap_messages: Vec<Message>,
}

impl RawGenesisBuilder {
    pub fn new() -> Self {
        Self {
            configuration: BlockchainConfiguration::default(),
            ..Default::default()
        }
    }

    pub fn chain_start_time(mut self, time: Timestamp) -> Self {
        self.chain_start_time = time;
        self
    }

    pub fn configuration(mut self, configuration: BlockchainConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn producer(mut self, name: impl Into<String>) -> Self {
        self.producers.push(name.into());
        self
    }

    pub fn account(mut self, name: impl Into<String>, authority: Authority) -> Self {
        self.accounts.push(Account {
            name: name.into(),
            authority,
        });
        self
    }

    pub fn bootstrap_message(mut self, message: Message) -> Self {
        self.bootstrap_messages.push(message);
        self
    }

    pub fn build(self) -> RawGenesis {
        RawGenesis {
            chain_start_time: self.chain_start_time,
            configuration: self.configuration,
            producers: self.producers,
            accounts: self.accounts,
            bootstrap_messages: self.bootstrap_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_accounts_and_producers() {
        let genesis = RawGenesisBuilder::new()
            .chain_start_time(1_000)
            .producer("p1")
            .producer("p2")
            .account(
                "p1",
                Authority {
                    threshold: 1,
                    keys: vec![],
                },
            )
            .build();
        assert_eq!(genesis.get_chain_start_time(), 1_000);
        assert_eq!(genesis.get_chain_start_producers(), vec!["p1", "p2"]);
    }

    #[test]
    fn from_path_round_trips_a_written_genesis() {
        let genesis = RawGenesisBuilder::new()
            .chain_start_time(500)
            .producer("p1")
            .build();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_string(&genesis).unwrap()).unwrap();

        let loaded = RawGenesis::from_path(file.path()).unwrap();
        assert_eq!(loaded.get_chain_start_time(), 500);
        assert_eq!(loaded.get_chain_start_producers(), vec!["p1"]);
    }

    #[test]
    fn from_path_reports_the_missing_file() {
        let err = RawGenesis::from_path("/nonexistent/genesis.json").unwrap_err();
        assert!(err.to_string().contains("genesis.json"));
    }

    #[test]
    fn prepare_database_installs_accounts_and_configuration() {
        let genesis = RawGenesisBuilder::new()
            .account(
                "alice",
                Authority {
                    threshold: 1,
                    keys: vec![],
                },
            )
            .build();
        let mut ledger = Ledger::new();
        let mut registry = HandlerRegistry::new();
        let bootstrap = genesis.prepare_database(&mut ledger, &mut registry);
        assert!(bootstrap.is_empty());
        assert!(ledger.account_exists("alice"));
    }
}
