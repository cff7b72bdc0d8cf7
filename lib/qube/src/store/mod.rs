//! Registry storage - loading and saving the whole registry document

pub mod file;

pub use file::FileRegistryStore;

use crate::{error::QubeError, types::NetworkConfig};

/// Persists the registry as a single document. Saves replace it wholesale.
pub trait RegistryStore {
    /// Load and validate the registry. Duplicate identities fail with `Integrity`.
    fn load(&self) -> Result<NetworkConfig, QubeError>;

    /// Replace the stored document with `config`.
    fn save(&self, config: &NetworkConfig) -> Result<(), QubeError>;
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::types::{Consensus, NewNode, TransactionManager};

    /// In-memory store for testing
    struct MemoryStore {
        document: RefCell<Option<NetworkConfig>>,
    }

    impl RegistryStore for MemoryStore {
        fn load(&self) -> Result<NetworkConfig, QubeError> {
            let config = self
                .document
                .borrow()
                .clone()
                .ok_or_else(|| QubeError::Validation("no registry".to_string()))?;
            config.validate()?;
            Ok(config)
        }

        fn save(&self, config: &NetworkConfig) -> Result<(), QubeError> {
            *self.document.borrow_mut() = Some(config.clone());
            Ok(())
        }
    }

    #[test]
    fn test_load_modify_save_cycle() {
        let store = MemoryStore {
            document: RefCell::new(Some(NetworkConfig::with_genesis(Consensus::Raft, "2.5.0"))),
        };

        let mut config = store.load().unwrap();
        config
            .add_node(NewNode {
                tm_name: Some(TransactionManager::Tessera),
                tm_version: Some("0.10.4".to_string()),
                ..NewNode::new("n1")
            })
            .unwrap();
        store.save(&config).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.identities(), vec!["n1"]);
    }

    #[test]
    fn test_load_rejects_duplicates() {
        let mut config = NetworkConfig::with_genesis(Consensus::Raft, "2.5.0");
        config
            .add_node(NewNode {
                tm_name: Some(TransactionManager::Tessera),
                tm_version: Some("0.10.4".to_string()),
                ..NewNode::new("n1")
            })
            .unwrap();
        let dup = config.nodes[0].clone();
        config.nodes.push(dup);

        let store = MemoryStore {
            document: RefCell::new(Some(config)),
        };
        assert!(matches!(store.load(), Err(QubeError::Integrity(_))));
    }
}
