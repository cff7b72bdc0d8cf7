//! Node Registry - identity-checked CRUD over the registry document
//!
//! Pure in-memory logic. Loading and saving go through [`crate::store::RegistryStore`].

use tracing::{debug, info};

use crate::error::QubeError;
use crate::types::{
    EntryKind, ExternalNodeEntry, ExternalNodePatch, NetworkConfig, NewNode, NodeEntry, NodePatch,
    non_empty,
};

/// Field toggles for rendering listed nodes. Carries no registry logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Projection {
    pub name: bool,
    pub key_dir: bool,
    pub consensus: bool,
    pub quorum_version: bool,
    pub tm_name: bool,
    pub tm_version: bool,
    pub enode_url: bool,
    pub quorum_image: bool,
    pub tm_image: bool,
    pub startup_params: bool,
}

impl Projection {
    pub fn all() -> Self {
        Self {
            name: true,
            key_dir: true,
            consensus: true,
            quorum_version: true,
            tm_name: true,
            tm_version: true,
            enode_url: true,
            quorum_image: true,
            tm_image: true,
            startup_params: true,
        }
    }
}

/// Result of a `list` call.
#[derive(Debug)]
pub struct Listing<'a, T> {
    pub filter: Option<String>,
    pub matches: Vec<&'a T>,
    /// Every identity in the listed namespace, in registry order.
    pub known: Vec<String>,
    pub projection: Projection,
}

impl<T> Listing<'_, T> {
    /// A named entry was asked for and is not in the registry.
    pub fn is_miss(&self) -> bool {
        self.filter.is_some() && self.matches.is_empty()
    }
}

trait Identified {
    fn identity(&self) -> &str;
}

impl Identified for NodeEntry {
    fn identity(&self) -> &str {
        &self.identity
    }
}

impl Identified for ExternalNodeEntry {
    fn identity(&self) -> &str {
        &self.identity
    }
}

fn position<T: Identified>(entries: &[T], identity: &str) -> Option<usize> {
    entries.iter().position(|e| e.identity() == identity)
}

fn identities<T: Identified>(entries: &[T]) -> Vec<String> {
    entries.iter().map(|e| e.identity().to_string()).collect()
}

fn find_duplicate<T: Identified>(entries: &[T]) -> Option<&str> {
    let mut seen = std::collections::HashSet::new();
    entries
        .iter()
        .map(Identified::identity)
        .find(|identity| !seen.insert(*identity))
}

fn required(value: &str, what: &str) -> Result<String, QubeError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(QubeError::Validation(format!("{} is required", what)));
    }
    Ok(value.to_string())
}

fn overwrite(target: &mut String, value: &Option<String>) {
    if let Some(v) = non_empty(value) {
        *target = v.to_string();
    }
}

fn overwrite_opt(target: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = non_empty(value) {
        *target = Some(v.to_string());
    }
}

impl NetworkConfig {
    // ==================== Lookups ====================

    pub fn node(&self, identity: &str) -> Option<&NodeEntry> {
        self.nodes.iter().find(|n| n.identity == identity)
    }

    pub fn external_node(&self, identity: &str) -> Option<&ExternalNodeEntry> {
        self.external_nodes.iter().find(|n| n.identity == identity)
    }

    pub fn identities(&self) -> Vec<String> {
        identities(&self.nodes)
    }

    pub fn external_identities(&self) -> Vec<String> {
        identities(&self.external_nodes)
    }

    /// Node lookup that fails with the known identities attached.
    pub fn require_node(&self, identity: &str) -> Result<&NodeEntry, QubeError> {
        self.node(identity)
            .ok_or_else(|| QubeError::not_found(EntryKind::Node, identity, self.identities()))
    }

    /// Reject documents whose collections repeat an identity.
    pub fn validate(&self) -> Result<(), QubeError> {
        if let Some(dup) = find_duplicate(&self.nodes) {
            return Err(QubeError::Integrity(format!(
                "node [{}] appears more than once in nodes",
                dup
            )));
        }
        if let Some(dup) = find_duplicate(&self.external_nodes) {
            return Err(QubeError::Integrity(format!(
                "external node [{}] appears more than once in external_nodes",
                dup
            )));
        }
        Ok(())
    }

    // ==================== Nodes ====================

    /// Add a node, resolving unset fields: explicit > genesis > first node (tm only).
    pub fn add_node(&mut self, candidate: NewNode) -> Result<&NodeEntry, QubeError> {
        let identity = required(&candidate.identity, "unique node name")?;
        if self.node(&identity).is_some() {
            return Err(QubeError::DuplicateIdentity {
                kind: EntryKind::Node,
                identity,
            });
        }

        let first = self.nodes.first();
        let key_dir = non_empty(&candidate.key_dir)
            .map(str::to_string)
            .unwrap_or_else(|| NodeEntry::default_key_dir(&identity));
        let consensus = candidate
            .consensus
            .or(self.genesis.consensus)
            .ok_or_else(|| {
                QubeError::Validation(
                    "consensus not set and genesis has no default consensus".to_string(),
                )
            })?;
        let quorum_version = non_empty(&candidate.quorum_version)
            .or(non_empty(&self.genesis.quorum_version))
            .map(str::to_string)
            .ok_or_else(|| {
                QubeError::Validation(
                    "quorum version not set and genesis has no Quorum_Version".to_string(),
                )
            })?;
        // No source for the transaction manager leaves it unset.
        let tm_name = candidate.tm_name.or(first.and_then(|n| n.tm_name));
        let tm_version = non_empty(&candidate.tm_version)
            .map(str::to_string)
            .or(first.and_then(|n| n.tm_version.clone()));
        if tm_name.is_none() || tm_version.is_none() {
            debug!(node = %identity, "Transaction manager not fully set and nothing to inherit it from");
        }

        let entry = NodeEntry {
            identity,
            key_dir,
            consensus,
            quorum_version,
            tm_name,
            tm_version,
            quorum_image: non_empty(&candidate.quorum_image).map(str::to_string),
            tm_image: non_empty(&candidate.tm_image).map(str::to_string),
            startup_params: non_empty(&candidate.startup_params).map(str::to_string),
        };

        info!(
            node = %entry.identity,
            key_dir = %entry.key_dir,
            consensus = %entry.consensus,
            "Adding node ({} nodes currently configured)",
            self.nodes.len()
        );
        self.nodes.push(entry);
        Ok(&self.nodes[self.nodes.len() - 1])
    }

    pub fn update_node(&mut self, identity: &str, patch: NodePatch) -> Result<&NodeEntry, QubeError> {
        let idx = position(&self.nodes, identity)
            .ok_or_else(|| QubeError::not_found(EntryKind::Node, identity, self.identities()))?;
        if patch.is_empty() {
            debug!(node = %identity, "Empty patch, node left unchanged");
        }

        let node = &mut self.nodes[idx];
        if let Some(consensus) = patch.consensus {
            node.consensus = consensus;
        }
        if let Some(tm_name) = patch.tm_name {
            node.tm_name = Some(tm_name);
        }
        overwrite(&mut node.quorum_version, &patch.quorum_version);
        overwrite_opt(&mut node.tm_version, &patch.tm_version);
        overwrite_opt(&mut node.quorum_image, &patch.quorum_image);
        overwrite_opt(&mut node.tm_image, &patch.tm_image);
        overwrite_opt(&mut node.startup_params, &patch.startup_params);

        info!(node = %identity, "Updated node");
        Ok(&self.nodes[idx])
    }

    /// Remove exactly one entry: the first whose identity matches.
    pub fn remove_node(&mut self, identity: &str) -> Result<NodeEntry, QubeError> {
        let idx = position(&self.nodes, identity)
            .ok_or_else(|| QubeError::not_found(EntryKind::Node, identity, self.identities()))?;
        let removed = self.nodes.remove(idx);
        info!(node = %identity, "Removed node from registry");
        Ok(removed)
    }

    pub fn list(&self, filter: Option<&str>, projection: Projection) -> Listing<'_, NodeEntry> {
        Listing {
            filter: filter.map(str::to_string),
            matches: self
                .nodes
                .iter()
                .filter(|n| filter.is_none_or(|f| n.identity == f))
                .collect(),
            known: self.identities(),
            projection,
        }
    }

    // ==================== External Nodes ====================

    pub fn add_external_node(
        &mut self,
        candidate: ExternalNodeEntry,
    ) -> Result<&ExternalNodeEntry, QubeError> {
        let identity = required(&candidate.identity, "unique external node name")?;
        if self.external_node(&identity).is_some() {
            return Err(QubeError::DuplicateIdentity {
                kind: EntryKind::ExternalNode,
                identity,
            });
        }

        let entry = ExternalNodeEntry {
            identity,
            enode_url: required(&candidate.enode_url, "enode url")?,
            tm_url: required(&candidate.tm_url, "transaction manager url")?,
            node_key_address: non_empty(&candidate.node_key_address).map(str::to_string),
        };

        info!(external_node = %entry.identity, "Adding external node");
        self.external_nodes.push(entry);
        Ok(&self.external_nodes[self.external_nodes.len() - 1])
    }

    pub fn update_external_node(
        &mut self,
        identity: &str,
        patch: ExternalNodePatch,
    ) -> Result<&ExternalNodeEntry, QubeError> {
        let idx = position(&self.external_nodes, identity).ok_or_else(|| {
            QubeError::not_found(EntryKind::ExternalNode, identity, self.external_identities())
        })?;

        let node = &mut self.external_nodes[idx];
        overwrite(&mut node.enode_url, &patch.enode_url);
        overwrite(&mut node.tm_url, &patch.tm_url);
        overwrite_opt(&mut node.node_key_address, &patch.node_key_address);

        info!(external_node = %identity, "Updated external node");
        Ok(&self.external_nodes[idx])
    }

    pub fn remove_external_node(&mut self, identity: &str) -> Result<ExternalNodeEntry, QubeError> {
        let idx = position(&self.external_nodes, identity).ok_or_else(|| {
            QubeError::not_found(EntryKind::ExternalNode, identity, self.external_identities())
        })?;
        let removed = self.external_nodes.remove(idx);
        info!(external_node = %identity, "Removed external node from registry");
        Ok(removed)
    }

    pub fn list_external(
        &self,
        filter: Option<&str>,
        projection: Projection,
    ) -> Listing<'_, ExternalNodeEntry> {
        Listing {
            filter: filter.map(str::to_string),
            matches: self
                .external_nodes
                .iter()
                .filter(|n| filter.is_none_or(|f| n.identity == f))
                .collect(),
            known: self.external_identities(),
            projection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Consensus, TransactionManager};

    fn registry() -> NetworkConfig {
        NetworkConfig::with_genesis(Consensus::Raft, "2.5.0")
    }

    fn seeded() -> NetworkConfig {
        let mut config = registry();
        config
            .add_node(NewNode {
                tm_name: Some(TransactionManager::Tessera),
                tm_version: Some("0.10.4".to_string()),
                ..NewNode::new("n1")
            })
            .unwrap();
        config
            .add_node(NewNode {
                consensus: Some(Consensus::Istanbul),
                ..NewNode::new("n2")
            })
            .unwrap();
        config
    }

    fn external(identity: &str) -> ExternalNodeEntry {
        ExternalNodeEntry {
            identity: identity.to_string(),
            enode_url: "enode://abcd@10.0.0.1:30303".to_string(),
            tm_url: "http://10.0.0.1:9001".to_string(),
            node_key_address: None,
        }
    }

    // ==================== Add ====================

    #[test]
    fn test_add_node_defaults_from_genesis() {
        let mut config = registry();
        let node = config
            .add_node(NewNode {
                quorum_version: Some(String::new()),
                ..NewNode::new("n1")
            })
            .unwrap();

        assert_eq!(node.consensus, Consensus::Raft);
        assert_eq!(node.quorum_version, "2.5.0");
        assert_eq!(node.key_dir, "key-n1");
        assert_eq!(config.nodes.len(), 1);
    }

    #[test]
    fn test_add_node_explicit_wins_over_defaults() {
        let mut config = seeded();
        let node = config
            .add_node(NewNode {
                key_dir: Some("custom-keys".to_string()),
                consensus: Some(Consensus::Istanbul),
                quorum_version: Some("2.6.0".to_string()),
                tm_name: Some(TransactionManager::Constellation),
                tm_version: Some("0.3.2".to_string()),
                quorum_image: Some("repo/quorum:2.6.0".to_string()),
                ..NewNode::new("n3")
            })
            .unwrap();

        assert_eq!(node.key_dir, "custom-keys");
        assert_eq!(node.consensus, Consensus::Istanbul);
        assert_eq!(node.quorum_version, "2.6.0");
        assert_eq!(node.tm_name, Some(TransactionManager::Constellation));
        assert_eq!(node.tm_version.as_deref(), Some("0.3.2"));
        assert_eq!(node.quorum_image.as_deref(), Some("repo/quorum:2.6.0"));
    }

    #[test]
    fn test_add_node_inherits_tm_from_first_node() {
        let config = seeded();
        let n2 = config.node("n2").unwrap();

        assert_eq!(n2.tm_name, Some(TransactionManager::Tessera));
        assert_eq!(n2.tm_version.as_deref(), Some("0.10.4"));
        assert_eq!(n2.quorum_version, "2.5.0");
    }

    #[test]
    fn test_add_node_without_tm_source_leaves_tm_unset() {
        let mut config = registry();
        let node = config.add_node(NewNode::new("n1")).unwrap();

        assert_eq!(node.tm_name, None);
        assert_eq!(node.tm_version, None);

        // Later nodes inherit nothing from a first node without a tm.
        let n2 = config
            .add_node(NewNode {
                tm_version: Some("0.10.4".to_string()),
                ..NewNode::new("n2")
            })
            .unwrap();
        assert_eq!(n2.tm_name, None);
        assert_eq!(n2.tm_version.as_deref(), Some("0.10.4"));
    }

    #[test]
    fn test_update_node_sets_tm_on_node_without_one() {
        let mut config = registry();
        config.add_node(NewNode::new("n1")).unwrap();

        let node = config
            .update_node(
                "n1",
                NodePatch {
                    tm_name: Some(TransactionManager::Tessera),
                    tm_version: Some("0.10.4".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(node.tm_name, Some(TransactionManager::Tessera));
        assert_eq!(node.tm_version.as_deref(), Some("0.10.4"));
    }

    #[test]
    fn test_add_node_without_genesis_consensus_fails() {
        let mut config = NetworkConfig::default();
        let result = config.add_node(NewNode {
            tm_name: Some(TransactionManager::Tessera),
            tm_version: Some("0.10.4".to_string()),
            quorum_version: Some("2.5.0".to_string()),
            ..NewNode::new("n1")
        });

        assert!(matches!(result, Err(QubeError::Validation(msg)) if msg.contains("consensus")));
    }

    #[test]
    fn test_add_node_duplicate_identity_leaves_registry_unchanged() {
        let mut config = seeded();
        let before = config.clone();

        let result = config.add_node(NewNode {
            consensus: Some(Consensus::Istanbul),
            ..NewNode::new("n1")
        });

        assert!(matches!(
            result,
            Err(QubeError::DuplicateIdentity { kind: EntryKind::Node, ref identity }) if identity == "n1"
        ));
        assert_eq!(config, before);
    }

    #[test]
    fn test_add_node_requires_identity() {
        let mut config = seeded();
        assert!(matches!(
            config.add_node(NewNode::new("  ")),
            Err(QubeError::Validation(_))
        ));
    }

    #[test]
    fn test_add_node_preserves_insertion_order() {
        let mut config = seeded();
        config.add_node(NewNode::new("a-node")).unwrap();
        assert_eq!(config.identities(), vec!["n1", "n2", "a-node"]);
    }

    // ==================== Update ====================

    #[test]
    fn test_update_node_is_sparse() {
        let mut config = seeded();
        let before = config.node("n1").unwrap().clone();

        let node = config
            .update_node(
                "n1",
                NodePatch {
                    consensus: Some(Consensus::Istanbul),
                    quorum_version: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(node.consensus, Consensus::Istanbul);
        assert_eq!(node.quorum_version, before.quorum_version);
        assert_eq!(node.key_dir, "key-n1");
        assert_eq!(node.tm_name, before.tm_name);
        assert_eq!(node.tm_version, before.tm_version);
        assert_eq!(node.startup_params, None);
    }

    #[test]
    fn test_update_node_sets_optional_fields() {
        let mut config = seeded();
        let node = config
            .update_node(
                "n2",
                NodePatch {
                    tm_image: Some("quorumengineering/tessera:0.10.5".to_string()),
                    startup_params: Some("--verbosity 5".to_string()),
                    tm_version: Some("0.10.5".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(node.tm_image.as_deref(), Some("quorumengineering/tessera:0.10.5"));
        assert_eq!(node.startup_params.as_deref(), Some("--verbosity 5"));
        assert_eq!(node.tm_version.as_deref(), Some("0.10.5"));
    }

    #[test]
    fn test_update_unknown_node_fails() {
        let mut config = seeded();
        let result = config.update_node("n9", NodePatch::default());

        match result {
            Err(QubeError::NotFound { identity, known, .. }) => {
                assert_eq!(identity, "n9");
                assert_eq!(known, vec!["n1", "n2"]);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    // ==================== Remove ====================

    #[test]
    fn test_remove_node_returns_entry() {
        let mut config = seeded();
        let removed = config.remove_node("n1").unwrap();

        assert_eq!(removed.identity, "n1");
        assert_eq!(config.identities(), vec!["n2"]);
    }

    #[test]
    fn test_remove_node_only_removes_first_match() {
        let mut config = seeded();
        let mut dup = config.node("n1").unwrap().clone();
        dup.key_dir = "second-copy".to_string();
        config.nodes.push(dup);

        let removed = config.remove_node("n1").unwrap();

        assert_eq!(removed.key_dir, "key-n1");
        assert_eq!(config.identities(), vec!["n2", "n1"]);
    }

    #[test]
    fn test_remove_missing_node_fails() {
        let mut config = seeded();
        assert!(matches!(
            config.remove_node("n9"),
            Err(QubeError::NotFound { kind: EntryKind::Node, .. })
        ));
        assert_eq!(config.nodes.len(), 2);
    }

    // ==================== Validate ====================

    #[test]
    fn test_validate_detects_duplicates() {
        let mut config = seeded();
        assert!(config.validate().is_ok());

        let dup = config.nodes[0].clone();
        config.nodes.push(dup);
        assert!(matches!(config.validate(), Err(QubeError::Integrity(_))));
    }

    #[test]
    fn test_validate_namespaces_are_separate() {
        let mut config = seeded();
        config.add_external_node(external("n1")).unwrap();
        assert!(config.validate().is_ok());

        config.external_nodes.push(external("n1"));
        assert!(matches!(config.validate(), Err(QubeError::Integrity(_))));
    }

    // ==================== List ====================

    #[test]
    fn test_list_all() {
        let config = seeded();
        let listing = config.list(None, Projection::default());

        assert_eq!(listing.matches.len(), 2);
        assert!(!listing.is_miss());
    }

    #[test]
    fn test_list_exact_match() {
        let config = seeded();
        let listing = config.list(Some("n2"), Projection::all());

        assert_eq!(listing.matches.len(), 1);
        assert_eq!(listing.matches[0].identity, "n2");
        assert!(listing.projection.enode_url);
    }

    #[test]
    fn test_list_unknown_surfaces_known_identities() {
        let config = seeded();
        let listing = config.list(Some("nonexistent"), Projection::default());

        assert!(listing.matches.is_empty());
        assert!(listing.is_miss());
        assert_eq!(listing.known, vec!["n1", "n2"]);
    }

    // ==================== External Nodes ====================

    #[test]
    fn test_add_external_node() {
        let mut config = seeded();
        let entry = config
            .add_external_node(ExternalNodeEntry {
                node_key_address: Some("   ".to_string()),
                ..external("fed-1")
            })
            .unwrap();

        assert_eq!(entry.identity, "fed-1");
        assert!(entry.node_key_address.is_none());
        assert_eq!(config.external_identities(), vec!["fed-1"]);
    }

    #[test]
    fn test_add_external_node_duplicate() {
        let mut config = seeded();
        config.add_external_node(external("fed-1")).unwrap();
        let result = config.add_external_node(external("fed-1"));

        assert!(matches!(
            result,
            Err(QubeError::DuplicateIdentity { kind: EntryKind::ExternalNode, .. })
        ));
        assert_eq!(config.external_nodes.len(), 1);
    }

    #[test]
    fn test_add_external_node_requires_urls() {
        let mut config = seeded();
        let result = config.add_external_node(ExternalNodeEntry {
            enode_url: String::new(),
            ..external("fed-1")
        });
        assert!(matches!(result, Err(QubeError::Validation(_))));
    }

    #[test]
    fn test_update_external_node_is_sparse() {
        let mut config = seeded();
        config.add_external_node(external("fed-1")).unwrap();

        let entry = config
            .update_external_node(
                "fed-1",
                ExternalNodePatch {
                    tm_url: Some("http://10.0.0.2:9001".to_string()),
                    enode_url: Some(String::new()),
                    node_key_address: Some("0xabc".to_string()),
                },
            )
            .unwrap();

        assert_eq!(entry.tm_url, "http://10.0.0.2:9001");
        assert_eq!(entry.enode_url, "enode://abcd@10.0.0.1:30303");
        assert_eq!(entry.node_key_address.as_deref(), Some("0xabc"));
    }

    #[test]
    fn test_external_namespace_does_not_see_nodes() {
        let mut config = seeded();
        let result = config.remove_external_node("n1");

        match result {
            Err(QubeError::NotFound { kind, known, .. }) => {
                assert_eq!(kind, EntryKind::ExternalNode);
                assert!(known.is_empty());
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
        assert_eq!(config.nodes.len(), 2);
    }

    #[test]
    fn test_list_external_filter() {
        let mut config = seeded();
        config.add_external_node(external("fed-1")).unwrap();
        config.add_external_node(external("fed-2")).unwrap();

        let listing = config.list_external(Some("fed-2"), Projection::default());
        assert_eq!(listing.matches.len(), 1);

        let miss = config.list_external(Some("n1"), Projection::default());
        assert!(miss.is_miss());
        assert_eq!(miss.known, vec!["fed-1", "fed-2"]);
    }
}
