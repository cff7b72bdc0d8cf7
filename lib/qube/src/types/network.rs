//! The registry document: genesis defaults plus node collections

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Consensus, ExternalNodeEntry, NodeEntry};

/// Network-wide genesis parameters. Also the second link of the defaulting chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Genesis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<Consensus>,
    #[serde(
        rename = "Quorum_Version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub quorum_version: Option<String>,
    /// Genesis keys this crate does not interpret (chain id, tm version, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Full registry document.
///
/// `nodes` and `external_nodes` keep insertion order. Top-level sections this
/// crate does not model survive a load/save cycle through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub genesis: Genesis,
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
    #[serde(rename = "external_nodes", default, skip_serializing_if = "Vec::is_empty")]
    pub external_nodes: Vec<ExternalNodeEntry>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl NetworkConfig {
    pub fn with_genesis(consensus: Consensus, quorum_version: impl Into<String>) -> Self {
        Self {
            genesis: Genesis {
                consensus: Some(consensus),
                quorum_version: Some(quorum_version.into()),
                extra: BTreeMap::new(),
            },
            ..Default::default()
        }
    }
}
