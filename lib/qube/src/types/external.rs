//! Federated nodes owned by another cluster

use serde::{Deserialize, Serialize};

/// A node from another cluster, tracked only by its reachable addresses.
///
/// No local cluster resources belong to an external node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalNodeEntry {
    #[serde(rename = "Node_UserIdent")]
    pub identity: String,
    #[serde(rename = "Enode_Url")]
    pub enode_url: String,
    #[serde(rename = "Tm_Url")]
    pub tm_url: String,
    /// Account address of the node key, only needed for istanbul networks.
    #[serde(
        rename = "Node_Acct_Addr",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub node_key_address: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExternalNodePatch {
    pub enode_url: Option<String>,
    pub tm_url: Option<String>,
    pub node_key_address: Option<String>,
}

impl ExternalNodePatch {
    pub fn is_empty(&self) -> bool {
        [&self.enode_url, &self.tm_url, &self.node_key_address]
            .iter()
            .all(|f| super::non_empty(f).is_none())
    }
}
