//! Member node entries

use serde::{Deserialize, Serialize};

/// Consensus engine a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consensus {
    /// Leader-based; removing a member needs a manual `raft.removePeer`.
    Raft,
    /// IBFT. Every node needs a resolvable node-key address.
    #[serde(alias = "ibft")]
    Istanbul,
}

impl Consensus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Consensus::Raft => "raft",
            Consensus::Istanbul => "istanbul",
        }
    }
}

impl std::str::FromStr for Consensus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raft" => Ok(Consensus::Raft),
            "istanbul" | "ibft" => Ok(Consensus::Istanbul),
            _ => Err(format!("Unknown consensus: {} (expected raft | istanbul)", s)),
        }
    }
}

impl std::fmt::Display for Consensus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Private transaction manager paired with a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionManager {
    Tessera,
    Constellation,
}

impl TransactionManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionManager::Tessera => "tessera",
            TransactionManager::Constellation => "constellation",
        }
    }
}

impl std::str::FromStr for TransactionManager {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tessera" => Ok(TransactionManager::Tessera),
            "constellation" => Ok(TransactionManager::Constellation),
            _ => Err(format!(
                "Unknown transaction manager: {} (expected tessera | constellation)",
                s
            )),
        }
    }
}

impl std::fmt::Display for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A member node of the network, as stored in the registry.
///
/// In memory the entry is flat; on disk it keeps the nested
/// `quorum.quorum` / `quorum.tm` / `geth` layout of the registry document.
///
/// The transaction manager is optional: a node added before any other node
/// exists has nothing to inherit it from, and unset fields are left out of
/// the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "NodeDocument", into = "NodeDocument")]
pub struct NodeEntry {
    pub identity: String,
    pub key_dir: String,
    pub consensus: Consensus,
    pub quorum_version: String,
    pub tm_name: Option<TransactionManager>,
    pub tm_version: Option<String>,
    pub quorum_image: Option<String>,
    pub tm_image: Option<String>,
    pub startup_params: Option<String>,
}

impl NodeEntry {
    /// Default key directory for a node that was added without `--keydir`.
    pub fn default_key_dir(identity: &str) -> String {
        format!("key-{}", identity)
    }
}

/// Candidate for `add_node`. Unset (or blank) fields go through the defaulting chain.
#[derive(Debug, Clone, Default)]
pub struct NewNode {
    pub identity: String,
    pub key_dir: Option<String>,
    pub consensus: Option<Consensus>,
    pub quorum_version: Option<String>,
    pub tm_name: Option<TransactionManager>,
    pub tm_version: Option<String>,
    pub quorum_image: Option<String>,
    pub tm_image: Option<String>,
    pub startup_params: Option<String>,
}

impl NewNode {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Default::default()
        }
    }
}

/// Sparse update for an existing node. Only present, non-blank fields overwrite.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub consensus: Option<Consensus>,
    pub quorum_version: Option<String>,
    pub tm_name: Option<TransactionManager>,
    pub tm_version: Option<String>,
    pub quorum_image: Option<String>,
    pub tm_image: Option<String>,
    pub startup_params: Option<String>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.consensus.is_none()
            && self.tm_name.is_none()
            && [
                &self.quorum_version,
                &self.tm_version,
                &self.quorum_image,
                &self.tm_image,
                &self.startup_params,
            ]
            .iter()
            .all(|f| super::non_empty(f).is_none())
    }
}

// ==================== Registry document layout ====================

#[derive(Serialize, Deserialize)]
struct NodeDocument {
    #[serde(rename = "Node_UserIdent")]
    node_user_ident: String,
    #[serde(rename = "Key_Dir")]
    key_dir: String,
    quorum: QuorumSection,
    #[serde(default, skip_serializing_if = "GethSection::is_empty")]
    geth: GethSection,
}

#[derive(Serialize, Deserialize)]
struct QuorumSection {
    quorum: QuorumSpec,
    #[serde(default, skip_serializing_if = "TmSpec::is_empty")]
    tm: TmSpec,
}

#[derive(Serialize, Deserialize)]
struct QuorumSpec {
    consensus: Consensus,
    #[serde(rename = "Quorum_Version")]
    quorum_version: String,
    #[serde(
        rename = "Docker_Repo_Full",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    docker_repo_full: Option<String>,
}

#[derive(Default, Serialize, Deserialize)]
struct TmSpec {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    name: Option<TransactionManager>,
    #[serde(
        rename = "Tm_Version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    tm_version: Option<String>,
    #[serde(
        rename = "Docker_Repo_Full",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    docker_repo_full: Option<String>,
}

impl TmSpec {
    fn is_empty(&self) -> bool {
        self.name.is_none() && self.tm_version.is_none() && self.docker_repo_full.is_none()
    }
}

#[derive(Default, Serialize, Deserialize)]
struct GethSection {
    #[serde(
        rename = "Geth_Startup_Params",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    startup_params: Option<String>,
}

impl GethSection {
    fn is_empty(&self) -> bool {
        self.startup_params.is_none()
    }
}

impl From<NodeDocument> for NodeEntry {
    fn from(doc: NodeDocument) -> Self {
        Self {
            identity: doc.node_user_ident,
            key_dir: doc.key_dir,
            consensus: doc.quorum.quorum.consensus,
            quorum_version: doc.quorum.quorum.quorum_version,
            tm_name: doc.quorum.tm.name,
            tm_version: doc.quorum.tm.tm_version,
            quorum_image: doc.quorum.quorum.docker_repo_full,
            tm_image: doc.quorum.tm.docker_repo_full,
            startup_params: doc.geth.startup_params,
        }
    }
}

impl From<NodeEntry> for NodeDocument {
    fn from(entry: NodeEntry) -> Self {
        Self {
            node_user_ident: entry.identity,
            key_dir: entry.key_dir,
            quorum: QuorumSection {
                quorum: QuorumSpec {
                    consensus: entry.consensus,
                    quorum_version: entry.quorum_version,
                    docker_repo_full: entry.quorum_image,
                },
                tm: TmSpec {
                    name: entry.tm_name,
                    tm_version: entry.tm_version,
                    docker_repo_full: entry.tm_image,
                },
            },
            geth: GethSection {
                startup_params: entry.startup_params,
            },
        }
    }
}
