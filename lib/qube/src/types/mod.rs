//! Registry data model

mod external;
mod network;
mod node;

pub use external::*;
pub use network::*;
pub use node::*;

/// Which registry namespace an identity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Node,
    ExternalNode,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Node => write!(f, "node"),
            EntryKind::ExternalNode => write!(f, "external node"),
        }
    }
}

/// Blank strings count as "not supplied" everywhere in the registry.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
