//! Address Resolver - derives network-facing identifiers from cluster state
//!
//! Nothing here is stored in the registry. Every value is recomputed from the
//! controller on demand.

use tracing::{debug, warn};

use crate::controller::{ClusterController, service_name};
use crate::error::{ControllerError, QubeError};
use crate::types::{Consensus, ExternalNodeEntry, NodeEntry};

/// Peer-to-peer port nodes listen on inside the cluster.
pub const DEFAULT_P2P_PORT: &str = "30303";

/// Service port name for quorum p2p traffic.
pub const P2P_PORT_NAME: &str = "quorum-listener";

/// Service port name for the transaction manager.
pub const TM_PORT_NAME: &str = "tm-manager";

const TM_PUBLIC_KEY_LABEL: &str = "tm.pub:";

fn query_failure(what: &'static str, identity: &str, reason: impl ToString) -> QubeError {
    QubeError::ResourceQuery {
        what,
        identity: identity.to_string(),
        reason: reason.to_string(),
    }
}

/// Pick the peer line for `identity` out of a permissioned-nodes listing.
///
/// Prefers a line whose enode authority host is exactly `identity`. Failing
/// that, any line naming `identity` as a whole token, so that `node1` never
/// picks up `node10`.
pub fn extract_enode_line(listing: &str, identity: &str) -> Option<String> {
    let authority = format!("@{}:", identity);
    let line = listing
        .lines()
        .find(|line| line.contains(&authority))
        .or_else(|| listing.lines().find(|line| mentions_token(line, identity)))?;

    let cleaned = line
        .trim()
        .trim_end_matches(',')
        .trim()
        .trim_matches('"')
        .trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Identity characters. A match must not be bordered by any of these.
fn is_identity_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

fn mentions_token(line: &str, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    line.match_indices(token).any(|(start, _)| {
        let before = line[..start].chars().next_back();
        let after = line[start + token.len()..].chars().next();
        !before.is_some_and(is_identity_char) && !after.is_some_and(is_identity_char)
    })
}

/// Replace the in-cluster `<identity>:30303` authority with an externally reachable one.
///
/// When the authority is absent the URL is returned unchanged.
pub fn rewrite_external_address(
    identity: &str,
    internal_enode_url: &str,
    external_host_port: &str,
) -> String {
    let internal = format!("{}:{}", identity, DEFAULT_P2P_PORT);
    if !internal_enode_url.contains(&internal) {
        warn!(
            node = %identity,
            enode_url = %internal_enode_url,
            "Enode URL does not contain {}, leaving it unchanged",
            internal
        );
        return internal_enode_url.to_string();
    }
    internal_enode_url.replace(&internal, external_host_port)
}

/// Value of the `tm.pub:` entry in a rendered configmap. Block scalars
/// (`tm.pub: |`) carry the key on the following line.
fn tm_public_key(document: &str) -> Option<String> {
    let mut lines = document.lines();
    let value = lines.find_map(|line| {
        line.split_once(TM_PUBLIC_KEY_LABEL)
            .map(|(_, value)| value.trim())
    })?;
    let key = if value.starts_with('|') || value.starts_with('>') {
        lines.map(str::trim).find(|l| !l.is_empty())?
    } else {
        value
    };
    let key = key.trim_matches(['"', '\'']);
    (!key.is_empty()).then(|| key.to_string())
}

/// Resolves enode URLs, node-key addresses, tm keys and service ports through a controller.
pub struct AddressResolver<'a, C: ClusterController + ?Sized> {
    controller: &'a C,
}

impl<'a, C: ClusterController + ?Sized> AddressResolver<'a, C> {
    pub fn new(controller: &'a C) -> Self {
        Self { controller }
    }

    /// Enode URL of a node as published in the peer-descriptor list.
    pub fn resolve_enode_url(&self, identity: &str) -> Result<String, QubeError> {
        let listing = self
            .controller
            .query_peer_descriptor_list()
            .map_err(|e| query_failure("enode url", identity, e))?;
        extract_enode_line(&listing, identity).ok_or_else(|| {
            query_failure(
                "enode url",
                identity,
                "node is not in the permissioned node list",
            )
        })
    }

    /// Enode URL with the in-cluster authority replaced by `external_host_port`.
    pub fn resolve_external_address(
        &self,
        identity: &str,
        internal_enode_url: &str,
        external_host_port: &str,
    ) -> String {
        rewrite_external_address(identity, internal_enode_url, external_host_port)
    }

    /// Node-key account address. Only istanbul treats a failed lookup as fatal.
    pub fn resolve_node_key_address(
        &self,
        identity: &str,
        consensus: Consensus,
    ) -> Result<Option<String>, QubeError> {
        let resource = format!("configmap/{}-nodekey-address-config", identity);
        let lookup = self
            .controller
            .get_config_value(&resource, Some("{.data.nodekey}"))
            .map(|raw| raw.replace('\'', "").trim().to_string());

        match (lookup, consensus) {
            (Ok(address), _) if !address.is_empty() => Ok(Some(address)),
            (Ok(_), Consensus::Istanbul) => Err(query_failure(
                "node key address",
                identity,
                format!("{} has no nodekey value", resource),
            )),
            (Err(e), Consensus::Istanbul) => Err(query_failure("node key address", identity, e)),
            (Ok(_), Consensus::Raft) => Ok(None),
            (Err(e), Consensus::Raft) => {
                debug!(node = %identity, error = %e, "No node key address, not required for raft");
                Ok(None)
            }
        }
    }

    /// Transaction manager public key from the node's tm key configmap.
    pub fn resolve_tm_public_key(&self, identity: &str) -> Result<String, QubeError> {
        let resource = format!("configmap/{}-tm-key-config", identity);
        let document = self
            .controller
            .get_config_value(&resource, None)
            .map_err(|e| query_failure("tm public key", identity, e))?;

        tm_public_key(&document).ok_or_else(|| {
            query_failure(
                "tm public key",
                identity,
                format!("{} has no {} entry", resource, TM_PUBLIC_KEY_LABEL),
            )
        })
    }

    /// `<node_ip>:<nodePort>` for a named port on the node's service.
    pub fn resolve_node_port_url(
        &self,
        identity: &str,
        port_name: &str,
        node_ip: &str,
    ) -> Result<String, QubeError> {
        let resource = format!("service/{}", service_name(identity));
        let path = format!("{{.spec.ports[?(@.name==\"{}\")].nodePort}}", port_name);
        let port = self
            .controller
            .get_config_value(&resource, Some(&path))
            .map_err(|e| query_failure("node port", identity, e))?;

        let port = port.replace('\'', "");
        let port = port.trim();
        if port.is_empty() {
            return Err(query_failure(
                "node port",
                identity,
                ControllerError::NotFound(format!("{} has no {} node port", resource, port_name)),
            ));
        }
        port.parse::<u16>()
            .map_err(|e| query_failure("node port", identity, format!("[{}]: {}", port, e)))?;
        Ok(format!("{}:{}", node_ip, port))
    }

    /// How another cluster should register `node` as one of its external nodes.
    pub fn resolve_external_descriptor(
        &self,
        node: &NodeEntry,
        node_ip: &str,
    ) -> Result<ExternalNodeEntry, QubeError> {
        let identity = node.identity.as_str();
        let internal = self.resolve_enode_url(identity)?;
        let p2p = self.resolve_node_port_url(identity, P2P_PORT_NAME, node_ip)?;
        let tm = self.resolve_node_port_url(identity, TM_PORT_NAME, node_ip)?;
        let node_key_address = self.resolve_node_key_address(identity, node.consensus)?;

        Ok(ExternalNodeEntry {
            identity: node.identity.clone(),
            enode_url: self.resolve_external_address(identity, &internal, &p2p),
            tm_url: format!("http://{}", tm),
            node_key_address,
        })
    }
}
