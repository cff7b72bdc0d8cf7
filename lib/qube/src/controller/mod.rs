//! Cluster Resource Controller - the seam between lifecycle logic and the cluster

pub mod cluster;

pub use cluster::KubeController;

use crate::error::ControllerError;

/// Operations the orchestrator and resolver need from the cluster.
///
/// Deletes report an absent resource as `ControllerError::NotFound` so callers
/// can treat it as already done.
pub trait ClusterController {
    fn delete_deployment(&self, identity: &str) -> Result<(), ControllerError>;

    fn delete_persistent_volume_claim(&self, identity: &str) -> Result<(), ControllerError>;

    fn delete_service(&self, identity: &str) -> Result<(), ControllerError>;

    /// Read `resource` (`kind/name`). With a jsonpath, return the selected
    /// value; without one, return the whole resource rendered as YAML.
    fn get_config_value(&self, resource: &str, path: Option<&str>)
    -> Result<String, ControllerError>;

    /// Raw peer-descriptor text, one enode URL per line.
    fn query_peer_descriptor_list(&self) -> Result<String, ControllerError>;

    /// Attach an interactive shell to the first pod matching `pod_selector`.
    fn exec_interactive_shell(&self, pod_selector: &str, container: &str)
    -> Result<(), ControllerError>;
}

/// Deployment resource name for a node.
pub fn deployment_name(identity: &str) -> String {
    format!("{}-deployment", identity)
}

/// Persistent volume claim name for a node.
pub fn pvc_name(identity: &str) -> String {
    format!("{}-pvc", identity)
}

/// Service resource names match the node identity.
pub fn service_name(identity: &str) -> String {
    identity.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names() {
        assert_eq!(deployment_name("quorum-node1"), "quorum-node1-deployment");
        assert_eq!(pvc_name("quorum-node1"), "quorum-node1-pvc");
        assert_eq!(service_name("quorum-node1"), "quorum-node1");
    }
}
