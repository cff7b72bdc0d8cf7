//! Process-level configuration, validated once at the command boundary.

use std::path::{Path, PathBuf};

use crate::controller::KubeController;
use crate::error::QubeError;
use crate::store::FileRegistryStore;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_KUBECTL: &str = "kubectl";

/// Where the registry lives and how to reach the cluster.
#[derive(Debug, Clone)]
pub struct QubeConfig {
    /// Absolute path of the registry document.
    pub registry_path: PathBuf,
    /// Directory holding generated keys and deployment files.
    pub k8s_dir: Option<PathBuf>,
    pub namespace: String,
    /// Only used to attach interactive shells.
    pub kubectl: String,
}

impl QubeConfig {
    /// Validate raw inputs.
    ///
    /// The registry file must exist. Relative paths are resolved against the
    /// current directory.
    pub fn new(
        registry_path: Option<&Path>,
        k8s_dir: Option<&Path>,
        namespace: Option<&str>,
        kubectl: Option<&str>,
    ) -> Result<Self, QubeError> {
        let cwd = std::env::current_dir()?;
        Self::resolve(&cwd, registry_path, k8s_dir, namespace, kubectl)
    }

    fn resolve(
        cwd: &Path,
        registry_path: Option<&Path>,
        k8s_dir: Option<&Path>,
        namespace: Option<&str>,
        kubectl: Option<&str>,
    ) -> Result<Self, QubeError> {
        let registry_path = registry_path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                QubeError::Validation(
                    "--config flag or QUBE_CONFIG environment variable must be set to your config file"
                        .to_string(),
                )
            })?;
        let registry_path = absolute(cwd, registry_path);
        if !registry_path.is_file() {
            return Err(QubeError::Validation(format!(
                "config file must exist, given [{}]",
                registry_path.display()
            )));
        }

        let k8s_dir = k8s_dir
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| absolute(cwd, p));

        Ok(Self {
            registry_path,
            k8s_dir,
            namespace: namespace
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_NAMESPACE)
                .to_string(),
            kubectl: kubectl
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_KUBECTL)
                .to_string(),
        })
    }

    pub fn store(&self) -> FileRegistryStore {
        FileRegistryStore::new(&self.registry_path)
    }

    /// Kubernetes API controller for `namespace`. No cluster call is made
    /// until the controller is first used.
    pub fn controller(&self) -> Result<KubeController, QubeError> {
        let controller = KubeController::new(&self.namespace)?.with_kubectl(&self.kubectl);
        Ok(match &self.k8s_dir {
            Some(dir) => controller.with_k8s_dir(dir),
            None => controller,
        })
    }
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ClusterController;

    #[test]
    fn test_requires_registry_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = QubeConfig::resolve(dir.path(), None, None, None, None).unwrap_err();
        assert!(matches!(err, QubeError::Validation(_)));

        let empty = Path::new("");
        assert!(QubeConfig::resolve(dir.path(), Some(empty), None, None, None).is_err());
    }

    #[test]
    fn test_registry_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = QubeConfig::resolve(
            dir.path(),
            Some(Path::new("missing.yaml")),
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing.yaml"));
        assert_eq!(err.exit_code(), crate::error::EXIT_VALIDATION);
    }

    #[test]
    fn test_relative_paths_resolved_against_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("qubernetes.yaml"), "genesis: {}\n").unwrap();

        let config = QubeConfig::resolve(
            dir.path(),
            Some(Path::new("qubernetes.yaml")),
            Some(Path::new("out")),
            None,
            None,
        )
        .unwrap();

        assert_eq!(config.registry_path, dir.path().join("qubernetes.yaml"));
        assert_eq!(config.k8s_dir, Some(dir.path().join("out")));
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.kubectl, DEFAULT_KUBECTL);
    }

    #[test]
    fn test_explicit_cluster_settings() {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join("qubernetes.yaml");
        std::fs::write(&registry, "genesis: {}\n").unwrap();

        let config = QubeConfig::resolve(
            Path::new("/elsewhere"),
            Some(registry.as_path()),
            None,
            Some("quorum"),
            Some("/usr/local/bin/kubectl"),
        )
        .unwrap();

        assert_eq!(config.registry_path, registry);
        assert!(config.k8s_dir.is_none());
        assert_eq!(config.namespace, "quorum");
        assert_eq!(config.kubectl, "/usr/local/bin/kubectl");
    }

    #[test]
    fn test_controller_builds_without_cluster_access() {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join("qubernetes.yaml");
        std::fs::write(&registry, "genesis: {}\n").unwrap();
        std::fs::create_dir_all(dir.path().join("out/config")).unwrap();
        std::fs::write(
            dir.path().join("out/config/permissioned-nodes.json"),
            "[\"enode://aa@quorum-node1:30303\"]\n",
        )
        .unwrap();

        let config = QubeConfig::resolve(
            dir.path(),
            Some(registry.as_path()),
            Some(Path::new("out")),
            None,
            None,
        )
        .unwrap();
        let controller = config.controller().unwrap();

        // The peer list comes from the k8s dir, so no kube client is needed.
        let peers = controller.query_peer_descriptor_list().unwrap();
        assert!(peers.contains("@quorum-node1:30303"));
    }
}
