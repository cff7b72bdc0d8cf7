//! Lifecycle Orchestrator - stopping and tearing down nodes
//!
//! Every delete step runs in order. A resource that is already gone counts as
//! done, other controller failures are logged and the sequence moves on. The
//! only fatal delete step is the hard-delete key directory check, which aborts
//! before the registry entry is removed. `stop` has a single step, so any
//! failure other than not-found is returned to the caller.

use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};

use crate::controller::ClusterController;
use crate::error::{ControllerError, QubeError};
use crate::types::{Consensus, ExternalNodeEntry, NetworkConfig, NodeEntry};

/// Key material generated for every node. A hard delete removes exactly these.
pub const KEY_FILES: [&str; 6] = [
    "acctkeyfile.json",
    "enode",
    "nodekey",
    "password.txt",
    "tm.key",
    "tm.pub",
];

/// Container `connect` attaches to when none is given.
pub const DEFAULT_CONTAINER: &str = "quorum";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    StopDeployment,
    RemoveService,
    RemovePersistentVolumeClaim,
    RemoveKeyMaterial,
    RemoveDeploymentFile,
    RemoveRegistryEntry,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Step::StopDeployment => "stop deployment",
            Step::RemoveService => "remove service",
            Step::RemovePersistentVolumeClaim => "remove persistent volume claim",
            Step::RemoveKeyMaterial => "remove key material",
            Step::RemoveDeploymentFile => "remove deployment file",
            Step::RemoveRegistryEntry => "remove registry entry",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// Nothing to remove.
    Absent,
    /// Logged and skipped over.
    Failed(String),
    Skipped(String),
}

impl StepOutcome {
    fn from_controller(step: Step, identity: &str, result: Result<(), ControllerError>) -> Self {
        match result {
            Ok(()) => StepOutcome::Done,
            Err(e) if e.is_not_found() => {
                info!(node = %identity, "{}: not found, ignoring", step);
                StepOutcome::Absent
            }
            Err(e) => {
                warn!(node = %identity, error = %e, "{} failed, continuing", step);
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct StopReport {
    pub identity: String,
    pub outcome: StepOutcome,
    pub next_steps: Vec<String>,
}

#[derive(Debug)]
pub struct DeleteReport {
    pub removed: NodeEntry,
    pub steps: Vec<(Step, StepOutcome)>,
    pub next_steps: Vec<String>,
}

impl DeleteReport {
    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|(_, o)| o.is_failed())
    }
}

#[derive(Debug)]
pub struct ExternalDeleteReport {
    pub removed: ExternalNodeEntry,
    pub next_steps: Vec<String>,
}

fn raft_notice(consensus: Consensus) -> Vec<String> {
    if consensus != Consensus::Raft {
        return Vec::new();
    }
    vec![
        "This is a raft node and has not been removed from the raft cluster.".to_string(),
        "To remove it from the current raft cluster, run on a healthy node:".to_string(),
        "  qctl geth exec node1 'raft.cluster'".to_string(),
        "  qctl geth exec node1 'raft.removePeer(<raftId>)'".to_string(),
    ]
}

/// Drives node teardown through a [`ClusterController`].
pub struct Lifecycle<'a, C: ClusterController + ?Sized> {
    controller: &'a C,
    k8s_dir: Option<PathBuf>,
}

impl<'a, C: ClusterController + ?Sized> Lifecycle<'a, C> {
    pub fn new(controller: &'a C) -> Self {
        Self {
            controller,
            k8s_dir: None,
        }
    }

    /// Root of the generated cluster files: key directories and deployment descriptors.
    pub fn with_k8s_dir(mut self, k8s_dir: impl Into<PathBuf>) -> Self {
        self.k8s_dir = Some(k8s_dir.into());
        self
    }

    /// Remove the node's deployment only. The registry is left untouched.
    ///
    /// An absent deployment is reported as [`StepOutcome::Absent`]; any other
    /// controller failure is an error.
    pub fn stop(&self, config: &NetworkConfig, identity: &str) -> Result<StopReport, QubeError> {
        let node = config.require_node(identity)?;
        info!(node = %identity, "Stopping node");
        let outcome = match self.controller.delete_deployment(identity) {
            Ok(()) => StepOutcome::Done,
            Err(e) if e.is_not_found() => {
                info!(node = %identity, "{}: not found, ignoring", Step::StopDeployment);
                StepOutcome::Absent
            }
            Err(e) => return Err(e.into()),
        };

        let mut next_steps = raft_notice(node.consensus);
        next_steps.push("To restart the node, redeploy the network: qctl deploy network".to_string());
        Ok(StopReport {
            identity: identity.to_string(),
            outcome,
            next_steps,
        })
    }

    /// Tear down every resource the node owns, then drop it from `config`.
    ///
    /// The caller persists `config` afterwards.
    pub fn delete(
        &self,
        config: &mut NetworkConfig,
        identity: &str,
        hard: bool,
    ) -> Result<DeleteReport, QubeError> {
        let node = config.require_node(identity)?.clone();
        info!(node = %identity, hard, "Deleting node");

        // Resolved before anything is touched so a bad Key_Dir aborts cleanly.
        let key_dir = match (&self.k8s_dir, hard) {
            (Some(k8s_dir), true) => Some(key_dir_path(k8s_dir, &node.key_dir)?),
            _ => None,
        };

        let mut steps = Vec::with_capacity(6);
        steps.push((Step::StopDeployment, self.stop_deployment(identity)));
        steps.push((
            Step::RemoveService,
            StepOutcome::from_controller(
                Step::RemoveService,
                identity,
                self.controller.delete_service(identity),
            ),
        ));
        steps.push((
            Step::RemovePersistentVolumeClaim,
            StepOutcome::from_controller(
                Step::RemovePersistentVolumeClaim,
                identity,
                self.controller.delete_persistent_volume_claim(identity),
            ),
        ));

        let key_outcome = match key_dir {
            Some(key_dir) => {
                remove_key_material(&key_dir)?;
                StepOutcome::Done
            }
            None if !hard => StepOutcome::Skipped("soft delete".to_string()),
            None => {
                warn!(node = %identity, "Hard delete requested without a k8s dir, key material kept");
                StepOutcome::Skipped("no k8s dir configured".to_string())
            }
        };
        steps.push((Step::RemoveKeyMaterial, key_outcome));

        steps.push((Step::RemoveDeploymentFile, self.remove_deployment_file(identity)));

        let removed = config.remove_node(identity)?;
        steps.push((Step::RemoveRegistryEntry, StepOutcome::Done));

        Ok(DeleteReport {
            next_steps: raft_notice(removed.consensus),
            removed,
            steps,
        })
    }

    /// External nodes own no cluster resources, so this only edits the registry.
    pub fn delete_external(
        &self,
        config: &mut NetworkConfig,
        identity: &str,
    ) -> Result<ExternalDeleteReport, QubeError> {
        let removed = config.remove_external_node(identity)?;
        Ok(ExternalDeleteReport {
            removed,
            next_steps: vec![
                "Regenerate the network resources to drop the external node from the peer list:"
                    .to_string(),
                "  qctl generate network --update".to_string(),
                "  qctl deploy network".to_string(),
            ],
        })
    }

    /// Open an interactive shell in the first pod whose name starts with `pod_prefix`.
    pub fn connect(&self, pod_prefix: &str, container: Option<&str>) -> Result<(), QubeError> {
        let container = container.unwrap_or(DEFAULT_CONTAINER);
        info!(pod = %pod_prefix, container = %container, "Connecting to pod");
        self.controller
            .exec_interactive_shell(pod_prefix, container)
            .map_err(QubeError::from)
    }

    fn stop_deployment(&self, identity: &str) -> StepOutcome {
        StepOutcome::from_controller(
            Step::StopDeployment,
            identity,
            self.controller.delete_deployment(identity),
        )
    }

    fn remove_deployment_file(&self, identity: &str) -> StepOutcome {
        let Some(k8s_dir) = &self.k8s_dir else {
            return StepOutcome::Skipped("no k8s dir configured".to_string());
        };
        let path = k8s_dir
            .join("deployments")
            .join(format!("{}-quorum-deployment.yaml", identity));
        match std::fs::remove_file(&path) {
            Ok(()) => StepOutcome::Done,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StepOutcome::Absent,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove deployment file, continuing");
                StepOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Key directories live under `<k8s_dir>/config`. Only plain relative paths are
/// accepted so a registry entry can never point the hard delete elsewhere.
fn key_dir_path(k8s_dir: &Path, key_dir: &str) -> Result<PathBuf, QubeError> {
    let relative = Path::new(key_dir.trim());
    let plain = !relative.as_os_str().is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && relative.components().any(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(QubeError::Assertion(format!(
            "Key_Dir [{}] must be a relative directory name inside the k8s config dir",
            key_dir
        )));
    }
    Ok(k8s_dir.join("config").join(relative))
}

/// Remove the known key files, then the directory itself.
///
/// The directory removal fails if anything else is left behind, or if the
/// directory never existed.
fn remove_key_material(key_dir: &Path) -> Result<(), QubeError> {
    info!(key_dir = %key_dir.display(), "Removing key files and directory");
    for file in KEY_FILES {
        let path = key_dir.join(file);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove key file"),
        }
    }

    std::fs::remove_dir(key_dir).map_err(|e| {
        QubeError::Assertion(format!(
            "key directory {} could not be removed ({}); it is missing or holds unexpected files",
            key_dir.display(),
            e
        ))
    })
}
