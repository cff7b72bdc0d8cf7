//! Kubernetes API backed controller
//!
//! Deletes and reads go through `kube` with typed `k8s-openapi` resources,
//! driven on a private runtime. Only the interactive shell is handed to
//! `kubectl exec`, which owns the terminal for the life of the session.

use std::cell::OnceCell;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::Command;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::debug;

use super::{ClusterController, deployment_name, pvc_name, service_name};
use crate::error::ControllerError;

/// Configmap holding the permissioned node list when no k8s dir is configured.
pub const PERMISSIONED_CONFIGMAP: &str = "quorum-permissioned-config";

/// Data key of the peer list inside [`PERMISSIONED_CONFIGMAP`].
pub const PERMISSIONED_NODES_KEY: &str = "permissioned-nodes.json";

const ERROR_NOT_FOUND: u16 = 404;

/// Talks to the cluster through the Kubernetes API.
///
/// The client is built from the ambient kubeconfig (or in-cluster config) on
/// first use, so registry-only commands never need cluster access.
pub struct KubeController {
    namespace: String,
    kubectl: String,
    k8s_dir: Option<PathBuf>,
    client: OnceCell<Client>,
    runtime: Runtime,
}

impl KubeController {
    pub fn new(namespace: impl Into<String>) -> Result<Self, ControllerError> {
        let runtime = Runtime::new()
            .map_err(|e| ControllerError::Failed(format!("failed to start runtime: {}", e)))?;
        Ok(Self {
            namespace: namespace.into(),
            kubectl: "kubectl".to_string(),
            k8s_dir: None,
            client: OnceCell::new(),
            runtime,
        })
    }

    /// Binary used for `exec_interactive_shell`.
    pub fn with_kubectl(mut self, kubectl: impl Into<String>) -> Self {
        self.kubectl = kubectl.into();
        self
    }

    /// Read the peer list from `<k8s_dir>/config/permissioned-nodes.json`.
    pub fn with_k8s_dir(mut self, k8s_dir: impl Into<PathBuf>) -> Self {
        self.k8s_dir = Some(k8s_dir.into());
        self
    }

    fn client(&self) -> Result<&Client, ControllerError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = self
            .runtime
            .block_on(Client::try_default())
            .map_err(|e| ControllerError::Failed(format!("unable to build kube client: {}", e)))?;
        Ok(self.client.get_or_init(|| client))
    }

    fn api<K>(&self) -> Result<Api<K>, ControllerError>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Ok(Api::namespaced(self.client()?.clone(), &self.namespace))
    }

    fn delete<K>(&self, name: &str) -> Result<(), ControllerError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).into_owned();
        debug!(kind = %kind, name = %name, namespace = %self.namespace, "Deleting resource");
        let api: Api<K> = self.api()?;
        self.runtime
            .block_on(api.delete(name, &DeleteParams::default()))
            .map(|_| ())
            .map_err(|e| classify(&format!("{}/{}", kind, name), e))
    }

    fn fetch<K>(&self, name: &str) -> Result<Value, ControllerError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).into_owned();
        debug!(kind = %kind, name = %name, namespace = %self.namespace, "Reading resource");
        let api: Api<K> = self.api()?;
        let object = self
            .runtime
            .block_on(api.get(name))
            .map_err(|e| classify(&format!("{}/{}", kind, name), e))?;
        serde_json::to_value(&object)
            .map_err(|e| ControllerError::Failed(format!("{}/{}: {}", kind, name, e)))
    }

    fn first_pod_matching(&self, pod_selector: &str) -> Result<String, ControllerError> {
        let api: Api<Pod> = self.api()?;
        let pods = self
            .runtime
            .block_on(api.list(&ListParams::default()))
            .map_err(|e| classify("pods", e))?;
        pods.items
            .iter()
            .map(|pod| pod.name_any())
            .find(|name| name.starts_with(pod_selector))
            .ok_or_else(|| ControllerError::NotFound(format!("no pod matching [{}]", pod_selector)))
    }
}

/// Only an API 404 means the resource is absent. Everything else, including
/// transport and auth failures, is surfaced.
pub(crate) fn classify(resource: &str, error: kube::Error) -> ControllerError {
    match error {
        kube::Error::Api(response) if response.code == ERROR_NOT_FOUND => {
            ControllerError::NotFound(resource.to_string())
        }
        other => ControllerError::Failed(format!("{}: {}", resource, other)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    ConfigMap,
    Service,
}

fn parse_resource(resource: &str) -> Result<(ResourceKind, &str), ControllerError> {
    let (kind, name) = resource
        .split_once('/')
        .filter(|(_, name)| !name.is_empty())
        .ok_or_else(|| {
            ControllerError::Failed(format!("resource [{}] is not kind/name", resource))
        })?;
    let kind = match kind.to_ascii_lowercase().as_str() {
        "configmap" | "configmaps" | "cm" => ResourceKind::ConfigMap,
        "service" | "services" | "svc" => ResourceKind::Service,
        other => {
            return Err(ControllerError::Failed(format!(
                "reading {} resources is not supported",
                other
            )));
        }
    };
    Ok((kind, name))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    /// `[?(@.field=="value")]`, the first array element whose `field` equals `value`.
    Filter { field: String, equals: String },
}

/// Parse the jsonpath subset used for resource reads: `{.a.b}` with `\.`
/// escapes inside keys, plus equality filters on arrays.
fn parse_path(path: &str) -> Result<Vec<Segment>, ControllerError> {
    let unsupported = || ControllerError::Failed(format!("unsupported jsonpath [{}]", path));
    let body = path
        .trim()
        .strip_prefix('{')
        .and_then(|p| p.strip_suffix('}'))
        .ok_or_else(unsupported)?;

    let mut segments = Vec::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut field = String::new();
                while let Some(&next) = chars.peek() {
                    match next {
                        '.' | '[' => break,
                        '\\' => {
                            chars.next();
                            if let Some(escaped) = chars.next() {
                                field.push(escaped);
                            }
                        }
                        _ => {
                            field.push(next);
                            chars.next();
                        }
                    }
                }
                if field.is_empty() {
                    return Err(unsupported());
                }
                segments.push(Segment::Field(field));
            }
            '[' => {
                let filter: String = chars.by_ref().take_while(|&c| c != ']').collect();
                let (field, equals) = filter
                    .strip_prefix("?(@.")
                    .and_then(|f| f.strip_suffix(')'))
                    .and_then(|f| f.split_once("=="))
                    .ok_or_else(unsupported)?;
                segments.push(Segment::Filter {
                    field: field.trim().to_string(),
                    equals: equals.trim().trim_matches(['"', '\'']).to_string(),
                });
            }
            _ => return Err(unsupported()),
        }
    }
    Ok(segments)
}

fn select<'v>(value: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| match segment {
            Segment::Field(name) => current.get(name.as_str()),
            Segment::Filter { field, equals } => current.as_array()?.iter().find(|item| {
                item.get(field.as_str()).and_then(Value::as_str) == Some(equals.as_str())
            }),
        })
        .filter(|v| !v.is_null())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn read_value(
    resource: &str,
    object: &Value,
    path: Option<&str>,
) -> Result<String, ControllerError> {
    let Some(path) = path else {
        return serde_yaml::to_string(object)
            .map_err(|e| ControllerError::Failed(format!("{}: {}", resource, e)));
    };
    let segments = parse_path(path)?;
    select(object, &segments)
        .map(render)
        .ok_or_else(|| ControllerError::NotFound(format!("{} has no value at {}", resource, path)))
}

fn read_peer_file(k8s_dir: &std::path::Path) -> Result<String, ControllerError> {
    let path = k8s_dir.join("config").join(PERMISSIONED_NODES_KEY);
    debug!(path = %path.display(), "Reading peer descriptor list");
    std::fs::read_to_string(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ControllerError::NotFound(path.display().to_string()),
        _ => ControllerError::Failed(format!("{}: {}", path.display(), e)),
    })
}

impl ClusterController for KubeController {
    fn delete_deployment(&self, identity: &str) -> Result<(), ControllerError> {
        self.delete::<Deployment>(&deployment_name(identity))
    }

    fn delete_persistent_volume_claim(&self, identity: &str) -> Result<(), ControllerError> {
        self.delete::<PersistentVolumeClaim>(&pvc_name(identity))
    }

    fn delete_service(&self, identity: &str) -> Result<(), ControllerError> {
        self.delete::<Service>(&service_name(identity))
    }

    fn get_config_value(
        &self,
        resource: &str,
        path: Option<&str>,
    ) -> Result<String, ControllerError> {
        // Reject bad paths before touching the cluster.
        if let Some(path) = path {
            parse_path(path)?;
        }
        let object = match parse_resource(resource)? {
            (ResourceKind::ConfigMap, name) => self.fetch::<ConfigMap>(name)?,
            (ResourceKind::Service, name) => self.fetch::<Service>(name)?,
        };
        read_value(resource, &object, path)
    }

    fn query_peer_descriptor_list(&self) -> Result<String, ControllerError> {
        if let Some(k8s_dir) = &self.k8s_dir {
            return read_peer_file(k8s_dir);
        }
        let object = self.fetch::<ConfigMap>(PERMISSIONED_CONFIGMAP)?;
        let segments = [
            Segment::Field("data".to_string()),
            Segment::Field(PERMISSIONED_NODES_KEY.to_string()),
        ];
        select(&object, &segments).map(render).ok_or_else(|| {
            ControllerError::NotFound(format!(
                "configmap/{} has no {}",
                PERMISSIONED_CONFIGMAP, PERMISSIONED_NODES_KEY
            ))
        })
    }

    fn exec_interactive_shell(
        &self,
        pod_selector: &str,
        container: &str,
    ) -> Result<(), ControllerError> {
        let pod = self.first_pod_matching(pod_selector)?;

        debug!(pod = %pod, container = %container, kubectl = %self.kubectl, "Attaching shell");
        let status = Command::new(&self.kubectl)
            .arg("--namespace")
            .arg(&self.namespace)
            .args(["exec", "-it", &pod, "-c", container, "--", "/bin/ash"])
            .status()
            .map_err(|e| ControllerError::Failed(format!("failed to run {}: {}", self.kubectl, e)))?;
        if !status.success() {
            return Err(ControllerError::Failed(format!(
                "shell in {} exited with {}",
                pod, status
            )));
        }
        Ok(())
    }
}
