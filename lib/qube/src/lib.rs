//! qube - node registry and address resolution for Quorum networks on Kubernetes
//!
//! This library provides the registry model, address resolution, and node
//! teardown used by the `qctl` command line tool.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod config;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod types;

pub use config::QubeConfig;
pub use controller::{ClusterController, KubeController};
pub use error::{ControllerError, EXIT_VALIDATION, QubeError};
pub use lifecycle::{
    DEFAULT_CONTAINER, DeleteReport, ExternalDeleteReport, KEY_FILES, Lifecycle, Step,
    StepOutcome, StopReport,
};
pub use registry::{Listing, Projection};
pub use resolver::{AddressResolver, DEFAULT_P2P_PORT, P2P_PORT_NAME, TM_PORT_NAME};
pub use store::{FileRegistryStore, RegistryStore};
pub use types::{
    Consensus, EntryKind, ExternalNodeEntry, ExternalNodePatch, Genesis, NetworkConfig, NewNode,
    NodeEntry, NodePatch, TransactionManager,
};
