//! File-based registry storage (YAML)

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::QubeError;
use crate::store::RegistryStore;
use crate::types::NetworkConfig;

/// Registry document kept in a single YAML file.
pub struct FileRegistryStore {
    path: PathBuf,
}

impl FileRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStore for FileRegistryStore {
    fn load(&self) -> Result<NetworkConfig, QubeError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            QubeError::Validation(format!(
                "unable to read registry {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let config: NetworkConfig = serde_yaml::from_str(&contents).map_err(|e| {
            QubeError::Parse(format!("registry {}: {}", self.path.display(), e))
        })?;
        config.validate()?;
        debug!(
            path = %self.path.display(),
            nodes = config.nodes.len(),
            external_nodes = config.external_nodes.len(),
            "Loaded registry"
        );
        Ok(config)
    }

    fn save(&self, config: &NetworkConfig) -> Result<(), QubeError> {
        let contents = serde_yaml::to_string(config)?;
        let mut file = std::fs::File::create(&self.path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        debug!(path = %self.path.display(), "Saved registry");
        Ok(())
    }
}
