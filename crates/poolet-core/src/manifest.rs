//! Manifest file format (TOML) for seeding containers and instances

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::model::{Container, Instance};
use crate::{PooletError, PooletResult};

/// A set of containers and instances to apply to a store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl Manifest {
    /// Load a manifest from a TOML file
    pub fn from_file(path: &Path) -> PooletResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PooletError::Config(format!("Failed to read manifest {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> PooletResult<Self> {
        let manifest: Manifest = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> PooletResult<()> {
        for container in &self.containers {
            if container.metadata.name.is_empty() {
                return Err(PooletError::Validation(
                    "container without a name in manifest".to_string(),
                ));
            }
        }
        for instance in &self.instances {
            if instance.metadata.name.is_empty() {
                return Err(PooletError::Validation(
                    "instance without a name in manifest".to_string(),
                ));
            }
        }
        Ok(())
    }
}
