//! Instance and Container type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::quantity::Quantity;
use crate::selector::{LabelSelector, Labels, Taint, Toleration};
use crate::{PooletError, PooletResult};

/// Metadata common to instances and containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObjectMeta {
    /// Human-readable name; the identity of a container
    pub name: String,
    /// Stable unique identifier; the identity of an instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    /// Bumped by the store on every write
    #[serde(default)]
    pub resource_version: u64,
    /// Set once the object is being deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Desired state of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InstanceSpec {
    /// Resource class the instance draws capacity from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_ref: Option<String>,
    /// Requested quantity of the class
    #[serde(default)]
    pub resources: Quantity,
    /// Container the instance is bound to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_ref: Option<String>,
    /// Restricts eligible containers by label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

/// A schedulable unit (volume or bucket) that must be placed onto a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Instance {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: InstanceSpec,
}

impl Instance {
    /// Create an unassigned instance requesting `resources` of `class`
    pub fn new(name: impl Into<String>, class: impl Into<String>, resources: Quantity) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: InstanceSpec {
                class_ref: Some(class.into()),
                resources,
                ..Default::default()
            },
        }
    }

    /// The cache key of this instance
    pub fn key(&self) -> PooletResult<Uuid> {
        self.metadata.uid.ok_or_else(|| {
            PooletError::InvalidKey(format!("instance {:?} has no uid", self.metadata.name))
        })
    }

    /// Resource class the instance draws capacity from
    pub fn class(&self) -> PooletResult<&str> {
        self.spec.class_ref.as_deref().ok_or_else(|| {
            PooletError::Validation(format!(
                "instance {} has no resource class",
                self.display_id()
            ))
        })
    }

    /// Name of the container this instance is bound to, or `""` when unassigned
    pub fn container_key(&self) -> &str {
        self.spec.container_ref.as_deref().unwrap_or("")
    }

    pub fn is_assigned(&self) -> bool {
        !self.container_key().is_empty()
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Display identity used in logs: uid when known, name otherwise
    pub fn display_id(&self) -> String {
        match self.metadata.uid {
            Some(uid) => uid.to_string(),
            None => self.metadata.name.clone(),
        }
    }
}

/// Desired state of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContainerSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
}

/// Observed capacity of a container, per resource class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContainerStatus {
    #[serde(default)]
    pub capacity: BTreeMap<String, Quantity>,
    #[serde(default)]
    pub allocatable: BTreeMap<String, Quantity>,
}

/// A resource pool (volume pool or bucket pool) hosting instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Container {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ContainerSpec,
    #[serde(default)]
    pub status: ContainerStatus,
}

impl Container {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            ..Default::default()
        }
    }

    /// Publish `quantity` of `class` as both capacity and allocatable
    pub fn with_allocatable(mut self, class: impl Into<String>, quantity: Quantity) -> Self {
        let class = class.into();
        self.status.capacity.insert(class.clone(), quantity);
        self.status.allocatable.insert(class, quantity);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Published allocatable quantity for `class`, zero when unpublished
    pub fn allocatable(&self, class: &str) -> Quantity {
        self.status
            .allocatable
            .get(class)
            .copied()
            .unwrap_or(Quantity::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_new() {
        let instance = Instance::new("vol-1", "fast", Quantity::gib(10));
        assert_eq!(instance.metadata.name, "vol-1");
        assert_eq!(instance.spec.class_ref.as_deref(), Some("fast"));
        assert!(!instance.is_assigned());
        assert_eq!(instance.container_key(), "");
    }

    #[test]
    fn test_instance_key_requires_uid() {
        let mut instance = Instance::new("vol-1", "fast", Quantity::gib(1));
        assert!(matches!(instance.key(), Err(PooletError::InvalidKey(_))));

        let uid = Uuid::new_v4();
        instance.metadata.uid = Some(uid);
        assert_eq!(instance.key().unwrap(), uid);
    }

    #[test]
    fn test_instance_class_required() {
        let mut instance = Instance::new("vol-1", "fast", Quantity::gib(1));
        assert_eq!(instance.class().unwrap(), "fast");

        instance.spec.class_ref = None;
        assert!(matches!(instance.class(), Err(PooletError::Validation(_))));
    }

    #[test]
    fn test_container_allocatable() {
        let container = Container::new("pool-a").with_allocatable("fast", Quantity::gib(100));
        assert_eq!(container.allocatable("fast"), Quantity::gib(100));
        assert_eq!(container.allocatable("slow"), Quantity::ZERO);
    }

    #[test]
    fn test_instance_toml_roundtrip_fields() {
        let toml_str = r#"
[metadata]
name = "vol-a"

[spec]
class_ref = "fast"
resources = "10Gi"
container_ref = "pool-a"

[[spec.tolerations]]
key = "tier"
operator = "Exists"
"#;
        let instance: Instance = toml::from_str(toml_str).unwrap();
        assert_eq!(instance.spec.resources, Quantity::gib(10));
        assert_eq!(instance.container_key(), "pool-a");
        assert_eq!(instance.spec.tolerations.len(), 1);
    }
}
