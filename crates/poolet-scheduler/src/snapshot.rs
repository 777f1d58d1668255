//! Point-in-time view of the cache for one scheduling decision

use poolet_core::{Container, Instance, PooletError, PooletResult, Quantity};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Read-only copy of one container and the instances recorded on it
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    container: Arc<Container>,
    instances: HashMap<Uuid, Arc<Instance>>,
}

impl ContainerInfo {
    pub(crate) fn new(container: Arc<Container>, instances: HashMap<Uuid, Arc<Instance>>) -> Self {
        Self {
            container,
            instances,
        }
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn name(&self) -> &str {
        self.container.name()
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values().map(|i| i.as_ref())
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Requested quantity of `class` across every recorded instance
    pub fn requested(&self, class: &str) -> Quantity {
        self.instances
            .values()
            .filter(|i| i.spec.class_ref.as_deref() == Some(class))
            .map(|i| i.spec.resources)
            .sum()
    }

    /// Remaining headroom for `class`; zero when the class is unpublished
    pub fn max_allocatable(&self, class: &str) -> Quantity {
        self.container
            .allocatable(class)
            .saturating_sub(self.requested(class))
    }
}

/// Reusable snapshot of every live container, ordered by name
#[derive(Debug, Default)]
pub struct Snapshot {
    containers: Vec<ContainerInfo>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clear(&mut self) {
        self.containers.clear();
        self.index.clear();
    }

    pub(crate) fn insert(&mut self, info: ContainerInfo) {
        self.containers.push(info);
    }

    /// Order the copied containers and rebuild the name index
    pub(crate) fn finish(&mut self) {
        self.containers.sort_by(|a, b| a.name().cmp(b.name()));
        self.index = self
            .containers
            .iter()
            .enumerate()
            .map(|(i, info)| (info.name().to_string(), i))
            .collect();
    }

    /// Every container in this snapshot
    pub fn list_containers(&self) -> &[ContainerInfo] {
        &self.containers
    }

    pub fn get_container(&self, name: &str) -> PooletResult<&ContainerInfo> {
        self.index
            .get(name)
            .map(|&i| &self.containers[i])
            .ok_or_else(|| PooletError::ContainerNotFound(name.to_string()))
    }

    pub fn num_containers(&self) -> usize {
        self.containers.len()
    }
}
