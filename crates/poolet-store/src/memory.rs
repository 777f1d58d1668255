//! In-memory state store
//!
//! Reference implementation of [`StateClient`] used by the daemon in
//! standalone mode and by tests. Every write bumps a store-wide resource
//! version and is published on the watch feed while the write lock is held,
//! so subscribers observe changes in commit order.

use async_trait::async_trait;
use poolet_core::{
    Container, Instance, Manifest, PooletError, PooletResult, StoreEvent, WatchEvent,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::traits::{InstanceFilter, StateClient, StateList};

#[derive(Default)]
struct StoreState {
    instances: HashMap<Uuid, Instance>,
    containers: BTreeMap<String, Container>,
    resource_version: u64,
}

impl StoreState {
    fn next_version(&mut self) -> u64 {
        self.resource_version += 1;
        self.resource_version
    }
}

/// In-memory store of instances and containers
pub struct MemoryStore {
    state: RwLock<StoreState>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    /// Create a new store whose watch feed buffers `watch_buffer` events
    pub fn new(watch_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(watch_buffer.max(1));
        Self {
            state: RwLock::new(StoreState::default()),
            events,
        }
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine; the event is simply dropped.
        let _ = self.events.send(event);
    }

    /// Create an instance, assigning a uid if it has none
    pub async fn create_instance(&self, mut instance: Instance) -> PooletResult<Instance> {
        let mut state = self.state.write().await;

        let uid = *instance.metadata.uid.get_or_insert_with(Uuid::new_v4);
        if state.instances.contains_key(&uid) {
            return Err(PooletError::AlreadyPresent(uid.to_string()));
        }
        instance.metadata.resource_version = state.next_version();
        state.instances.insert(uid, instance.clone());

        debug!(
            instance_uid = %uid,
            name = %instance.metadata.name,
            "Instance created"
        );
        self.publish(StoreEvent::Instance(WatchEvent::Added(instance.clone())));
        Ok(instance)
    }

    /// Delete an instance by uid
    pub async fn delete_instance(&self, uid: Uuid) -> PooletResult<Instance> {
        let mut state = self.state.write().await;

        let mut instance = state
            .instances
            .remove(&uid)
            .ok_or_else(|| PooletError::InstanceNotFound(uid.to_string()))?;
        instance.metadata.resource_version = state.next_version();

        debug!(instance_uid = %uid, "Instance deleted");
        self.publish(StoreEvent::Instance(WatchEvent::Deleted(instance.clone())));
        Ok(instance)
    }

    /// Create or replace a container
    pub async fn apply_container(&self, mut container: Container) -> PooletResult<Container> {
        if container.metadata.name.is_empty() {
            return Err(PooletError::Validation("container name is empty".to_string()));
        }

        let mut state = self.state.write().await;
        container.metadata.resource_version = state.next_version();

        let old = state
            .containers
            .insert(container.metadata.name.clone(), container.clone());

        let event = match old {
            Some(old) => WatchEvent::Modified {
                old,
                new: container.clone(),
            },
            None => {
                info!(container = %container.metadata.name, "Container registered");
                WatchEvent::Added(container.clone())
            }
        };
        self.publish(StoreEvent::Container(event));
        Ok(container)
    }

    /// Delete a container by name
    pub async fn delete_container(&self, name: &str) -> PooletResult<Container> {
        let mut state = self.state.write().await;

        let mut container = state
            .containers
            .remove(name)
            .ok_or_else(|| PooletError::ContainerNotFound(name.to_string()))?;
        container.metadata.resource_version = state.next_version();

        info!(container = %name, "Container removed");
        self.publish(StoreEvent::Container(WatchEvent::Deleted(container.clone())));
        Ok(container)
    }

    /// Get a container by name
    pub async fn get_container(&self, name: &str) -> Option<Container> {
        self.state.read().await.containers.get(name).cloned()
    }

    /// List all containers
    pub async fn list_containers(&self) -> Vec<Container> {
        self.state.read().await.containers.values().cloned().collect()
    }

    /// Apply every container, then every instance, of a manifest
    pub async fn apply_manifest(&self, manifest: &Manifest) -> PooletResult<()> {
        for container in &manifest.containers {
            self.apply_container(container.clone()).await?;
        }
        for instance in &manifest.instances {
            self.create_instance(instance.clone()).await?;
        }

        info!(
            containers = manifest.containers.len(),
            instances = manifest.instances.len(),
            "Manifest applied"
        );
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl StateClient for MemoryStore {
    async fn list_state(&self) -> PooletResult<StateList> {
        let state = self.state.read().await;
        Ok(StateList {
            containers: state.containers.values().cloned().collect(),
            instances: state.instances.values().cloned().collect(),
            resource_version: state.resource_version,
        })
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> PooletResult<Vec<Instance>> {
        let state = self.state.read().await;
        Ok(state
            .instances
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    async fn get_instance(&self, uid: Uuid) -> PooletResult<Option<Instance>> {
        Ok(self.state.read().await.instances.get(&uid).cloned())
    }

    async fn bind_instance(
        &self,
        uid: Uuid,
        resource_version: u64,
        container: &str,
    ) -> PooletResult<Instance> {
        let mut state = self.state.write().await;

        let old = state
            .instances
            .get(&uid)
            .cloned()
            .ok_or_else(|| PooletError::InstanceNotFound(uid.to_string()))?;

        if old.metadata.resource_version != resource_version {
            return Err(PooletError::Conflict(format!(
                "instance {} was modified: expected version {}, found {}",
                uid, resource_version, old.metadata.resource_version
            )));
        }
        if let Some(bound) = old.spec.container_ref.as_deref() {
            return Err(PooletError::Conflict(format!(
                "instance {} is already bound to {}",
                uid, bound
            )));
        }

        let mut new = old.clone();
        new.spec.container_ref = Some(container.to_string());
        new.metadata.resource_version = state.next_version();
        state.instances.insert(uid, new.clone());

        debug!(instance_uid = %uid, container = %container, "Instance bound");
        self.publish(StoreEvent::Instance(WatchEvent::Modified {
            old,
            new: new.clone(),
        }));
        Ok(new)
    }

    fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
