//! Assumed-state scheduling cache
//!
//! The cache merges two views of where instances live: the authoritative one
//! delivered by the watch feed, and the scheduler's own decisions that the
//! store has not confirmed yet. A decision enters as *assumed*
//! ([`Cache::assume_instance`]) and leaves either by being confirmed
//! ([`Cache::add_instance`]), reverted ([`Cache::forget_instance`]) or expired
//! by the sweep once its commit has concluded ([`Cache::finish_binding`]).
//!
//! All state sits behind one lock and is never handed out; readers get a
//! [`Snapshot`] instead.

use poolet_core::{Container, Instance, PooletError, PooletResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::snapshot::{ContainerInfo, Snapshot};

/// Cache record of one instance
struct InstanceState {
    instance: Arc<Instance>,
    /// Only meaningful while the instance is assumed
    binding_finished: bool,
    /// Earliest time the sweep may drop the assumption
    deadline: Option<Instant>,
}

impl InstanceState {
    fn new(instance: Arc<Instance>) -> Self {
        Self {
            instance,
            binding_finished: false,
            deadline: None,
        }
    }
}

/// Instances recorded against one container name
#[derive(Default)]
struct ContainerEntry {
    /// `None` once the container itself is gone but instances remain
    container: Option<Arc<Container>>,
    instances: HashMap<Uuid, Arc<Instance>>,
}

#[derive(Default)]
struct CacheState {
    assumed: HashSet<Uuid>,
    states: HashMap<Uuid, InstanceState>,
    containers: HashMap<String, ContainerEntry>,
}

impl CacheState {
    fn add_to_container(&mut self, key: Uuid, instance: Arc<Instance>) {
        self.containers
            .entry(instance.container_key().to_string())
            .or_default()
            .instances
            .insert(key, instance);
    }

    fn remove_from_container(&mut self, key: Uuid, container_key: &str) -> PooletResult<()> {
        let entry = self.containers.get_mut(container_key).ok_or_else(|| {
            PooletError::Corruption(format!(
                "instance {} recorded against unknown container {:?}",
                key, container_key
            ))
        })?;

        if entry.instances.remove(&key).is_none() {
            return Err(PooletError::Corruption(format!(
                "instance {} missing from container {:?}",
                key, container_key
            )));
        }

        if entry.instances.is_empty() && entry.container.is_none() {
            self.containers.remove(container_key);
            debug!(container = %container_key, "Dropped empty container entry");
        }
        Ok(())
    }

    fn remove_instance(&mut self, key: Uuid) -> PooletResult<()> {
        if let Some(state) = self.states.remove(&key) {
            self.remove_from_container(key, state.instance.container_key())?;
        }
        self.assumed.remove(&key);
        Ok(())
    }
}

/// Point-in-time summary of the cache for introspection
#[derive(Debug, Clone, Serialize)]
pub struct CacheDump {
    /// Instance count per container name
    pub containers: BTreeMap<String, usize>,
    /// Containers known only through leftover instances
    pub orphaned: Vec<String>,
    pub assumed: Vec<Uuid>,
    pub instances: usize,
}

/// Scheduling cache of containers and instances
pub struct Cache {
    /// Grace after `finish_binding` before an assumption may expire
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl Cache {
    /// Create a new cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Insert or refresh container metadata
    pub async fn add_container(&self, container: &Container) {
        let mut state = self.state.write().await;
        state
            .containers
            .entry(container.name().to_string())
            .or_default()
            .container = Some(Arc::new(container.clone()));

        debug!(container = %container.name(), "Container added to cache");
    }

    /// Replace container metadata
    pub async fn update_container(&self, _old: &Container, new: &Container) {
        self.add_container(new).await;
    }

    /// Drop container metadata; the entry itself goes once it holds no instances
    pub async fn remove_container(&self, container: &Container) -> PooletResult<()> {
        let mut state = self.state.write().await;
        let name = container.name();

        let entry = state
            .containers
            .get_mut(name)
            .ok_or_else(|| PooletError::ContainerNotFound(name.to_string()))?;
        entry.container = None;

        if entry.instances.is_empty() {
            state.containers.remove(name);
            debug!(container = %name, "Container removed from cache");
        } else {
            info!(
                container = %name,
                instances = entry.instances.len(),
                "Container removed while still holding instances"
            );
        }
        Ok(())
    }

    /// Record a scheduling decision before the store confirms it
    pub async fn assume_instance(&self, instance: &Instance) -> PooletResult<()> {
        let key = instance.key()?;
        instance.class()?;
        let mut state = self.state.write().await;

        if state.states.contains_key(&key) {
            return Err(PooletError::AlreadyPresent(key.to_string()));
        }

        let instance = Arc::new(instance.clone());
        state.add_to_container(key, instance.clone());
        state.states.insert(key, InstanceState::new(instance.clone()));
        state.assumed.insert(key);

        debug!(
            instance_uid = %key,
            container = %instance.container_key(),
            "Instance assumed"
        );
        Ok(())
    }

    /// Revert an assumption whose commit failed
    pub async fn forget_instance(&self, instance: &Instance) -> PooletResult<()> {
        let key = instance.key()?;
        let mut state = self.state.write().await;

        if let Some(current) = state.states.get(&key) {
            let recorded = current.instance.container_key();
            if recorded != instance.container_key() {
                return Err(PooletError::ContainerMismatch {
                    uid: key.to_string(),
                    recorded: recorded.to_string(),
                    actual: instance.container_key().to_string(),
                });
            }
        }

        if !state.assumed.contains(&key) {
            return Err(PooletError::InvalidState(format!(
                "instance {} is not assumed and cannot be forgotten",
                key
            )));
        }

        state.remove_instance(key)?;
        debug!(instance_uid = %key, "Assumed instance forgotten");
        Ok(())
    }

    /// Mark the commit of an assumed instance as concluded, arming its expiry.
    ///
    /// This says nothing about whether the commit succeeded.
    pub async fn finish_binding(&self, instance: &Instance) -> PooletResult<()> {
        let key = instance.key()?;
        let mut state = self.state.write().await;

        if !state.assumed.contains(&key) {
            return Ok(());
        }
        let deadline = Instant::now() + self.ttl;
        if let Some(current) = state.states.get_mut(&key) {
            current.binding_finished = true;
            current.deadline = Some(deadline);
            debug!(instance_uid = %key, "Binding finished");
        }
        Ok(())
    }

    /// Authoritative add from the watch feed
    pub async fn add_instance(&self, instance: &Instance) -> PooletResult<()> {
        let key = instance.key()?;
        instance.class()?;
        let mut state = self.state.write().await;

        let assumed_container = match state.states.get(&key) {
            Some(current) if state.assumed.contains(&key) => {
                Some(current.instance.container_key().to_string())
            }
            Some(_) => return Err(PooletError::AlreadyPresent(key.to_string())),
            None => None,
        };

        let Some(assumed_container) = assumed_container else {
            let committed = Arc::new(instance.clone());
            state.add_to_container(key, committed.clone());
            state.states.insert(key, InstanceState::new(committed));
            debug!(
                instance_uid = %key,
                container = %instance.container_key(),
                "Instance added to cache"
            );
            return Ok(());
        };

        if assumed_container != instance.container_key() {
            warn!(
                instance_uid = %key,
                assumed = %assumed_container,
                actual = %instance.container_key(),
                "Instance was added to a different container than it was assumed on"
            );
        }

        state.remove_from_container(key, &assumed_container)?;
        let instance = Arc::new(instance.clone());
        state.add_to_container(key, instance.clone());
        state.states.insert(key, InstanceState::new(instance));
        state.assumed.remove(&key);

        debug!(instance_uid = %key, "Assumed instance confirmed");
        Ok(())
    }

    /// Authoritative update from the watch feed.
    ///
    /// Moving an instance between containers must go through remove + add;
    /// a container change here means the feed lost or reordered an event.
    pub async fn update_instance(&self, old: &Instance, new: &Instance) -> PooletResult<()> {
        let key = old.key()?;
        if new.key()? != key {
            return Err(PooletError::Validation(format!(
                "update changes instance uid from {} to {}",
                key,
                new.display_id()
            )));
        }
        new.class()?;
        let mut state = self.state.write().await;

        let current = state
            .states
            .get(&key)
            .ok_or_else(|| PooletError::InstanceNotFound(key.to_string()))?;
        if state.assumed.contains(&key) {
            return Err(PooletError::InvalidState(format!(
                "instance {} is assumed and must be added before it is updated",
                key
            )));
        }

        let recorded = current.instance.container_key();
        if recorded != old.container_key() || old.container_key() != new.container_key() {
            error!(
                instance_uid = %key,
                recorded = %recorded,
                old = %old.container_key(),
                new = %new.container_key(),
                "Instance container changed on update"
            );
            return Err(PooletError::Corruption(format!(
                "instance {} updated across containers: recorded {:?}, old {:?}, new {:?}",
                key,
                recorded,
                old.container_key(),
                new.container_key()
            )));
        }

        let container_key = recorded.to_string();
        state.remove_from_container(key, &container_key)?;
        let new = Arc::new(new.clone());
        state.add_to_container(key, new.clone());
        state.states.insert(key, InstanceState::new(new));
        Ok(())
    }

    /// Authoritative removal from the watch feed
    pub async fn remove_instance(&self, instance: &Instance) -> PooletResult<()> {
        let key = instance.key()?;
        let mut state = self.state.write().await;

        let current = state
            .states
            .get(&key)
            .ok_or_else(|| PooletError::InstanceNotFound(key.to_string()))?;

        let recorded = current.instance.container_key();
        if recorded != instance.container_key() {
            error!(
                instance_uid = %key,
                recorded = %recorded,
                actual = %instance.container_key(),
                "Instance removed from a container it was not recorded on"
            );
            return Err(PooletError::Corruption(format!(
                "instance {} removed from {:?} but recorded on {:?}",
                key,
                instance.container_key(),
                recorded
            )));
        }

        state.remove_instance(key)?;
        debug!(instance_uid = %key, "Instance removed from cache");
        Ok(())
    }

    /// Whether the instance is currently assumed
    pub async fn is_assumed_instance(&self, instance: &Instance) -> PooletResult<bool> {
        let key = instance.key()?;
        Ok(self.state.read().await.assumed.contains(&key))
    }

    /// Whether the instance is recorded at all, assumed or committed
    pub async fn contains_instance(&self, instance: &Instance) -> PooletResult<bool> {
        let key = instance.key()?;
        Ok(self.state.read().await.states.contains_key(&key))
    }

    /// Build a fresh snapshot of every live container
    pub async fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        self.update_snapshot(&mut snapshot).await;
        snapshot
    }

    /// Refill `snapshot` in place under the read lock
    pub async fn update_snapshot(&self, snapshot: &mut Snapshot) {
        let state = self.state.read().await;

        snapshot.clear();
        for entry in state.containers.values() {
            // Entries kept alive only by leftover instances are not schedulable.
            let Some(container) = entry.container.as_ref() else {
                continue;
            };
            snapshot.insert(ContainerInfo::new(
                container.clone(),
                entry.instances.clone(),
            ));
        }
        snapshot.finish();
    }

    /// Drop every assumption whose commit concluded and whose grace elapsed.
    ///
    /// Returns the number of instances removed.
    pub async fn cleanup_expired(&self, now: Instant) -> usize {
        let mut state = self.state.write().await;

        let expired: Vec<Uuid> = state
            .assumed
            .iter()
            .filter(|key| {
                state.states.get(*key).is_some_and(|s| {
                    s.binding_finished && s.deadline.map_or(true, |d| d <= now)
                })
            })
            .copied()
            .collect();

        for key in &expired {
            match state.remove_instance(*key) {
                Ok(()) => warn!(instance_uid = %key, "Assumed instance expired"),
                Err(e) => error!(instance_uid = %key, error = %e, "Failed to expire assumed instance"),
            }
        }
        expired.len()
    }

    /// Run the expiry sweep every `interval` until shutdown
    pub async fn run_expiry(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        debug!(interval_ms = interval.as_millis() as u64, "Starting expiry sweep");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = self.cleanup_expired(Instant::now()).await;
                    if expired > 0 {
                        debug!(expired, "Expiry sweep removed assumed instances");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Expiry sweep shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Forget everything, ahead of a rebuild from a full list
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        *state = CacheState::default();
    }

    /// Number of container entries, including orphaned ones
    pub async fn container_count(&self) -> usize {
        self.state.read().await.containers.len()
    }

    /// Number of instances, assumed or committed
    pub async fn instance_count(&self) -> usize {
        self.state.read().await.states.len()
    }

    pub async fn assumed_count(&self) -> usize {
        self.state.read().await.assumed.len()
    }

    /// Summarize the cache contents
    pub async fn dump(&self) -> CacheDump {
        let state = self.state.read().await;

        let mut assumed: Vec<Uuid> = state.assumed.iter().copied().collect();
        assumed.sort();
        let mut orphaned: Vec<String> = state
            .containers
            .iter()
            .filter(|(_, e)| e.container.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        orphaned.sort();

        CacheDump {
            containers: state
                .containers
                .iter()
                .map(|(name, e)| (name.clone(), e.instances.len()))
                .collect(),
            orphaned,
            assumed,
            instances: state.states.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolet_core::Quantity;

    const CLASS: &str = "fast";

    fn container(name: &str, gib: u64) -> Container {
        Container::new(name).with_allocatable(CLASS, Quantity::gib(gib))
    }

    fn instance_on(name: &str, container: &str, gib: u64) -> Instance {
        let mut instance = Instance::new(name, CLASS, Quantity::gib(gib));
        instance.metadata.uid = Some(Uuid::new_v4());
        instance.spec.container_ref = Some(container.to_string());
        instance
    }

    #[tokio::test]
    async fn test_assume_twice_fails() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);

        cache.assume_instance(&vol).await.unwrap();
        let second = cache.assume_instance(&vol).await;
        assert!(matches!(second, Err(PooletError::AlreadyPresent(_))));
    }

    #[tokio::test]
    async fn test_assume_after_add_fails() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);

        cache.add_instance(&vol).await.unwrap();
        let result = cache.assume_instance(&vol).await;
        assert!(matches!(result, Err(PooletError::AlreadyPresent(_))));
    }

    #[tokio::test]
    async fn test_assumed_visible_until_added() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);

        cache.assume_instance(&vol).await.unwrap();
        assert!(cache.is_assumed_instance(&vol).await.unwrap());

        cache.add_instance(&vol).await.unwrap();
        assert!(!cache.is_assumed_instance(&vol).await.unwrap());
        assert_eq!(cache.instance_count().await, 1);
        assert_eq!(cache.dump().await.containers.get("pool-a"), Some(&1));
    }

    #[tokio::test]
    async fn test_is_assumed_requires_uid() {
        let cache = Cache::new(Duration::ZERO);
        let vol = Instance::new("vol", CLASS, Quantity::gib(1));
        let result = cache.is_assumed_instance(&vol).await;
        assert!(matches!(result, Err(PooletError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_add_reconciles_different_container() {
        let cache = Cache::new(Duration::ZERO);
        cache.add_container(&container("pool-a", 10)).await;
        cache.add_container(&container("pool-b", 10)).await;
        let assumed = instance_on("vol", "pool-a", 4);
        cache.assume_instance(&assumed).await.unwrap();

        let mut actual = assumed.clone();
        actual.spec.container_ref = Some("pool-b".to_string());
        cache.add_instance(&actual).await.unwrap();

        let snapshot = cache.snapshot().await;
        assert_eq!(
            snapshot.get_container("pool-a").unwrap().max_allocatable(CLASS),
            Quantity::gib(10)
        );
        assert_eq!(
            snapshot.get_container("pool-b").unwrap().max_allocatable(CLASS),
            Quantity::gib(6)
        );
    }

    #[tokio::test]
    async fn test_duplicate_add_fails() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);

        cache.add_instance(&vol).await.unwrap();
        let result = cache.add_instance(&vol).await;
        assert!(matches!(result, Err(PooletError::AlreadyPresent(_))));
    }

    #[tokio::test]
    async fn test_forget_assumed_instance() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);

        cache.assume_instance(&vol).await.unwrap();
        cache.forget_instance(&vol).await.unwrap();

        assert!(!cache.is_assumed_instance(&vol).await.unwrap());
        assert_eq!(cache.instance_count().await, 0);
        assert_eq!(cache.container_count().await, 0);
    }

    #[tokio::test]
    async fn test_forget_committed_instance_fails() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);

        cache.add_instance(&vol).await.unwrap();
        let result = cache.forget_instance(&vol).await;
        assert!(matches!(result, Err(PooletError::InvalidState(_))));
        assert_eq!(cache.instance_count().await, 1);
    }

    #[tokio::test]
    async fn test_forget_with_altered_copy_fails() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);
        cache.assume_instance(&vol).await.unwrap();

        let mut altered = vol.clone();
        altered.spec.container_ref = Some("pool-b".to_string());
        let result = cache.forget_instance(&altered).await;
        assert!(matches!(result, Err(PooletError::ContainerMismatch { .. })));
        assert!(cache.is_assumed_instance(&vol).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_assumed_instance_fails() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);
        cache.assume_instance(&vol).await.unwrap();

        let result = cache.update_instance(&vol, &vol).await;
        assert!(matches!(result, Err(PooletError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_update_unknown_instance_fails() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);

        let result = cache.update_instance(&vol, &vol).await;
        assert!(matches!(result, Err(PooletError::InstanceNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_across_containers_is_fatal() {
        let cache = Cache::new(Duration::ZERO);
        let old = instance_on("vol", "pool-a", 1);
        cache.add_instance(&old).await.unwrap();

        let mut new = old.clone();
        new.spec.container_ref = Some("pool-b".to_string());
        let err = cache.update_instance(&old, &new).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_classless_instance_is_rejected() {
        let cache = Cache::new(Duration::ZERO);
        let mut vol = instance_on("vol", "pool-a", 1);
        vol.spec.class_ref = None;

        let assumed = cache.assume_instance(&vol).await;
        assert!(matches!(assumed, Err(PooletError::Validation(_))));
        let added = cache.add_instance(&vol).await;
        assert!(matches!(added, Err(PooletError::Validation(_))));

        assert_eq!(cache.instance_count().await, 0);
        assert!(cache.dump().await.containers.is_empty());
    }

    #[tokio::test]
    async fn test_update_dropping_class_is_rejected() {
        let cache = Cache::new(Duration::ZERO);
        let old = instance_on("vol", "pool-a", 1);
        cache.add_instance(&old).await.unwrap();

        let mut new = old.clone();
        new.spec.class_ref = None;
        let result = cache.update_instance(&old, &new).await;
        assert!(matches!(result, Err(PooletError::Validation(_))));
        assert_eq!(cache.instance_count().await, 1);
    }

    #[tokio::test]
    async fn test_contains_assumed_and_committed() {
        let cache = Cache::new(Duration::ZERO);
        let assumed = instance_on("assumed", "pool-a", 1);
        let committed = instance_on("committed", "pool-a", 1);
        let unknown = instance_on("unknown", "pool-a", 1);

        cache.assume_instance(&assumed).await.unwrap();
        cache.add_instance(&committed).await.unwrap();

        assert!(cache.contains_instance(&assumed).await.unwrap());
        assert!(cache.contains_instance(&committed).await.unwrap());
        assert!(!cache.contains_instance(&unknown).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_replaces_requested_quantity() {
        let cache = Cache::new(Duration::ZERO);
        cache.add_container(&container("pool-a", 10)).await;
        let old = instance_on("vol", "pool-a", 1);
        cache.add_instance(&old).await.unwrap();

        let mut new = old.clone();
        new.spec.resources = Quantity::gib(3);
        cache.update_instance(&old, &new).await.unwrap();

        let snapshot = cache.snapshot().await;
        assert_eq!(
            snapshot.get_container("pool-a").unwrap().max_allocatable(CLASS),
            Quantity::gib(7)
        );
    }

    #[tokio::test]
    async fn test_remove_with_wrong_container_is_fatal() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);
        cache.add_instance(&vol).await.unwrap();

        let mut moved = vol.clone();
        moved.spec.container_ref = Some("pool-b".to_string());
        let err = cache.remove_instance(&moved).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_remove_unknown_instance_fails() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);
        let result = cache.remove_instance(&vol).await;
        assert!(matches!(result, Err(PooletError::InstanceNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_unknown_container_fails() {
        let cache = Cache::new(Duration::ZERO);
        let result = cache.remove_container(&container("pool-a", 1)).await;
        assert!(matches!(result, Err(PooletError::ContainerNotFound(_))));
    }

    #[tokio::test]
    async fn test_container_gc_after_last_instance() {
        let cache = Cache::new(Duration::ZERO);
        let pool = container("pool-a", 10);
        cache.add_container(&pool).await;
        let vol = instance_on("vol", "pool-a", 1);
        cache.add_instance(&vol).await.unwrap();

        cache.remove_container(&pool).await.unwrap();
        assert_eq!(cache.container_count().await, 1);
        assert_eq!(cache.dump().await.orphaned, vec!["pool-a".to_string()]);
        assert_eq!(cache.snapshot().await.num_containers(), 0);

        cache.remove_instance(&vol).await.unwrap();
        assert_eq!(cache.container_count().await, 0);
        assert!(cache.snapshot().await.get_container("pool-a").is_err());
    }

    #[tokio::test]
    async fn test_readding_container_keeps_instances() {
        let cache = Cache::new(Duration::ZERO);
        let pool = container("pool-a", 10);
        cache.add_container(&pool).await;
        cache.add_instance(&instance_on("vol", "pool-a", 4)).await.unwrap();
        cache.remove_container(&pool).await.unwrap();

        cache.add_container(&pool).await;
        let snapshot = cache.snapshot().await;
        let info = snapshot.get_container("pool-a").unwrap();
        assert_eq!(info.num_instances(), 1);
        assert_eq!(info.max_allocatable(CLASS), Quantity::gib(6));
    }

    #[tokio::test]
    async fn test_accounting_after_assumptions() {
        let cache = Cache::new(Duration::ZERO);
        cache.add_container(&container("pool-a", 100)).await;

        for i in 0..7 {
            cache
                .assume_instance(&instance_on(&format!("vol-{}", i), "pool-a", 10))
                .await
                .unwrap();
        }

        let snapshot = cache.snapshot().await;
        let info = snapshot.get_container("pool-a").unwrap();
        assert_eq!(info.max_allocatable(CLASS), Quantity::gib(30));
        assert_eq!(info.max_allocatable("unpublished"), Quantity::ZERO);
    }

    #[tokio::test]
    async fn test_unfinished_binding_never_expires() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);
        cache.assume_instance(&vol).await.unwrap();

        let expired = cache
            .cleanup_expired(Instant::now() + Duration::from_secs(3600))
            .await;
        assert_eq!(expired, 0);
        assert!(cache.is_assumed_instance(&vol).await.unwrap());
    }

    #[tokio::test]
    async fn test_finished_binding_expires_after_ttl() {
        let cache = Cache::new(Duration::from_secs(30));
        let vol = instance_on("vol", "pool-a", 1);
        cache.assume_instance(&vol).await.unwrap();
        cache.finish_binding(&vol).await.unwrap();

        assert_eq!(cache.cleanup_expired(Instant::now()).await, 0);
        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(cache.cleanup_expired(later).await, 1);
        assert_eq!(cache.instance_count().await, 0);
        assert_eq!(cache.container_count().await, 0);
    }

    #[tokio::test]
    async fn test_finish_binding_ignores_committed() {
        let cache = Cache::new(Duration::ZERO);
        let vol = instance_on("vol", "pool-a", 1);
        cache.add_instance(&vol).await.unwrap();
        cache.finish_binding(&vol).await.unwrap();

        assert_eq!(cache.cleanup_expired(Instant::now()).await, 0);
        assert_eq!(cache.instance_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_sweep_removes_finished_assumption() {
        let cache = Arc::new(Cache::new(Duration::ZERO));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweep = tokio::spawn(
            cache
                .clone()
                .run_expiry(Duration::from_secs(1), shutdown_rx),
        );

        let vol = instance_on("vol", "pool-a", 1);
        cache.assume_instance(&vol).await.unwrap();
        cache.finish_binding(&vol).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.instance_count().await, 0);
        assert!(!cache.is_assumed_instance(&vol).await.unwrap());

        shutdown_tx.send(true).unwrap();
        sweep.await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let cache = Cache::new(Duration::ZERO);
        cache.add_container(&container("pool-a", 10)).await;
        cache.assume_instance(&instance_on("vol", "pool-a", 1)).await.unwrap();

        cache.reset().await;
        assert_eq!(cache.container_count().await, 0);
        assert_eq!(cache.instance_count().await, 0);
        assert_eq!(cache.assumed_count().await, 0);
    }
}
