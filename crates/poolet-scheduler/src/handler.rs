//! Maps watch feed events onto cache calls
//!
//! The cache only records instances that are bound to a container (committed)
//! or that the scheduler has assumed onto one. Unassigned instances never
//! enter it; they are handed to the work queue instead.

use poolet_core::{Container, Instance, PooletResult, StoreEvent, WatchEvent};
use poolet_store::{InstanceFilter, StateClient};
use std::sync::Arc;
use tracing::{debug, error};

use crate::cache::Cache;
use crate::queue::WorkQueue;

/// Event adapter between the watch feed, the cache and the work queue
pub struct EventHandler {
    cache: Arc<Cache>,
    queue: Arc<WorkQueue>,
    client: Arc<dyn StateClient>,
}

impl EventHandler {
    pub fn new(cache: Arc<Cache>, queue: Arc<WorkQueue>, client: Arc<dyn StateClient>) -> Self {
        Self {
            cache,
            queue,
            client,
        }
    }

    /// Apply one event.
    ///
    /// Only fatal errors are returned; everything else is logged and dropped
    /// since the next event or resync brings the cache back in line.
    pub async fn handle(&self, event: StoreEvent) -> PooletResult<()> {
        let kind = event_kind(&event);
        let result = match event {
            StoreEvent::Instance(event) => self.on_instance(event).await,
            StoreEvent::Container(event) => self.on_container(event).await,
        };

        match result {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!(event = %kind, error = %e, "Failed to apply watch event");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn on_instance(&self, event: WatchEvent<Instance>) -> PooletResult<()> {
        match event {
            WatchEvent::Added(instance) => {
                if instance.is_assigned() {
                    self.cache.add_instance(&instance).await
                } else {
                    self.enqueue(&instance).await
                }
            }
            WatchEvent::Modified { old, new } => match (old.is_assigned(), new.is_assigned()) {
                (false, false) => self.enqueue(&new).await,
                (false, true) => self.cache.add_instance(&new).await,
                (true, true) => self.cache.update_instance(&old, &new).await,
                (true, false) => {
                    self.cache.remove_instance(&old).await?;
                    self.enqueue(&new).await
                }
            },
            WatchEvent::Deleted(instance) => {
                if instance.is_assigned() {
                    self.cache.remove_instance(&instance).await
                } else {
                    debug!(instance = %instance.display_id(), "Unassigned instance deleted");
                    Ok(())
                }
            }
        }
    }

    async fn on_container(&self, event: WatchEvent<Container>) -> PooletResult<()> {
        match event {
            WatchEvent::Added(container) => {
                self.cache.add_container(&container).await;
                self.requeue_unassigned().await.map(|_| ())
            }
            WatchEvent::Modified { old, new } => {
                self.cache.update_container(&old, &new).await;
                self.requeue_unassigned().await.map(|_| ())
            }
            WatchEvent::Deleted(container) => self.cache.remove_container(&container).await,
        }
    }

    async fn enqueue(&self, instance: &Instance) -> PooletResult<()> {
        let uid = instance.key()?;
        if self.queue.add(uid).await {
            debug!(instance_uid = %uid, "Instance queued");
        }
        Ok(())
    }

    /// Queue every unassigned instance; returns how many were newly queued
    pub async fn requeue_unassigned(&self) -> PooletResult<usize> {
        let unassigned = self.client.list_instances(&InstanceFilter::Unassigned).await?;

        let mut queued = 0usize;
        for instance in &unassigned {
            let uid = instance.key()?;
            if self.queue.add(uid).await {
                queued += 1;
            }
        }

        if queued > 0 {
            debug!(queued, "Requeued unassigned instances");
        }
        Ok(queued)
    }
}

fn event_kind(event: &StoreEvent) -> String {
    match event {
        StoreEvent::Instance(e) => format!("instance/{}", e.kind()),
        StoreEvent::Container(e) => format!("container/{}", e.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolet_core::Quantity;
    use poolet_store::MemoryStore;
    use std::time::Duration;
    use uuid::Uuid;

    struct Fixture {
        cache: Arc<Cache>,
        queue: Arc<WorkQueue>,
        store: Arc<MemoryStore>,
        handler: EventHandler,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(Cache::new(Duration::ZERO));
        let queue = Arc::new(WorkQueue::new());
        let store = Arc::new(MemoryStore::default());
        let handler = EventHandler::new(cache.clone(), queue.clone(), store.clone());
        Fixture {
            cache,
            queue,
            store,
            handler,
        }
    }

    fn instance(container: Option<&str>) -> Instance {
        let mut instance = Instance::new("vol", "fast", Quantity::gib(1));
        instance.metadata.uid = Some(Uuid::new_v4());
        instance.spec.container_ref = container.map(str::to_string);
        instance
    }

    #[tokio::test]
    async fn test_unassigned_add_is_queued() {
        let f = fixture();
        let vol = instance(None);

        f.handler
            .handle(StoreEvent::Instance(WatchEvent::Added(vol.clone())))
            .await
            .unwrap();

        assert_eq!(f.cache.instance_count().await, 0);
        assert_eq!(f.queue.try_next().await, vol.metadata.uid);
    }

    #[tokio::test]
    async fn test_binding_confirms_assumption() {
        let f = fixture();
        let old = instance(None);
        let mut new = old.clone();
        new.spec.container_ref = Some("pool-a".to_string());
        f.cache.assume_instance(&new).await.unwrap();

        f.handler
            .handle(StoreEvent::Instance(WatchEvent::Modified {
                old,
                new: new.clone(),
            }))
            .await
            .unwrap();

        assert!(!f.cache.is_assumed_instance(&new).await.unwrap());
        assert_eq!(f.cache.instance_count().await, 1);
    }

    #[tokio::test]
    async fn test_unbinding_removes_and_requeues() {
        let f = fixture();
        let old = instance(Some("pool-a"));
        f.cache.add_instance(&old).await.unwrap();
        let mut new = old.clone();
        new.spec.container_ref = None;

        f.handler
            .handle(StoreEvent::Instance(WatchEvent::Modified { old, new: new.clone() }))
            .await
            .unwrap();

        assert_eq!(f.cache.instance_count().await, 0);
        assert_eq!(f.queue.try_next().await, new.metadata.uid);
    }

    #[tokio::test]
    async fn test_protocol_violation_is_swallowed() {
        let f = fixture();
        let vol = instance(Some("pool-a"));

        let result = f
            .handler
            .handle(StoreEvent::Instance(WatchEvent::Deleted(vol)))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_corruption_is_returned() {
        let f = fixture();
        let vol = instance(Some("pool-a"));
        f.cache.add_instance(&vol).await.unwrap();

        let mut moved = vol.clone();
        moved.spec.container_ref = Some("pool-b".to_string());
        let err = f
            .handler
            .handle(StoreEvent::Instance(WatchEvent::Modified {
                old: moved.clone(),
                new: moved,
            }))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_new_container_requeues_unassigned() {
        let f = fixture();
        let waiting = f
            .store
            .create_instance(Instance::new("vol", "fast", Quantity::gib(1)))
            .await
            .unwrap();

        let pool = Container::new("pool-a").with_allocatable("fast", Quantity::gib(10));
        f.handler
            .handle(StoreEvent::Container(WatchEvent::Added(pool)))
            .await
            .unwrap();

        assert_eq!(f.cache.container_count().await, 1);
        assert_eq!(f.queue.try_next().await, waiting.metadata.uid);
    }

    #[tokio::test]
    async fn test_deleted_container_leaves_snapshot() {
        let f = fixture();
        let pool = Container::new("pool-a").with_allocatable("fast", Quantity::gib(10));
        f.handler
            .handle(StoreEvent::Container(WatchEvent::Added(pool.clone())))
            .await
            .unwrap();
        f.handler
            .handle(StoreEvent::Container(WatchEvent::Deleted(pool)))
            .await
            .unwrap();

        assert_eq!(f.cache.snapshot().await.num_containers(), 0);
    }
}
