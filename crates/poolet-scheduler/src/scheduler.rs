//! Main scheduler logic
//!
//! One reconcile runs at a time: it refreshes the snapshot, filters and scores
//! the containers, then assumes the instance onto the winner. Committing the
//! decision to the store happens in a background task so the reconcile path
//! never waits on store latency.

use futures::FutureExt;
use poolet_core::{
    Diagnostic, Instance, PooletError, PooletResult, SchedulerConfig, StoreEvent,
    REASON_CANNOT_SCHEDULE, REASON_OUT_OF_CAPACITY, REASON_SCHEDULED,
};
use poolet_store::{EventRecorder, StateClient};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{Cache, CacheDump};
use crate::handler::EventHandler;
use crate::placement::{MostAllocatable, PlacementStrategy};
use crate::queue::WorkQueue;
use crate::snapshot::Snapshot;

/// Delay before listing again after a failed list
const RELIST_BACKOFF: Duration = Duration::from_secs(1);

/// Result of one reconcile attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Nothing to do for this instance
    Skipped,
    /// No container can host the instance right now
    Unschedulable,
    /// Assumed onto the named container; the commit runs in the background
    Assumed(String),
}

/// Scheduler state for introspection
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub resource_kind: String,
    pub client: String,
    pub cache: CacheDump,
    pub queued: usize,
    pub commits_in_flight: usize,
    /// Full lists taken so far; more than one means the cache was rebuilt
    pub syncs: u64,
}

/// Scheduler places unassigned instances onto containers
pub struct Scheduler {
    config: SchedulerConfig,
    cache: Arc<Cache>,
    queue: Arc<WorkQueue>,
    handler: EventHandler,
    client: Arc<dyn StateClient>,
    recorder: Arc<dyn EventRecorder>,
    strategy: Arc<dyn PlacementStrategy>,
    /// Held for the whole filter/score/assume sequence
    snapshot: Mutex<Snapshot>,
    commits: Mutex<Vec<JoinHandle<()>>>,
    syncs: AtomicU64,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        config: SchedulerConfig,
        client: Arc<dyn StateClient>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        let cache = Arc::new(Cache::new(config.assume_ttl()));
        let queue = Arc::new(WorkQueue::new());
        let handler = EventHandler::new(cache.clone(), queue.clone(), client.clone());

        info!(
            kind = %config.resource_kind,
            client = client.name(),
            assume_ttl_secs = config.assume_ttl_secs,
            bind_timeout_secs = config.bind_timeout_secs,
            "Scheduler initialized"
        );

        Self {
            config,
            cache,
            queue,
            handler,
            client,
            recorder,
            strategy: Arc::new(MostAllocatable),
            snapshot: Mutex::new(Snapshot::new()),
            commits: Mutex::new(Vec::new()),
            syncs: AtomicU64::new(0),
        }
    }

    /// Replace the placement strategy
    pub fn with_strategy(mut self, strategy: Arc<dyn PlacementStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Apply one watch event to the cache and the work queue
    pub async fn handle_event(&self, event: StoreEvent) -> PooletResult<()> {
        self.handler.handle(event).await
    }

    /// Fetch the instance from the store and schedule it if still unassigned
    pub async fn reconcile(&self, uid: Uuid) -> PooletResult<ScheduleOutcome> {
        let Some(instance) = self.client.get_instance(uid).await? else {
            debug!(instance_uid = %uid, "Instance no longer exists");
            return Ok(ScheduleOutcome::Skipped);
        };
        if instance.is_assigned() {
            return Ok(ScheduleOutcome::Skipped);
        }
        self.schedule(&instance).await
    }

    /// Run one scheduling decision for an unassigned instance
    pub async fn schedule(&self, instance: &Instance) -> PooletResult<ScheduleOutcome> {
        let uid = instance.key()?;

        if instance.is_deleting() {
            debug!(instance_uid = %uid, "Instance is being deleted, skipping");
            return Ok(ScheduleOutcome::Skipped);
        }
        let Some(class) = instance.spec.class_ref.as_deref() else {
            debug!(instance_uid = %uid, "Instance has no resource class, skipping");
            return Ok(ScheduleOutcome::Skipped);
        };

        let mut snapshot = self.snapshot.lock().await;

        // The store copy may predate our own decision or its confirmation.
        if self.cache.contains_instance(instance).await? {
            debug!(instance_uid = %uid, "Instance already placed, skipping");
            return Ok(ScheduleOutcome::Skipped);
        }

        self.cache.update_snapshot(&mut snapshot).await;
        if snapshot.num_containers() == 0 {
            self.recorder
                .record(Diagnostic::new(
                    instance,
                    REASON_OUT_OF_CAPACITY,
                    format!("no {} containers are available", self.config.resource_kind),
                ))
                .await;
            return Ok(ScheduleOutcome::Unschedulable);
        }

        let decision = match self
            .strategy
            .place(instance, class, snapshot.list_containers())
        {
            Ok(decision) => decision,
            Err(rejections) => {
                self.recorder
                    .record(Diagnostic::new(
                        instance,
                        REASON_OUT_OF_CAPACITY,
                        format!(
                            "{} for {} {} of class {}",
                            rejections, instance.spec.resources, self.config.resource_kind, class
                        ),
                    ))
                    .await;
                return Ok(ScheduleOutcome::Unschedulable);
            }
        };

        let mut assumed = instance.clone();
        assumed.spec.container_ref = Some(decision.container.clone());
        if let Err(e) = self.cache.assume_instance(&assumed).await {
            self.recorder
                .record(Diagnostic::new(
                    instance,
                    REASON_CANNOT_SCHEDULE,
                    format!("failed to assume onto {}: {}", decision.container, e),
                ))
                .await;
            return Err(e);
        }

        info!(
            instance_uid = %uid,
            container = %decision.container,
            requested = %instance.spec.resources,
            headroom = %decision.max_allocatable,
            feasible = decision.feasible,
            "Instance assumed"
        );

        self.spawn_commit(assumed).await;
        Ok(ScheduleOutcome::Assumed(decision.container))
    }

    /// Commit an assumed decision in the background.
    ///
    /// Whatever happens to the commit, including a panic, the task marks the
    /// binding finished and reverts the assumption on failure.
    async fn spawn_commit(&self, assumed: Instance) {
        let cache = self.cache.clone();
        let client = self.client.clone();
        let recorder = self.recorder.clone();
        let timeout = self.config.bind_timeout();

        let handle = tokio::spawn(async move {
            let commit = AssertUnwindSafe(bind(client.as_ref(), &assumed, timeout));
            let outcome = commit.catch_unwind().await;

            if let Err(e) = cache.finish_binding(&assumed).await {
                warn!(instance = %assumed.display_id(), error = %e, "Failed to finish binding");
            }

            let failure = match outcome {
                Ok(Ok(bound)) => {
                    recorder
                        .record(Diagnostic::new(
                            &bound,
                            REASON_SCHEDULED,
                            format!("bound to {}", bound.container_key()),
                        ))
                        .await;
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "commit task panicked".to_string(),
            };

            warn!(
                instance = %assumed.display_id(),
                container = %assumed.container_key(),
                error = %failure,
                "Commit failed, forgetting assumed instance"
            );
            if let Err(e) = cache.forget_instance(&assumed).await {
                debug!(instance = %assumed.display_id(), error = %e, "Assumption already gone");
            }
            recorder
                .record(Diagnostic::new(
                    &assumed,
                    REASON_CANNOT_SCHEDULE,
                    format!("failed to bind to {}: {}", assumed.container_key(), failure),
                ))
                .await;
        });

        let mut commits = self.commits.lock().await;
        commits.retain(|h| !h.is_finished());
        commits.push(handle);
    }

    /// Wait for every commit spawned so far to conclude
    pub async fn wait_for_commits(&self) {
        let handles = std::mem::take(&mut *self.commits.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Commit task did not complete");
            }
        }
    }

    /// Rebuild the cache from a full list and queue every unassigned instance.
    ///
    /// Returns the resource version the list was taken at.
    pub async fn sync(&self) -> PooletResult<u64> {
        let list = self.client.list_state().await?;

        // No reconcile may observe the cache half rebuilt.
        let _snapshot = self.snapshot.lock().await;
        self.cache.reset().await;

        for container in &list.containers {
            self.cache.add_container(container).await;
        }

        let mut unassigned = 0usize;
        for instance in &list.instances {
            if instance.is_assigned() {
                if let Err(e) = self.cache.add_instance(instance).await {
                    warn!(instance = %instance.display_id(), error = %e, "Skipping listed instance");
                }
            } else {
                self.queue.add(instance.key()?).await;
                unassigned += 1;
            }
        }

        self.syncs.fetch_add(1, Ordering::Relaxed);
        info!(
            containers = list.containers.len(),
            instances = list.instances.len(),
            unassigned,
            resource_version = list.resource_version,
            "Cache synchronized"
        );
        Ok(list.resource_version)
    }

    /// Queue every unassigned instance again
    pub async fn resync(&self) -> usize {
        match self.handler.requeue_unassigned().await {
            Ok(queued) => queued,
            Err(e) => {
                warn!(error = %e, "Periodic resync failed");
                0
            }
        }
    }

    /// Current state for introspection
    pub async fn status(&self) -> SchedulerStatus {
        let commits_in_flight = self
            .commits
            .lock()
            .await
            .iter()
            .filter(|h| !h.is_finished())
            .count();

        SchedulerStatus {
            resource_kind: self.config.resource_kind.to_string(),
            client: self.client.name().to_string(),
            cache: self.cache.dump().await,
            queued: self.queue.len().await,
            commits_in_flight,
            syncs: self.syncs.load(Ordering::Relaxed),
        }
    }

    /// Run the scheduler until `shutdown` flips to true.
    ///
    /// Owns the expiry sweep and the reconcile worker. A fatal error from the
    /// event adapter or a lagged watch feed discards the cache and rebuilds it
    /// from a fresh list; a closed feed ends the run with an error.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> PooletResult<()> {
        info!(kind = %self.config.resource_kind, "Starting scheduler");

        let (stop_tx, stop_rx) = watch::channel(false);
        let expiry = tokio::spawn(
            self.cache
                .clone()
                .run_expiry(self.config.expiry_interval(), stop_rx.clone()),
        );
        let worker = tokio::spawn(self.clone().run_worker(stop_rx));

        let result = self.supervise(&mut shutdown).await;

        let _ = stop_tx.send(true);
        for task in [expiry, worker] {
            if let Err(e) = task.await {
                warn!(error = %e, "Scheduler task did not stop cleanly");
            }
        }
        self.wait_for_commits().await;

        match &result {
            Ok(()) => info!("Scheduler stopped"),
            Err(e) => error!(error = %e, "Scheduler stopped with error"),
        }
        result
    }

    async fn supervise(&self, shutdown: &mut watch::Receiver<bool>) -> PooletResult<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            // Subscribe before listing so no change between the two is lost.
            let mut events = self.client.watch();
            let listed = match self.sync().await {
                Ok(version) => version,
                Err(e) => {
                    error!(error = %e, "Failed to list state");
                    if sleep_or_shutdown(shutdown, RELIST_BACKOFF).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            match self.watch_events(&mut events, listed, shutdown).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Cache can no longer be trusted, rebuilding");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn watch_events(
        &self,
        events: &mut broadcast::Receiver<StoreEvent>,
        listed: u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PooletResult<()> {
        let mut resync = self
            .config
            .resync_interval()
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                _ = next_tick(resync.as_mut()) => {
                    let queued = self.resync().await;
                    debug!(queued, "Periodic resync");
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        // Already reflected in the list this cache was built from.
                        if event.resource_version() <= listed {
                            continue;
                        }
                        self.handle_event(event).await?;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        return Err(PooletError::Corruption(format!(
                            "watch feed lagged, {} events missed",
                            missed
                        )));
                    }
                    Err(RecvError::Closed) => {
                        return Err(PooletError::Store("watch feed closed".to_string()));
                    }
                },
            }
        }
    }

    async fn run_worker(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        debug!("Starting reconcile worker");

        loop {
            tokio::select! {
                uid = self.queue.next() => {
                    match self.reconcile(uid).await {
                        Ok(outcome) => debug!(instance_uid = %uid, ?outcome, "Reconciled"),
                        Err(e) => warn!(instance_uid = %uid, error = %e, "Reconcile failed"),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("Reconcile worker shutting down");
                        return;
                    }
                }
            }
        }
    }
}

/// Patch the store with the assumed container, bounded by `timeout`
async fn bind(
    client: &dyn StateClient,
    assumed: &Instance,
    timeout: Duration,
) -> PooletResult<Instance> {
    let uid = assumed.key()?;
    let container = assumed.container_key();

    tokio::time::timeout(
        timeout,
        client.bind_instance(uid, assumed.metadata.resource_version, container),
    )
    .await
    .map_err(|_| PooletError::Timeout(format!("binding {} to {}", uid, container)))?
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Returns true if shutdown was requested before `delay` elapsed
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
