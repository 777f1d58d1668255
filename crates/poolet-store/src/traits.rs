//! External collaborator traits

use async_trait::async_trait;
use poolet_core::{Container, Diagnostic, Instance, PooletResult, StoreEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Field filter for instance listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceFilter {
    #[default]
    All,
    /// Instances whose container affinity is empty
    Unassigned,
    /// Instances bound to the named container
    AssignedTo(String),
}

impl InstanceFilter {
    pub fn matches(&self, instance: &Instance) -> bool {
        match self {
            InstanceFilter::All => true,
            InstanceFilter::Unassigned => !instance.is_assigned(),
            InstanceFilter::AssignedTo(name) => instance.container_key() == name,
        }
    }
}

/// Consistent full listing of the store
#[derive(Debug, Clone, Default)]
pub struct StateList {
    pub containers: Vec<Container>,
    pub instances: Vec<Instance>,
    /// Version of the newest write reflected in the listing
    pub resource_version: u64,
}

/// Watch/list/get/patch access to the cluster state
#[async_trait]
pub trait StateClient: Send + Sync {
    /// List every container and instance at one consistent version
    async fn list_state(&self) -> PooletResult<StateList>;

    /// List instances matching a field filter
    async fn list_instances(&self, filter: &InstanceFilter) -> PooletResult<Vec<Instance>>;

    /// Get an instance by uid
    async fn get_instance(&self, uid: Uuid) -> PooletResult<Option<Instance>>;

    /// Set the container affinity of an instance.
    ///
    /// Fails with a conflict when the stored copy is newer than
    /// `resource_version` or is already bound.
    async fn bind_instance(
        &self,
        uid: Uuid,
        resource_version: u64,
        container: &str,
    ) -> PooletResult<Instance>;

    /// Subscribe to the change feed
    fn watch(&self) -> broadcast::Receiver<StoreEvent>;

    /// Get the client name
    fn name(&self) -> &'static str;
}

/// Fire-and-forget sink for operator-visible diagnostics
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, diagnostic: Diagnostic);
}
