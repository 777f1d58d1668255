//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use poolet_core::{
    Container, Diagnostic, Instance, Labels, PooletError, Quantity, Taint,
};
use poolet_scheduler::{Scheduler, SchedulerStatus};
use poolet_store::{EventLog, InstanceFilter, MemoryStore, StateClient};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Default number of diagnostics returned by the events endpoint
const DEFAULT_EVENT_LIMIT: usize = 50;

type ApiError = (StatusCode, String);

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub scheduler: Arc<Scheduler>,
    pub events: Arc<EventLog>,
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/containers",
            get(list_containers).post(apply_container),
        )
        .route(
            "/api/v1/containers/:name",
            get(get_container).delete(delete_container),
        )
        .route(
            "/api/v1/instances",
            get(list_instances).post(create_instance),
        )
        .route(
            "/api/v1/instances/:uid",
            get(get_instance).delete(delete_instance),
        )
        .route("/api/v1/events", get(list_events))
        .route("/api/v1/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(e: PooletError) -> ApiError {
    let status = match &e {
        PooletError::InstanceNotFound(_) | PooletError::ContainerNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        PooletError::AlreadyPresent(_) | PooletError::Conflict(_) => StatusCode::CONFLICT,
        PooletError::Validation(_) | PooletError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// Container as seen by the scheduler
#[derive(Debug, Serialize, Deserialize)]
pub struct ContainerResponse {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Published allocatable quantity per class
    pub allocatable: BTreeMap<String, Quantity>,
    /// Allocatable minus what the scheduler has recorded, per class
    pub available: BTreeMap<String, Quantity>,
    pub instances: usize,
}

async fn container_response(state: &AppState, container: Container) -> ContainerResponse {
    let snapshot = state.scheduler.cache().snapshot().await;

    let (available, instances) = match snapshot.get_container(container.name()) {
        Ok(info) => (
            container
                .status
                .allocatable
                .keys()
                .map(|class| (class.clone(), info.max_allocatable(class)))
                .collect(),
            info.num_instances(),
        ),
        Err(_) => (container.status.allocatable.clone(), 0),
    };

    ContainerResponse {
        name: container.metadata.name,
        labels: container.metadata.labels,
        taints: container.spec.taints,
        allocatable: container.status.allocatable,
        available,
        instances,
    }
}

/// List all containers
async fn list_containers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ContainerResponse>>, ApiError> {
    let mut responses = Vec::new();
    for container in state.store.list_containers().await {
        responses.push(container_response(&state, container).await);
    }
    Ok(Json(responses))
}

/// Get a specific container
async fn get_container(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ContainerResponse>, ApiError> {
    let container = state
        .store
        .get_container(&name)
        .await
        .ok_or_else(|| error_response(PooletError::ContainerNotFound(name)))?;
    Ok(Json(container_response(&state, container).await))
}

/// Create or replace a container
async fn apply_container(
    State(state): State<Arc<AppState>>,
    Json(container): Json<Container>,
) -> Result<Json<Container>, ApiError> {
    info!(container = %container.metadata.name, "Applying container");

    let container = state
        .store
        .apply_container(container)
        .await
        .map_err(error_response)?;
    Ok(Json(container))
}

/// Delete a container
async fn delete_container(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    info!(container = %name, "Deleting container");

    state
        .store
        .delete_container(&name)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Instance listing filter
#[derive(Debug, Default, Deserialize)]
pub struct InstanceQuery {
    /// Only instances bound to this container
    pub container: Option<String>,
    /// Only instances without a container
    #[serde(default)]
    pub unassigned: bool,
}

impl InstanceQuery {
    fn filter(self) -> InstanceFilter {
        match (self.container, self.unassigned) {
            (Some(name), _) => InstanceFilter::AssignedTo(name),
            (None, true) => InstanceFilter::Unassigned,
            (None, false) => InstanceFilter::All,
        }
    }
}

/// Instance response
#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceResponse {
    pub uid: Option<Uuid>,
    pub name: String,
    pub class: Option<String>,
    pub requested: Quantity,
    pub container: Option<String>,
    /// Placed by the scheduler but not yet confirmed by the store
    pub assumed: bool,
    pub deleting: bool,
}

async fn instance_response(state: &AppState, instance: Instance) -> InstanceResponse {
    let assumed = !instance.is_assigned()
        && state
            .scheduler
            .cache()
            .is_assumed_instance(&instance)
            .await
            .unwrap_or(false);

    InstanceResponse {
        uid: instance.metadata.uid,
        deleting: instance.is_deleting(),
        name: instance.metadata.name,
        class: instance.spec.class_ref,
        requested: instance.spec.resources,
        container: instance.spec.container_ref,
        assumed,
    }
}

/// List instances
async fn list_instances(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InstanceQuery>,
) -> Result<Json<Vec<InstanceResponse>>, ApiError> {
    let mut instances = state
        .store
        .list_instances(&query.filter())
        .await
        .map_err(error_response)?;
    instances.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

    let mut responses = Vec::with_capacity(instances.len());
    for instance in instances {
        responses.push(instance_response(&state, instance).await);
    }
    Ok(Json(responses))
}

/// Get a specific instance
async fn get_instance(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<Uuid>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state
        .store
        .get_instance(uid)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(PooletError::InstanceNotFound(uid.to_string())))?;
    Ok(Json(instance))
}

/// Create an instance
async fn create_instance(
    State(state): State<Arc<AppState>>,
    Json(instance): Json<Instance>,
) -> Result<(StatusCode, Json<Instance>), ApiError> {
    if instance.metadata.name.is_empty() {
        return Err(error_response(PooletError::Validation(
            "instance name is empty".to_string(),
        )));
    }

    info!(
        name = %instance.metadata.name,
        requested = %instance.spec.resources,
        "Creating instance"
    );

    let instance = state
        .store
        .create_instance(instance)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// Delete an instance
async fn delete_instance(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    info!(instance_uid = %uid, "Deleting instance");

    state
        .store
        .delete_instance(uid)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Diagnostics listing filter
#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    pub limit: Option<usize>,
    /// Only diagnostics about this instance
    pub instance: Option<Uuid>,
}

/// List recent diagnostics, newest first
async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<Diagnostic>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    let events = match query.instance {
        Some(uid) => state
            .events
            .for_instance(uid)
            .await
            .into_iter()
            .take(limit)
            .collect(),
        None => state.events.list(limit).await,
    };
    Ok(Json(events))
}

/// System status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub containers: usize,
    pub instances: usize,
    pub unassigned: usize,
    pub events: usize,
    pub scheduler: SchedulerStatus,
}

/// Get system status
async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, ApiError> {
    let instances = state
        .store
        .list_instances(&InstanceFilter::All)
        .await
        .map_err(error_response)?;
    let unassigned = instances.iter().filter(|i| !i.is_assigned()).count();

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        containers: state.store.list_containers().await.len(),
        instances: instances.len(),
        unassigned,
        events: state.events.len().await,
        scheduler: state.scheduler.status().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use poolet_core::SchedulerConfig;
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let store = Arc::new(MemoryStore::default());
        let events = Arc::new(EventLog::default());
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig::default(),
            store.clone(),
            events.clone(),
        ));
        Arc::new(AppState {
            store,
            scheduler,
            events,
        })
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_containers_reports_available() {
        let state = state();
        let pool = Container::new("pool-a").with_allocatable("fast", Quantity::gib(100));
        state.store.apply_container(pool.clone()).await.unwrap();
        state.scheduler.cache().add_container(&pool).await;

        let mut vol = Instance::new("vol", "fast", Quantity::gib(30));
        vol.metadata.uid = Some(Uuid::new_v4());
        vol.spec.container_ref = Some("pool-a".to_string());
        state.scheduler.cache().add_instance(&vol).await.unwrap();

        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/containers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let containers: Vec<ContainerResponse> = body_json(response).await;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].available["fast"], Quantity::gib(70));
        assert_eq!(containers[0].instances, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_container_is_404() {
        let response = create_router(state())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/containers/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_and_filter_instances() {
        let state = state();
        let router = create_router(state.clone());
        let body = serde_json::to_vec(&Instance::new("vol", "fast", Quantity::gib(1))).unwrap();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/instances")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Instance = body_json(response).await;
        assert!(created.metadata.uid.is_some());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/instances?unassigned=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let instances: Vec<InstanceResponse> = body_json(response).await;
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].uid, created.metadata.uid);
        assert!(!instances[0].assumed);
    }

    #[tokio::test]
    async fn test_delete_unknown_instance_is_404() {
        let response = create_router(state())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/instances/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status() {
        let state = state();
        state
            .store
            .create_instance(Instance::new("vol", "fast", Quantity::gib(1)))
            .await
            .unwrap();

        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let status: serde_json::Value = body_json(response).await;
        assert_eq!(status["instances"], 1);
        assert_eq!(status["unassigned"], 1);
        assert_eq!(status["scheduler"]["resource_kind"], "volume");
    }
}
