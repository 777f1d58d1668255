//! CLI commands implementation

use anyhow::{Context, Result};
use poolet_core::{Container, Diagnostic, Instance, Labels, Manifest, Quantity, Taint};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Container response from API
#[derive(Debug, Deserialize)]
pub struct ContainerResponse {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub taints: Vec<Taint>,
    pub allocatable: BTreeMap<String, Quantity>,
    pub available: BTreeMap<String, Quantity>,
    pub instances: usize,
}

/// Instance response from API
#[derive(Debug, Deserialize)]
pub struct InstanceResponse {
    pub uid: Option<Uuid>,
    pub name: String,
    pub class: Option<String>,
    pub requested: Quantity,
    pub container: Option<String>,
    pub assumed: bool,
    pub deleting: bool,
}

/// Cache summary within the status response
#[derive(Debug, Deserialize)]
pub struct CacheSummary {
    pub assumed: Vec<Uuid>,
    pub orphaned: Vec<String>,
    pub instances: usize,
}

/// Scheduler section of the status response
#[derive(Debug, Deserialize)]
pub struct SchedulerSummary {
    pub resource_kind: String,
    pub client: String,
    pub cache: CacheSummary,
    pub queued: usize,
    pub commits_in_flight: usize,
    pub syncs: u64,
}

/// Status response
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub containers: usize,
    pub instances: usize,
    pub unassigned: usize,
    pub events: usize,
    pub scheduler: SchedulerSummary,
}

/// List containers or show one
pub async fn containers(client: &ApiClient, name: Option<String>) -> Result<()> {
    match name {
        Some(name) => {
            let response = client
                .client
                .get(client.url(&format!("/api/v1/containers/{}", name)))
                .send()
                .await?;

            if response.status().is_success() {
                let container: ContainerResponse = response.json().await?;
                print_container_details(&container);
            } else {
                let error = response.text().await?;
                eprintln!("Container not found: {}", error);
            }
        }
        None => {
            let response = client
                .client
                .get(client.url("/api/v1/containers"))
                .send()
                .await?;

            if response.status().is_success() {
                let containers: Vec<ContainerResponse> = response.json().await?;

                if containers.is_empty() {
                    println!("No containers found");
                } else {
                    println!(
                        "{:<24} {:<10} {:<30} {:<30}",
                        "NAME", "INSTANCES", "ALLOCATABLE", "AVAILABLE"
                    );
                    println!("{}", "-".repeat(96));
                    for c in containers {
                        println!(
                            "{:<24} {:<10} {:<30} {:<30}",
                            c.name,
                            c.instances,
                            format_classes(&c.allocatable),
                            format_classes(&c.available)
                        );
                    }
                }
            } else {
                let error = response.text().await?;
                eprintln!("Failed to list containers: {}", error);
            }
        }
    }

    Ok(())
}

/// List instances
pub async fn instances(
    client: &ApiClient,
    container: Option<String>,
    unassigned: bool,
) -> Result<()> {
    let mut request = client.client.get(client.url("/api/v1/instances"));
    if let Some(container) = &container {
        request = request.query(&[("container", container.as_str())]);
    } else if unassigned {
        request = request.query(&[("unassigned", "true")]);
    }
    let response = request.send().await?;

    if response.status().is_success() {
        let instances: Vec<InstanceResponse> = response.json().await?;

        if instances.is_empty() {
            println!("No instances found");
        } else {
            println!(
                "{:<36} {:<24} {:<16} {:<10} {:<24}",
                "UID", "NAME", "CLASS", "REQUESTED", "CONTAINER"
            );
            println!("{}", "-".repeat(112));
            for i in instances {
                println!(
                    "{:<36} {:<24} {:<16} {:<10} {:<24}",
                    i.uid.map(|u| u.to_string()).unwrap_or_default(),
                    i.name,
                    i.class.unwrap_or_else(|| "-".to_string()),
                    i.requested.to_string(),
                    placement_column(i.container.as_deref(), i.assumed, i.deleting)
                );
            }
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to list instances: {}", error);
    }

    Ok(())
}

/// Show recent diagnostics
pub async fn events(client: &ApiClient, limit: usize, instance: Option<String>) -> Result<()> {
    let mut query = vec![("limit", limit.to_string())];
    if let Some(instance) = instance {
        let uid = resolve_instance(client, &instance).await?;
        query.push(("instance", uid.to_string()));
    }

    let response = client
        .client
        .get(client.url("/api/v1/events"))
        .query(&query)
        .send()
        .await?;

    if response.status().is_success() {
        let events: Vec<Diagnostic> = response.json().await?;

        if events.is_empty() {
            println!("No events recorded");
        } else {
            println!("{:<20} {:<24} {:<16} MESSAGE", "TIME", "INSTANCE", "REASON");
            for e in events {
                println!(
                    "{:<20} {:<24} {:<16} {}",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    e.subject_name,
                    e.reason,
                    e.message
                );
            }
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to list events: {}", error);
    }

    Ok(())
}

/// Show system status
pub async fn status(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .get(client.url("/api/v1/status"))
        .send()
        .await?;

    if response.status().is_success() {
        let status: StatusResponse = response.json().await?;
        let scheduler = &status.scheduler;

        println!("poolet v{}", status.version);
        println!();
        println!("Scheduling: {} ({} store)", scheduler.resource_kind, scheduler.client);
        println!("Containers: {}", status.containers);
        println!(
            "Instances: {} ({} unassigned)",
            status.instances, status.unassigned
        );
        println!(
            "Cache: {} instances, {} assumed, {} orphaned containers",
            scheduler.cache.instances,
            scheduler.cache.assumed.len(),
            scheduler.cache.orphaned.len()
        );
        println!(
            "Queue: {} waiting, {} commits in flight",
            scheduler.queued, scheduler.commits_in_flight
        );
        println!("Syncs: {}", scheduler.syncs);
        println!("Events: {}", status.events);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get status: {}", error);
    }

    Ok(())
}

/// Create every container, then every instance, of a manifest
pub async fn apply(client: &ApiClient, file: &Path) -> Result<()> {
    let manifest = Manifest::from_file(file)
        .with_context(|| format!("Failed to read manifest {}", file.display()))?;

    for container in &manifest.containers {
        let response = client
            .client
            .post(client.url("/api/v1/containers"))
            .json(container)
            .send()
            .await?;

        if response.status().is_success() {
            let applied: Container = response.json().await?;
            println!("container/{} applied", applied.metadata.name);
        } else {
            let error = response.text().await?;
            eprintln!("Failed to apply container {}: {}", container.metadata.name, error);
        }
    }

    for instance in &manifest.instances {
        let response = client
            .client
            .post(client.url("/api/v1/instances"))
            .json(instance)
            .send()
            .await?;

        if response.status().is_success() {
            let created: Instance = response.json().await?;
            println!(
                "instance/{} created ({})",
                created.metadata.name,
                created.display_id()
            );
        } else {
            let error = response.text().await?;
            eprintln!("Failed to create instance {}: {}", instance.metadata.name, error);
        }
    }

    Ok(())
}

/// Delete a container
pub async fn delete_container(client: &ApiClient, name: &str) -> Result<()> {
    let response = client
        .client
        .delete(client.url(&format!("/api/v1/containers/{}", name)))
        .send()
        .await?;

    if response.status().is_success() {
        println!("Container '{}' deleted", name);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to delete container: {}", error);
    }

    Ok(())
}

/// Delete an instance
pub async fn delete_instance(client: &ApiClient, instance: &str) -> Result<()> {
    let uid = resolve_instance(client, instance).await?;

    let response = client
        .client
        .delete(client.url(&format!("/api/v1/instances/{}", uid)))
        .send()
        .await?;

    if response.status().is_success() {
        println!("Instance '{}' deleted", instance);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to delete instance: {}", error);
    }

    Ok(())
}

/// Helper to resolve an instance uid (uid or name)
async fn resolve_instance(client: &ApiClient, instance: &str) -> Result<Uuid> {
    if let Ok(uid) = Uuid::parse_str(instance) {
        return Ok(uid);
    }

    // Names are not unique; take the first match
    let response = client
        .client
        .get(client.url("/api/v1/instances"))
        .send()
        .await?;

    if response.status().is_success() {
        let instances: Vec<InstanceResponse> = response.json().await?;
        if let Some(uid) = instances
            .into_iter()
            .find(|i| i.name == instance)
            .and_then(|i| i.uid)
        {
            return Ok(uid);
        }
    }

    anyhow::bail!("Instance '{}' not found", instance)
}

/// Render per-class quantities as `class=qty` pairs
fn format_classes(quantities: &BTreeMap<String, Quantity>) -> String {
    if quantities.is_empty() {
        return "-".to_string();
    }
    quantities
        .iter()
        .map(|(class, q)| format!("{}={}", class, q))
        .collect::<Vec<_>>()
        .join(",")
}

fn placement_column(container: Option<&str>, assumed: bool, deleting: bool) -> String {
    let mut column = match container {
        Some(name) => name.to_string(),
        None if assumed => "<binding>".to_string(),
        None => "<pending>".to_string(),
    };
    if deleting {
        column.push_str(" (deleting)");
    }
    column
}

/// Helper to print container details
fn print_container_details(container: &ContainerResponse) {
    println!("Container: {}", container.name);
    println!("  Instances: {}", container.instances);
    println!("  Allocatable: {}", format_classes(&container.allocatable));
    println!("  Available: {}", format_classes(&container.available));
    if !container.labels.is_empty() {
        let labels: Vec<String> = container
            .labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("  Labels: {}", labels.join(","));
    }
    for taint in &container.taints {
        match &taint.value {
            Some(value) => println!("  Taint: {}={}:{:?}", taint.key, value, taint.effect),
            None => println!("  Taint: {}:{:?}", taint.key, taint.effect),
        }
    }
}
