//! Container placement: filtering then scoring

use poolet_core::{tolerations_tolerate_taints, Instance, Quantity};
use rand::seq::SliceRandom;
use std::fmt;

use crate::snapshot::ContainerInfo;

/// Why a container was filtered out for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unfit {
    /// The instance does not tolerate one of the container's taints
    UntoleratedTaint,
    /// The container's labels do not satisfy the instance's selector
    SelectorMismatch,
    /// Not enough headroom left for the requested class
    InsufficientCapacity,
}

impl Unfit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unfit::UntoleratedTaint => "untolerated taint",
            Unfit::SelectorMismatch => "selector mismatch",
            Unfit::InsufficientCapacity => "insufficient capacity",
        }
    }
}

impl fmt::Display for Unfit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether `info` can host `instance` for `class`
pub fn filter_container(instance: &Instance, class: &str, info: &ContainerInfo) -> Result<(), Unfit> {
    let container = info.container();

    if !tolerations_tolerate_taints(&instance.spec.tolerations, &container.spec.taints) {
        return Err(Unfit::UntoleratedTaint);
    }

    if let Some(selector) = &instance.spec.container_selector {
        if !selector.matches(&container.metadata.labels) {
            return Err(Unfit::SelectorMismatch);
        }
    }

    if info.max_allocatable(class) < instance.spec.resources {
        return Err(Unfit::InsufficientCapacity);
    }
    Ok(())
}

/// Per-reason count of containers rejected by the filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rejections {
    pub total: usize,
    pub untolerated_taint: usize,
    pub selector_mismatch: usize,
    pub insufficient_capacity: usize,
}

impl Rejections {
    pub fn record(&mut self, reason: Unfit) {
        match reason {
            Unfit::UntoleratedTaint => self.untolerated_taint += 1,
            Unfit::SelectorMismatch => self.selector_mismatch += 1,
            Unfit::InsufficientCapacity => self.insufficient_capacity += 1,
        }
    }
}

impl fmt::Display for Rejections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0/{} containers are available", self.total)?;

        let reasons = [
            (self.insufficient_capacity, Unfit::InsufficientCapacity),
            (self.untolerated_taint, Unfit::UntoleratedTaint),
            (self.selector_mismatch, Unfit::SelectorMismatch),
        ];
        let mut first = true;
        for (count, reason) in reasons.into_iter().filter(|(count, _)| *count > 0) {
            f.write_str(if first { ": " } else { ", " })?;
            write!(f, "{} {}", count, reason)?;
            first = false;
        }
        Ok(())
    }
}

/// Placement decision for an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementDecision {
    /// Chosen container name
    pub container: String,
    /// Headroom of the chosen container before the instance is placed
    pub max_allocatable: Quantity,
    /// Number of containers that passed the filter
    pub feasible: usize,
}

/// Strategy for picking a container
pub trait PlacementStrategy: Send + Sync {
    /// Choose a container for `instance` among `containers`, or report why none fit
    fn place(
        &self,
        instance: &Instance,
        class: &str,
        containers: &[ContainerInfo],
    ) -> Result<PlacementDecision, Rejections>;
}

/// Picks the feasible container with the most headroom for the class.
///
/// Ties are broken uniformly at random so equally sized containers fill evenly.
#[derive(Debug, Default)]
pub struct MostAllocatable;

impl PlacementStrategy for MostAllocatable {
    fn place(
        &self,
        instance: &Instance,
        class: &str,
        containers: &[ContainerInfo],
    ) -> Result<PlacementDecision, Rejections> {
        let mut rejections = Rejections {
            total: containers.len(),
            ..Default::default()
        };

        let mut feasible: Vec<(&ContainerInfo, Quantity)> = Vec::new();
        for info in containers {
            match filter_container(instance, class, info) {
                Ok(()) => feasible.push((info, info.max_allocatable(class))),
                Err(reason) => rejections.record(reason),
            }
        }

        let Some(best) = feasible.iter().map(|(_, q)| *q).max() else {
            return Err(rejections);
        };
        let tied: Vec<&ContainerInfo> = feasible
            .iter()
            .filter(|(_, q)| *q == best)
            .map(|(info, _)| *info)
            .collect();

        let chosen = tied
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| rejections.clone())?;

        Ok(PlacementDecision {
            container: chosen.name().to_string(),
            max_allocatable: best,
            feasible: feasible.len(),
        })
    }
}
