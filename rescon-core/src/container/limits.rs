//! Resource Types, Constraints and Preset Profiles
//!
//! A container's quota is a set of [`Constraint`]s, each tagged with the
//! [`ResourceType`] it limits.  Setting every limit by hand for each new
//! container is tedious and error prone, so this module also carries preset
//! [`ResourceProfile`]s and a serde-backed [`ContainerConfig`] that combines a
//! profile with explicit overrides.
//!
//! # Configuration Pattern:
//! - Profiles give consistent defaults across containers
//! - Explicit constraints override profile values, last writer wins
//! - `ContainerConfig` loads from JSON for host-runtime configuration files

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Identifies a single kind of resource a container can be limited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// CPU bandwidth in microseconds per period (`cpu.max`).
    CpuTime,
    /// Relative CPU weight, 1–10000 (`cpu.weight`).
    CpuShares,
    /// Hard memory limit in bytes (`memory.max`).
    Memory,
    /// Memory soft limit / high watermark in bytes (`memory.high`).
    MemoryHigh,
    /// I/O time budget in microseconds per period (`io.max`).
    IoTime,
    /// Relative I/O weight, 1–10000 (`io.weight`).
    IoWeight,
    /// Maximum number of execution units (`pids.max`).
    Pids,
}

impl ResourceType {
    /// Every resource type, in declaration order.
    pub const ALL: [ResourceType; 7] = [
        Self::CpuTime,
        Self::CpuShares,
        Self::Memory,
        Self::MemoryHigh,
        Self::IoTime,
        Self::IoWeight,
        Self::Pids,
    ];

    fn key(self) -> &'static str {
        match self {
            Self::CpuTime => "cpu.max",
            Self::CpuShares => "cpu.weight",
            Self::Memory => "memory.max",
            Self::MemoryHigh => "memory.high",
            Self::IoTime => "io.max",
            Self::IoWeight => "io.weight",
            Self::Pids => "pids.max",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ResourceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.key() == s)
            .with_context(|| format!("unknown resource type '{s}'"))
    }
}

/// A limit on one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    /// Which resource is limited.
    pub resource: ResourceType,
    /// The limit, in the unit of `resource`.
    pub value: u64,
}

impl Constraint {
    pub fn new(resource: ResourceType, value: u64) -> Self {
        Self { resource, value }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.resource, self.value)
    }
}

/// Preset constraint sets for common workload shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceProfile {
    /// Low-resource profile for helpers and background housekeeping.
    Minimal,
    /// Balanced defaults suitable for most workloads.
    Standard,
    /// High-resource profile for compute-intensive work.
    Performance,
    /// User-defined limits keyed by cgroup-style name (`"memory.max"`).
    /// Unrecognized keys are ignored.
    Custom(HashMap<String, u64>),
}

impl ResourceProfile {
    /// The constraints this profile expands to, ordered by resource type.
    pub fn constraints(&self) -> Vec<Constraint> {
        self.defaults()
            .into_iter()
            .map(|(resource, value)| Constraint::new(resource, value))
            .collect()
    }

    fn defaults(&self) -> BTreeMap<ResourceType, u64> {
        match self {
            Self::Minimal => BTreeMap::from([
                (ResourceType::Memory, 128 * 1024 * 1024),    // 128 MiB
                (ResourceType::MemoryHigh, 96 * 1024 * 1024), // 96 MiB
                (ResourceType::CpuShares, 50),
                (ResourceType::CpuTime, 50_000), // 50 ms / period
                (ResourceType::IoWeight, 50),
                (ResourceType::Pids, 64),
            ]),
            Self::Standard => BTreeMap::from([
                (ResourceType::Memory, 512 * 1024 * 1024),     // 512 MiB
                (ResourceType::MemoryHigh, 384 * 1024 * 1024), // 384 MiB
                (ResourceType::CpuShares, 100),
                (ResourceType::CpuTime, 100_000), // 100 ms / period
                (ResourceType::IoWeight, 100),
                (ResourceType::Pids, 512),
            ]),
            Self::Performance => BTreeMap::from([
                (ResourceType::Memory, 4 * 1024 * 1024 * 1024),     // 4 GiB
                (ResourceType::MemoryHigh, 3 * 1024 * 1024 * 1024), // 3 GiB
                (ResourceType::CpuShares, 1000),
                (ResourceType::CpuTime, 1_000_000), // 1 s / period
                (ResourceType::IoWeight, 500),
                (ResourceType::Pids, 4096),
            ]),
            Self::Custom(map) => map
                .iter()
                .filter_map(|(key, value)| match key.parse::<ResourceType>() {
                    Ok(kind) => Some((kind, *value)),
                    Err(_) => {
                        debug!(key = %key, "Ignoring unknown resource key in custom profile");
                        None
                    }
                })
                .collect(),
        }
    }
}

/// Everything needed to create a container.
///
/// ```rust,no_run
/// # use rescon_core::container::limits::ContainerConfig;
/// let config = ContainerConfig::from_json(
///     r#"{ "name": "batch", "profile": "minimal",
///          "constraints": [{ "resource": "pids", "value": 16 }] }"#,
/// ).unwrap();
/// assert_eq!(config.effective_constraints().len(), 6);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Optional label shown by monitoring.
    pub name: Option<String>,
    /// Preset applied before the explicit constraints.
    pub profile: Option<ResourceProfile>,
    /// Explicit constraints; these win over profile values.
    pub constraints: Vec<Constraint>,
}

impl ContainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse container configuration")
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_profile(mut self, profile: ResourceProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_constraint(mut self, resource: ResourceType, value: u64) -> Self {
        self.constraints.push(Constraint::new(resource, value));
        self
    }

    /// Profile defaults overlaid with explicit constraints, one entry per
    /// resource type, ordered by resource type.
    pub fn effective_constraints(&self) -> Vec<Constraint> {
        let mut merged = self
            .profile
            .as_ref()
            .map(ResourceProfile::defaults)
            .unwrap_or_default();
        for constraint in &self.constraints {
            merged.insert(constraint.resource, constraint.value);
        }
        merged
            .into_iter()
            .map(|(resource, value)| Constraint::new(resource, value))
            .collect()
    }
}
