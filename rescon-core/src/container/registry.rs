//! Container identity and enumeration for monitoring.
//!
//! Identities come from one process-wide lock-free counter shared by every
//! registry, so concurrent construction never collides and no identity is
//! reused while the process lives. The enumeration map holds containers weakly:
//! monitoring must not keep a workload's container alive. Stale entries are
//! swept every [`PRUNE_INTERVAL`] registrations. Root always has
//! identity 0 and is always listed.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock, Weak};
use tracing::debug;

use super::limits::Constraint;
use super::{ContainerState, ManagedContainer, ResourceContainer};

/// Next managed identity; 0 is reserved for root.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Registrations between automatic sweeps of stale entries.
pub const PRUNE_INTERVAL: usize = 256;

/// Unique identity of a container within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ContainerId(u64);

impl ContainerId {
    /// Identity of the root container.
    pub const ROOT: ContainerId = ContainerId(0);

    /// Reserve a fresh identity from the process-wide counter.
    pub(crate) fn next() -> Self {
        ContainerId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serializable monitoring view of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub name: Option<String>,
    pub state: ContainerState,
    pub constraints: Vec<Constraint>,
    pub attached_units: usize,
}

/// Issues container identities and lets monitoring enumerate containers.
///
/// # Concurrency
/// Identities are reserved with a single `fetch_add` on the process-wide
/// counter before a container is built, so they are unique across all
/// registries and increase in reservation order no matter how many threads
/// construct containers at once. A container is registered only once fully
/// built, so a sweep never sees it half-constructed. Readers
/// share the `RwLock`.
pub struct ContainerRegistry {
    registrations: AtomicUsize,
    containers: RwLock<BTreeMap<ContainerId, Weak<ManagedContainer>>>,
}

static GLOBAL: OnceLock<ContainerRegistry> = OnceLock::new();

impl ContainerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            registrations: AtomicUsize::new(0),
            containers: RwLock::new(BTreeMap::new()),
        }
    }

    /// The process-wide registry used by [`ResourceContainer::create`].
    pub fn global() -> &'static ContainerRegistry {
        GLOBAL.get_or_init(ContainerRegistry::new)
    }

    /// Record a fully built container under `id` for enumeration.
    pub(crate) fn register(&self, id: ContainerId, container: Weak<ManagedContainer>) {
        let registered = self.registrations.fetch_add(1, Ordering::Relaxed) + 1;
        let sweep = registered % PRUNE_INTERVAL == 0;
        let mut containers = self
            .containers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if sweep {
            let before = containers.len();
            containers.retain(|_, weak| weak.strong_count() > 0);
            debug!(pruned = before - containers.len(), "Swept stale registry entries");
        }
        containers.insert(id, container);
        debug!(container = %id, "Registered container");
    }

    /// Look up a live container by identity.
    pub fn get(&self, id: ContainerId) -> Option<ResourceContainer> {
        if id == ContainerId::ROOT {
            return Some(ResourceContainer::Root);
        }
        self.containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .and_then(Weak::upgrade)
            .map(ResourceContainer::Managed)
    }

    /// Every live container, root first, then by identity.
    pub fn containers(&self) -> Vec<ResourceContainer> {
        let live = self
            .containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(Weak::upgrade)
            .map(ResourceContainer::Managed)
            .collect::<Vec<_>>();
        std::iter::once(ResourceContainer::Root).chain(live).collect()
    }

    /// Monitoring snapshot of every live container.
    pub fn snapshot(&self) -> Vec<ContainerInfo> {
        self.containers().iter().map(ResourceContainer::info).collect()
    }

    /// Drop entries whose containers no longer exist; returns how many.
    pub fn prune(&self) -> usize {
        let mut containers = self
            .containers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = containers.len();
        containers.retain(|_, weak| weak.strong_count() > 0);
        let pruned = before - containers.len();
        if pruned > 0 {
            debug!(pruned, "Pruned stale registry entries");
        }
        pruned
    }

    /// Number of entries, stale ones included, plus root.
    pub fn len(&self) -> usize {
        self.containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
            + 1
    }

    /// Always `false`: root is always registered.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for ContainerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
