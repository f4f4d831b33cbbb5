//! Resource Containers - Quota-Tracking Execution Contexts
//!
//! A [`ResourceContainer`] isolates the consumption of a logical workload.
//! Execution units (threads, or tasks via [`ResourceContainer::scope`]) are
//! bound to at most one non-root container at a time, and the privileged
//! [`ResourceContainer::Root`] sentinel is the implicit default binding.
//!
//! # Design:
//! - Root is a variant, not a subclass: its restricted operations are a
//!   single match arm returning fixed failures
//! - The binding table is per execution unit, so `run()` takes no global lock
//! - Attach/detach is a guard object: the binding is restored on every exit
//!   path, including panics unwinding out of the command
//!
//! # Lifecycle
//! `Running --destroy()--> Destroyed`. `Destroyed` is terminal. Root is
//! always `Running`.
//!
//! Destroying a container that an execution unit is still attached to is a
//! caller error; it is detected and rejected with
//! [`ContainerError::IllegalState`].

pub mod accounting;
pub mod binding;
pub mod gate;
pub mod inherit;
pub mod limits;
pub mod registry;
pub mod task;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

use crate::error::{ContainerError, Result};
use accounting::{Accountant, UsageCounters};
use inherit::{always_inherit, InheritancePredicate};
use limits::{Constraint, ContainerConfig, ResourceType};
use registry::{ContainerId, ContainerInfo, ContainerRegistry};

pub use binding::current;

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Destroyed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// A handle to a resource container.
///
/// Handles are cheap to clone; two handles are equal when they refer to the
/// same container.
///
/// ```rust
/// use rescon_core::container::{current, limits::ContainerConfig, ResourceContainer};
///
/// let container = ResourceContainer::create(ContainerConfig::new().named("worker"));
/// let inside = container.run(|| current() == container).unwrap();
/// assert!(inside);
/// assert!(current().is_root());
/// ```
#[derive(Clone)]
pub enum ResourceContainer {
    /// The process-wide default container. Unconstrained, never destroyed.
    Root,
    /// A container created by [`ResourceContainer::create`].
    Managed(Arc<ManagedContainer>),
}

/// State behind a non-root container handle.
pub struct ManagedContainer {
    id: ContainerId,
    name: Option<String>,
    lifecycle: Mutex<Lifecycle>,
    constraints: RwLock<HashMap<ResourceType, Constraint>>,
    accountant: Arc<dyn Accountant>,
    inheritance: RwLock<InheritancePredicate>,
}

#[derive(Debug)]
struct Lifecycle {
    state: ContainerState,
    /// Execution units currently attached through `run` or `scope`.
    attached: usize,
}

impl ResourceContainer {
    /// The root container.
    pub fn root() -> Self {
        Self::Root
    }

    /// The container the calling thread is bound to.
    pub fn current() -> Self {
        binding::current()
    }

    /// Create a running container registered with the global registry.
    pub fn create(config: ContainerConfig) -> Self {
        Self::create_with(config, UsageCounters::new())
    }

    /// Create a running container whose consumption figures come from
    /// `accountant`.
    pub fn create_with(config: ContainerConfig, accountant: Arc<dyn Accountant>) -> Self {
        Self::create_in(ContainerRegistry::global(), config, accountant)
    }

    /// Create a running container registered with `registry`.
    pub fn create_in(
        registry: &ContainerRegistry,
        config: ContainerConfig,
        accountant: Arc<dyn Accountant>,
    ) -> Self {
        let constraints = config
            .effective_constraints()
            .into_iter()
            .map(|c| (c.resource, c))
            .collect();
        let inner = Arc::new(ManagedContainer {
            id: ContainerId::next(),
            name: config.name,
            lifecycle: Mutex::new(Lifecycle {
                state: ContainerState::Running,
                attached: 0,
            }),
            constraints: RwLock::new(constraints),
            accountant,
            inheritance: RwLock::new(always_inherit()),
        });
        registry.register(inner.id, Arc::downgrade(&inner));
        info!(container = %inner.id, name = ?inner.name, "Created resource container");
        Self::Managed(inner)
    }

    pub fn id(&self) -> ContainerId {
        match self {
            Self::Root => ContainerId::ROOT,
            Self::Managed(inner) => inner.id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Root => Some("root"),
            Self::Managed(inner) => inner.name.as_deref(),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }

    pub fn state(&self) -> ContainerState {
        match self {
            Self::Root => ContainerState::Running,
            Self::Managed(inner) => inner.lifecycle().state,
        }
    }

    /// Insert or replace the constraint for `constraint.resource`.
    pub fn update_constraint(&self, constraint: Constraint) -> Result<()> {
        match self {
            Self::Root => Err(ContainerError::Unsupported(
                "updateConstraint() is not supported by root container",
            )),
            Self::Managed(inner) => {
                // Held across the insert so a concurrent destroy() cannot
                // interleave.
                let lifecycle = inner.lifecycle();
                if lifecycle.state != ContainerState::Running {
                    return Err(ContainerError::not_running());
                }
                inner
                    .constraints
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(constraint.resource, constraint);
                info!(container = %inner.id, %constraint, "Updated constraint");
                Ok(())
            }
        }
    }

    /// The current constraint set, ordered by resource type.
    pub fn constraints(&self) -> Vec<Constraint> {
        match self {
            Self::Root => Vec::new(),
            Self::Managed(inner) => {
                let mut constraints: Vec<Constraint> = inner
                    .constraints
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .copied()
                    .collect();
                constraints.sort_by_key(|c| c.resource);
                constraints
            }
        }
    }

    /// Amount of `resource` consumed, as reported by the accountant.
    /// Always zero for root.
    pub fn consumed_amount(&self, resource: ResourceType) -> u64 {
        match self {
            Self::Root => 0,
            Self::Managed(inner) => inner.accountant.consumed_amount(resource),
        }
    }

    /// Transition to [`ContainerState::Destroyed`].
    ///
    /// Fails with `IllegalState` if the container is already destroyed or
    /// any execution unit is still attached to it.
    pub fn destroy(&self) -> Result<()> {
        match self {
            Self::Root => Err(ContainerError::Unsupported(
                "destroy() is not supported by root container",
            )),
            Self::Managed(inner) => {
                let mut lifecycle = inner.lifecycle();
                if lifecycle.state != ContainerState::Running {
                    return Err(ContainerError::not_running());
                }
                if lifecycle.attached > 0 {
                    warn!(
                        container = %inner.id,
                        attached = lifecycle.attached,
                        "Refusing to destroy attached container"
                    );
                    return Err(ContainerError::IllegalState(format!(
                        "container still attached to {} execution unit(s)",
                        lifecycle.attached
                    )));
                }
                lifecycle.state = ContainerState::Destroyed;
                info!(container = %inner.id, "Destroyed resource container");
                Ok(())
            }
        }
    }

    /// Number of execution units currently attached. Always zero for root,
    /// which is never an explicit attach target.
    pub fn attached_units(&self) -> usize {
        match self {
            Self::Root => 0,
            Self::Managed(inner) => inner.lifecycle().attached,
        }
    }

    /// The policy deciding whether child execution units inherit this
    /// container.
    pub fn inheritance_predicate(&self) -> InheritancePredicate {
        match self {
            Self::Root => always_inherit(),
            Self::Managed(inner) => inner
                .inheritance
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Monitoring view of this container.
    pub fn info(&self) -> ContainerInfo {
        ContainerInfo {
            id: self.id(),
            name: self.name().map(str::to_owned),
            state: self.state(),
            constraints: self.constraints(),
            attached_units: self.attached_units(),
        }
    }

    pub(crate) fn set_inheritance_predicate(&self, predicate: InheritancePredicate) -> Result<()> {
        match self {
            Self::Root => Err(ContainerError::Unsupported(
                "inheritance predicate of root container is fixed",
            )),
            Self::Managed(inner) => {
                *inner
                    .inheritance
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = predicate;
                Ok(())
            }
        }
    }
}

impl ManagedContainer {
    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one more attached execution unit. Fails unless running.
    pub(crate) fn acquire(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state != ContainerState::Running {
            return Err(ContainerError::not_running());
        }
        lifecycle.attached += 1;
        Ok(())
    }

    pub(crate) fn release(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.attached = lifecycle.attached.saturating_sub(1);
    }

    pub(crate) fn id(&self) -> ContainerId {
        self.id
    }
}

impl PartialEq for ResourceContainer {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Root, Self::Root) => true,
            (Self::Managed(a), Self::Managed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for ResourceContainer {}

impl fmt::Debug for ResourceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("ResourceContainer::Root"),
            Self::Managed(inner) => f
                .debug_struct("ResourceContainer")
                .field("id", &inner.id)
                .field("name", &inner.name)
                .field("lifecycle", &*inner.lifecycle())
                .finish(),
        }
    }
}

impl fmt::Display for ResourceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({})", name, self.id()),
            None => write!(f, "container({})", self.id()),
        }
    }
}

/// Privileged hooks for trusted system code such as the thread-spawning
/// subsystem. Not part of the general API surface.
#[doc(hidden)]
pub mod internal {
    use super::inherit::InheritancePredicate;
    use super::ResourceContainer;
    use crate::error::Result;

    /// Replace the thread-inheritance policy of `container`.
    pub fn set_unsafe_thread_inheritance_predicate(
        container: &ResourceContainer,
        predicate: InheritancePredicate,
    ) -> Result<()> {
        container.set_inheritance_predicate(predicate)
    }
}
