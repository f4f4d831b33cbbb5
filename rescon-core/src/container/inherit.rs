//! Child execution units and container inheritance.
//!
//! When a bound execution unit spawns a child, the parent's container decides
//! through its [`InheritancePredicate`] whether the child starts inside the
//! same container or in root. The default predicate always inherits; trusted
//! system code replaces it via
//! `container::internal::set_unsafe_thread_inheritance_predicate`.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

use super::{binding, ResourceContainer};
use crate::error::Result;

/// Decides whether a would-be child unit inherits the parent's container.
pub type InheritancePredicate = Arc<dyn Fn(&ChildUnit) -> bool + Send + Sync>;

/// The predicate every container starts with.
pub fn always_inherit() -> InheritancePredicate {
    Arc::new(|_: &ChildUnit| true)
}

/// Description of an execution unit about to be spawned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildUnit {
    name: Option<String>,
    kind: UnitKind,
}

/// What sort of execution unit a [`ChildUnit`] will be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnitKind {
    #[default]
    Thread,
    Task,
}

impl ChildUnit {
    pub fn new(name: Option<String>, kind: UnitKind) -> Self {
        Self { name, kind }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(Some(name.into()), UnitKind::Thread)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }
}

/// The container a child described by `child` should start in.
pub fn inherited_container(child: &ChildUnit) -> ResourceContainer {
    let parent = binding::current();
    if parent.is_root() || (parent.inheritance_predicate())(child) {
        parent
    } else {
        debug!(container = %parent.id(), child = ?child.name(), "Child does not inherit container");
        ResourceContainer::Root
    }
}

/// Spawn an OS thread that starts in the container it inherits from the
/// caller.
///
/// The child's body runs through [`ResourceContainer::run`], so its result is
/// `Err` if the inherited container was destroyed before the thread started.
pub fn spawn<F, T>(name: Option<String>, f: F) -> io::Result<JoinHandle<Result<T>>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let child = ChildUnit::new(name.clone(), UnitKind::Thread);
    let container = inherited_container(&child);
    let mut builder = thread::Builder::new();
    if let Some(name) = name {
        builder = builder.name(name);
    }
    builder.spawn(move || container.run(f))
}

/// Spawn a tokio task that is bound to the container it inherits from the
/// caller on every poll.
///
/// Must be called from within a tokio runtime.
pub fn spawn_task<F>(future: F) -> tokio::task::JoinHandle<Result<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let child = ChildUnit::new(None, UnitKind::Task);
    let container = inherited_container(&child);
    tokio::spawn(container.scope(future))
}
