//! Execution gate: the attach/run/detach protocol.
//!
//! [`ResourceContainer::run`] is the only public way to change the calling
//! thread's binding. The rules:
//!
//! - a non-running container refuses to run anything;
//! - running into the container the unit is already in executes directly;
//! - otherwise the unit must be in root; non-root to non-root is refused;
//! - running into root from inside `C` detaches from `C` for the duration
//!   and re-binds `C` afterwards.
//!
//! Bindings are held by guards, so they are restored when the command
//! returns, returns an error, or panics.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{binding, ManagedContainer, ResourceContainer};
use crate::error::{ContainerError, Result};

impl ResourceContainer {
    /// Run `command` with the calling thread bound to this container.
    ///
    /// The command's own result is returned unchanged inside `Ok`; `Err` is
    /// only produced by protocol violations, before `command` is invoked.
    ///
    /// ```rust
    /// use rescon_core::container::{current, limits::ContainerConfig, ResourceContainer};
    ///
    /// let a = ResourceContainer::create(ContainerConfig::new());
    /// let b = ResourceContainer::create(ContainerConfig::new());
    /// let nested = a.run(|| b.run(|| ())).unwrap();
    /// assert!(nested.unwrap_err().is_illegal_state());
    /// ```
    pub fn run<F, R>(&self, command: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        match self {
            Self::Root => Ok(run_in_root(command)),
            Self::Managed(inner) => {
                if self.state() != super::ContainerState::Running {
                    warn!(container = %inner.id(), "Refusing to run in non-running container");
                    return Err(ContainerError::not_running());
                }
                let cur = binding::current();
                if cur == *self {
                    return Ok(command());
                }
                if !cur.is_root() {
                    warn!(
                        from = %cur.id(),
                        to = %inner.id(),
                        "Refusing non-root to non-root transition"
                    );
                    return Err(ContainerError::not_in_root());
                }
                let _guard = AttachGuard::attach(inner)?;
                Ok(command())
            }
        }
    }

    /// Bind the calling thread to this container. The caller must be in root.
    ///
    /// Root is never an explicit attach target.
    pub(crate) fn attach(&self) -> Result<()> {
        match self {
            Self::Root => Err(ContainerError::Unsupported("should not reach here")),
            Self::Managed(inner) => {
                inner.acquire()?;
                binding::swap(self.clone());
                debug!(container = %inner.id(), "Attached");
                Ok(())
            }
        }
    }

    /// Return the calling thread to root. The caller must be bound to this
    /// container.
    pub(crate) fn detach(&self) -> Result<()> {
        match self {
            Self::Root => Err(ContainerError::Unsupported("should not reach here")),
            Self::Managed(inner) => {
                debug_assert!(
                    binding::current() == *self,
                    "detach from a container the unit is not bound to"
                );
                binding::swap(Self::Root);
                inner.release();
                debug!(container = %inner.id(), "Detached");
                Ok(())
            }
        }
    }
}

fn run_in_root<F, R>(command: F) -> R
where
    F: FnOnce() -> R,
{
    let cur = binding::current();
    if cur.is_root() {
        return command();
    }
    let _guard = RootGuard::enter(cur);
    command()
}

/// Holds the calling thread attached to a container; detaches on drop.
struct AttachGuard {
    container: ResourceContainer,
}

impl AttachGuard {
    fn attach(container: &Arc<ManagedContainer>) -> Result<Self> {
        let container = ResourceContainer::Managed(container.clone());
        container.attach()?;
        Ok(Self { container })
    }
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        // Only fails for root, which is never held by this guard.
        let _ = self.container.detach();
    }
}

/// Temporarily re-binds the calling thread to root and restores the
/// previous container on drop.
///
/// The previous container keeps its attachment count while the guard is
/// alive, so it cannot be destroyed underneath and the restore always
/// targets a running container.
pub(crate) struct RootGuard {
    previous: Option<ResourceContainer>,
}

impl RootGuard {
    pub(crate) fn enter(previous: ResourceContainer) -> Self {
        debug!(container = %previous.id(), "Stepping out to root");
        binding::swap(ResourceContainer::Root);
        Self {
            previous: Some(previous),
        }
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            debug!(container = %previous.id(), "Returning from root");
            binding::swap(previous);
        }
    }
}
