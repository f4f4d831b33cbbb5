//! Binding table: which container each execution unit is bound to.
//!
//! Each thread owns exactly one slot, created lazily as root on first lookup
//! and torn down with the thread. A unit only ever touches its own slot, so
//! no cross-thread synchronization is involved. Tasks that migrate between
//! threads get per-poll bindings from [`ResourceContainer::scope`].
//!
//! The slot is only mutated through the guards in [`super::gate`] and
//! [`super::task`].
//!
//! [`ResourceContainer::scope`]: super::ResourceContainer::scope

use std::cell::RefCell;

use super::ResourceContainer;

thread_local! {
    static BINDING: RefCell<ResourceContainer> = const { RefCell::new(ResourceContainer::Root) };
}

/// The container the calling thread is currently bound to.
///
/// Returns root when the slot has already been torn down during thread exit.
pub fn current() -> ResourceContainer {
    BINDING
        .try_with(|slot| slot.borrow().clone())
        .unwrap_or(ResourceContainer::Root)
}

/// Bind the calling thread to `container`, returning the previous binding.
pub(crate) fn swap(container: ResourceContainer) -> ResourceContainer {
    match BINDING.try_with(|slot| slot.replace(container)) {
        Ok(previous) => previous,
        // Slot already destroyed: the thread is exiting and can no longer
        // observe its binding.
        Err(_) => ResourceContainer::Root,
    }
}
