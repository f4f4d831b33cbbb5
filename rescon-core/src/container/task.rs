//! Task-scoped container bindings.
//!
//! A cooperative task may be polled on a different worker thread every time,
//! so a thread binding taken once would leak onto whatever else that thread
//! runs next. [`Scoped`] applies the `run` protocol per poll instead: bind
//! before polling the inner future, restore after, and hold one attachment on
//! the container from the first poll until completion or drop.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

use super::gate::RootGuard;
use super::{binding, ResourceContainer};
use crate::error::{ContainerError, Result};

impl ResourceContainer {
    /// Wrap `future` so that every poll runs bound to this container.
    ///
    /// The same rules as [`run`](Self::run) apply, checked on each poll: the
    /// container must be running when first polled, and the polling thread
    /// must be in root or already in this container. A violation resolves
    /// the future to `Err` without polling `future`.
    pub fn scope<F>(&self, future: F) -> Scoped<F>
    where
        F: Future,
    {
        Scoped {
            container: self.clone(),
            future: Box::pin(future),
            attached: false,
        }
    }
}

/// Future returned by [`ResourceContainer::scope`].
#[must_use = "futures do nothing unless polled"]
pub struct Scoped<F> {
    container: ResourceContainer,
    future: Pin<Box<F>>,
    attached: bool,
}

impl<F> Scoped<F> {
    pub fn container(&self) -> &ResourceContainer {
        &self.container
    }

    fn release(&mut self) {
        if let (true, ResourceContainer::Managed(inner)) = (self.attached, &self.container) {
            inner.release();
            self.attached = false;
            debug!(container = %inner.id(), "Task detached");
        }
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let cur = binding::current();

        let inner = match &this.container {
            ResourceContainer::Root => {
                let _guard = (!cur.is_root()).then(|| RootGuard::enter(cur));
                return this.future.as_mut().poll(cx).map(Ok);
            }
            ResourceContainer::Managed(inner) => inner.clone(),
        };

        if cur == this.container {
            return this.future.as_mut().poll(cx).map(Ok);
        }
        if !cur.is_root() {
            return Poll::Ready(Err(ContainerError::not_in_root()));
        }
        if !this.attached {
            if let Err(err) = inner.acquire() {
                return Poll::Ready(Err(err));
            }
            this.attached = true;
            debug!(container = %inner.id(), "Task attached");
        }

        let polled = {
            let _binding = PollBinding::bind(this.container.clone());
            this.future.as_mut().poll(cx)
        };
        match polled {
            Poll::Ready(output) => {
                this.release();
                Poll::Ready(Ok(output))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<F> Drop for Scoped<F> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Binds the polling thread for the duration of one poll.
struct PollBinding;

impl PollBinding {
    fn bind(container: ResourceContainer) -> Self {
        binding::swap(container);
        Self
    }
}

impl Drop for PollBinding {
    fn drop(&mut self) {
        binding::swap(ResourceContainer::Root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::current;
    use crate::container::limits::ContainerConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn container() -> ResourceContainer {
        ResourceContainer::create(ContainerConfig::new())
    }

    #[tokio::test]
    async fn test_scope_binds_each_poll() {
        let a = container();
        let observed = a
            .scope(async {
                let first = current();
                tokio::task::yield_now().await;
                let second = current();
                (first, second)
            })
            .await
            .unwrap();
        assert_eq!(observed, (a.clone(), a.clone()));
        assert!(current().is_root());
        assert_eq!(a.attached_units(), 0);
    }

    #[tokio::test]
    async fn test_scope_holds_attachment_until_done() {
        let a = container();
        let seen = Arc::new(AtomicUsize::new(0));
        let probe = a.clone();
        let seen_inner = seen.clone();
        a.scope(async move {
            tokio::task::yield_now().await;
            seen_inner.store(probe.attached_units(), Ordering::SeqCst);
        })
        .await
        .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(a.attached_units(), 0);
    }

    #[tokio::test]
    async fn test_scope_of_destroyed_container_fails() {
        let a = container();
        a.destroy().unwrap();
        let err = a.scope(async {}).await.unwrap_err();
        assert!(err.is_illegal_state());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scoped_tasks_across_workers() {
        let a = container();
        let b = container();
        let mut handles = Vec::new();
        for i in 0..16 {
            let target = if i % 2 == 0 { a.clone() } else { b.clone() };
            let expected = target.clone();
            handles.push(tokio::spawn(target.scope(async move {
                for _ in 0..10 {
                    assert_eq!(current(), expected);
                    tokio::task::yield_now().await;
                }
            })));
        }
        for h in handles {
            h.await.expect("task panicked").unwrap();
        }
        assert_eq!(a.attached_units(), 0);
        assert_eq!(b.attached_units(), 0);
    }

    #[test]
    fn test_scope_inside_other_container_rejected() {
        let a = container();
        let b = container();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = a
            .run(|| rt.block_on(b.scope(async {})))
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("must be in root container"));
    }

    #[test]
    fn test_root_scope_steps_out() {
        let a = container();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (inside, after) = a
            .run(|| {
                let inside = rt
                    .block_on(ResourceContainer::root().scope(async { current().is_root() }))
                    .unwrap();
                (inside, current() == a)
            })
            .unwrap();
        assert!(inside);
        assert!(after);
    }

    #[test]
    fn test_dropped_scope_releases_attachment() {
        let a = container();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let pending = a.scope(std::future::pending::<()>());
            let timed_out =
                tokio::time::timeout(std::time::Duration::from_millis(10), pending).await;
            assert!(timed_out.is_err());
        });
        assert_eq!(a.attached_units(), 0);
        a.destroy().unwrap();
    }
}
