//! Async I/O dispatch gate.
//!
//! Every gated blocking primitive goes through [`IoDispatchGate::dispatch`].
//! With no adapter installed, or one that is inactive for the calling unit,
//! the operation runs directly and blocks the caller. Otherwise it is handed
//! to the adapter. Either way the caller gets exactly the `io::Result` the
//! primitive produced.
//!
//! The gate is an injectable dependency: [`FileDispatcher`] takes an
//! `Arc<IoDispatchGate>`, and [`IoDispatchGate::global`] is the process-wide
//! instance a scheduler installs its adapter into.
//!
//! [`FileDispatcher`]: super::dispatcher::FileDispatcher

use std::io;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::adapter::{AsyncIoAdapter, IoOp};
use crate::perf::{DispatchMetrics, DispatchPath, ScopedTimer};

/// Decides per call whether a blocking operation is offloaded.
pub struct IoDispatchGate {
    adapter: RwLock<Option<Arc<dyn AsyncIoAdapter>>>,
    metrics: Arc<DispatchMetrics>,
}

static GLOBAL: OnceLock<Arc<IoDispatchGate>> = OnceLock::new();

impl IoDispatchGate {
    /// Create a gate with no adapter installed.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            adapter: RwLock::new(None),
            metrics: DispatchMetrics::new(),
        })
    }

    /// The process-wide gate.
    pub fn global() -> Arc<IoDispatchGate> {
        GLOBAL.get_or_init(IoDispatchGate::new).clone()
    }

    /// Install `adapter`, returning the one it replaces.
    pub fn install(&self, adapter: Arc<dyn AsyncIoAdapter>) -> Option<Arc<dyn AsyncIoAdapter>> {
        info!(adapter = adapter.name(), "Installing async I/O adapter");
        self.adapter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(adapter)
    }

    /// Remove the installed adapter, if any.
    pub fn uninstall(&self) -> Option<Arc<dyn AsyncIoAdapter>> {
        let previous = self
            .adapter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(adapter) = &previous {
            info!(adapter = adapter.name(), "Uninstalled async I/O adapter");
        }
        previous
    }

    pub fn adapter(&self) -> Option<Arc<dyn AsyncIoAdapter>> {
        self.adapter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The installed adapter if it is active for the calling unit.
    pub fn active_adapter(&self) -> Option<Arc<dyn AsyncIoAdapter>> {
        self.adapter().filter(|adapter| adapter.is_active())
    }

    /// Whether an operation issued now by the calling unit would be
    /// offloaded.
    pub fn is_offloading(&self) -> bool {
        self.active_adapter().is_some()
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        self.metrics.clone()
    }

    /// Run `call` directly or through the active adapter.
    pub fn dispatch<T, F>(&self, op: IoOp, call: F) -> io::Result<T>
    where
        F: FnOnce() -> io::Result<T> + Send,
        T: Send,
    {
        let outcome = match self.active_adapter() {
            None => {
                let _timer = ScopedTimer::new(&self.metrics, DispatchPath::Direct);
                call()
            }
            Some(adapter) => self.offload(adapter.as_ref(), op, call)?,
        };
        if outcome.is_err() {
            self.metrics.record_io_error();
        }
        outcome
    }

    /// Submit `call` to `adapter`. The outer `Err` is the adapter's own
    /// failure; the inner result is the operation's.
    fn offload<T, F>(
        &self,
        adapter: &dyn AsyncIoAdapter,
        op: IoOp,
        call: F,
    ) -> io::Result<io::Result<T>>
    where
        F: FnOnce() -> io::Result<T> + Send,
        T: Send,
    {
        debug!(%op, adapter = adapter.name(), "Offloading blocking operation");
        let mut call = Some(call);
        let mut outcome = None;
        let submitted = {
            let _timer = ScopedTimer::new(&self.metrics, DispatchPath::Offloaded);
            let mut work = || {
                if let Some(call) = call.take() {
                    outcome = Some(call());
                }
            };
            adapter.execute(op, &mut work)
        };

        if let Err(err) = submitted {
            warn!(%op, adapter = adapter.name(), error = %err, "Async I/O adapter failed");
            self.metrics.record_adapter_failure();
            return Err(err);
        }
        Ok(outcome.unwrap_or_else(|| {
            self.metrics.record_adapter_failure();
            Err(io::Error::new(
                io::ErrorKind::Other,
                "async I/O adapter did not run the operation",
            ))
        }))
    }
}
