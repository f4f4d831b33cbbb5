//! Async I/O adapters for blocking file primitives.
//!
//! When an execution unit is a task on a cooperative scheduler, a blocking
//! syscall stalls every other task sharing its worker. An adapter lets the
//! scheduler take over such a call: the gate asks [`AsyncIoAdapter::is_active`]
//! for the calling unit and, if it says yes, hands the operation over as an
//! opaque unit of work.
//!
//! The work closure stores the operation's result itself, so an adapter
//! never sees or alters it. Adapters only report whether they managed to run
//! the work at all.
//!
//! # Provided adapter
//! [`TokioBlockingAdapter`] is active on threads of a multi-thread tokio
//! runtime and runs the work through `tokio::task::block_in_place`, which
//! hands the worker's other tasks to a fresh worker while the syscall blocks.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info};

/// The blocking primitives that pass through the dispatch gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoOp {
    Read,
    PositionalRead,
    VectoredRead,
    Write,
    PositionalWrite,
    VectoredWrite,
    Force,
    Truncate,
}

impl IoOp {
    pub const ALL: [IoOp; 8] = [
        Self::Read,
        Self::PositionalRead,
        Self::VectoredRead,
        Self::Write,
        Self::PositionalWrite,
        Self::VectoredWrite,
        Self::Force,
        Self::Truncate,
    ];
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::PositionalRead => "pread",
            Self::VectoredRead => "readv",
            Self::Write => "write",
            Self::PositionalWrite => "pwrite",
            Self::VectoredWrite => "writev",
            Self::Force => "force",
            Self::Truncate => "truncate",
        };
        f.write_str(name)
    }
}

/// A scheduler-side executor for blocking operations.
pub trait AsyncIoAdapter: Send + Sync {
    /// Whether operations issued by the calling execution unit should be
    /// handed to this adapter.
    fn is_active(&self) -> bool;

    /// Run `work` to completion, suspending the caller's logical task until
    /// it is done.
    ///
    /// `work` must be called at most once. Returning `Err` means the work was
    /// not run; the error is then reported to the caller of the primitive.
    fn execute(&self, op: IoOp, work: &mut (dyn FnMut() + Send)) -> io::Result<()>;

    /// Short identifier for logs.
    fn name(&self) -> &str {
        "adapter"
    }
}

/// Configuration for [`TokioBlockingAdapter`].
#[derive(Debug, Clone)]
pub struct TokioAdapterConfig {
    /// Start enabled. A disabled adapter reports itself inactive.
    pub enabled: bool,
}

impl Default for TokioAdapterConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Adapter backed by the ambient tokio runtime.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rescon_core::io::{adapter::TokioBlockingAdapter, gate::IoDispatchGate};
///
/// IoDispatchGate::global().install(Arc::new(TokioBlockingAdapter::default()));
/// ```
pub struct TokioBlockingAdapter {
    enabled: AtomicBool,
}

impl TokioBlockingAdapter {
    pub fn new(config: TokioAdapterConfig) -> Self {
        info!(enabled = config.enabled, "Creating tokio async I/O adapter");
        Self {
            enabled: AtomicBool::new(config.enabled),
        }
    }

    /// Pause or resume offloading without uninstalling the adapter.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Default for TokioBlockingAdapter {
    fn default() -> Self {
        Self::new(TokioAdapterConfig::default())
    }
}

impl AsyncIoAdapter for TokioBlockingAdapter {
    fn is_active(&self) -> bool {
        // block_in_place panics on a current-thread runtime.
        self.is_enabled()
            && Handle::try_current()
                .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
                .unwrap_or(false)
    }

    fn execute(&self, op: IoOp, work: &mut (dyn FnMut() + Send)) -> io::Result<()> {
        debug!(%op, "Offloading blocking operation via block_in_place");
        tokio::task::block_in_place(work);
        Ok(())
    }

    fn name(&self) -> &str {
        "tokio-block-in-place"
    }
}
