//! Blocking file I/O routed through an async dispatch gate.
//!
//! - [`adapter`]: the scheduler-side hook and the tokio-backed adapter
//! - [`gate`]: per-call choice between direct and offloaded execution
//! - [`dispatcher`]: the file primitives themselves

pub mod adapter;
pub mod dispatcher;
pub mod gate;

pub use adapter::{AsyncIoAdapter, IoOp, TokioAdapterConfig, TokioBlockingAdapter};
pub use dispatcher::{FileDispatcher, LockStatus};
pub use gate::IoDispatchGate;
