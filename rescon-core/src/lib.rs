//! Rescon Core - Resource Containers for Execution Units
//!
//! This crate binds execution units (threads and async tasks) to resource
//! containers so that what they consume is accounted against the right
//! workload, and routes blocking file I/O through a gate that a cooperative
//! scheduler can hook into.
//!
//! # Components:
//! - [`container`]: containers, the root sentinel, the registry and `run`
//! - [`io`]: the async I/O dispatch gate and the file primitives behind it
//! - [`perf`]: dispatch counters
//!
//! ```rust,no_run
//! use rescon_core::{ContainerConfig, ResourceContainer, ResourceProfile};
//!
//! # fn main() -> Result<(), rescon_core::ContainerError> {
//! let container = ResourceContainer::create(
//!     ContainerConfig::new().named("batch").with_profile(ResourceProfile::Standard),
//! );
//! let answer = container.run(|| 6 * 7)?;
//! container.destroy()?;
//! # let _ = answer;
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod error;
pub mod io;
pub mod perf;

pub use container::inherit::{ChildUnit, InheritancePredicate, UnitKind};
pub use container::limits::{Constraint, ContainerConfig, ResourceProfile, ResourceType};
pub use container::registry::{ContainerId, ContainerInfo, ContainerRegistry};
pub use container::{current, ContainerState, ResourceContainer};
pub use error::ContainerError;
pub use io::{FileDispatcher, IoDispatchGate, TokioBlockingAdapter};

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Process-level settings applied by [`init`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `tracing` filter directive. `RUST_LOG` takes precedence when set.
    pub log_filter: String,
    /// Install a [`TokioBlockingAdapter`] into the global dispatch gate.
    pub install_tokio_adapter: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            install_tokio_adapter: true,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `RESCON_LOG` and `RESCON_ASYNC_IO`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("RESCON_LOG") {
            config.log_filter = filter;
        }
        if let Ok(flag) = std::env::var("RESCON_ASYNC_IO") {
            config.install_tokio_adapter =
                parse_flag(&flag).context("Invalid value for RESCON_ASYNC_IO")?;
        }
        Ok(config)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}

/// Initialize logging and the global I/O gate.
///
/// Safe to call more than once: an already-installed subscriber is left in
/// place, and an adapter is only installed if the gate has none.
pub fn init(config: &RuntimeConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)
            .with_context(|| format!("Invalid log filter '{}'", config.log_filter))?,
    };
    // Fails only when a global subscriber already exists.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    info!("Initializing Rescon Runtime v{}", env!("CARGO_PKG_VERSION"));

    if config.install_tokio_adapter {
        let gate = IoDispatchGate::global();
        if gate.adapter().is_none() {
            gate.install(Arc::new(TokioBlockingAdapter::default()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = RuntimeConfig::default();
        assert!(init(&config).is_ok());
        assert!(init(&config).is_ok());
        assert!(IoDispatchGate::global().adapter().is_some());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true").unwrap());
        assert!(parse_flag(" ON ").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.log_filter, "info");
        assert!(config.install_tokio_adapter);
    }
}
