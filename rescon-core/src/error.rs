//! Error taxonomy for the container binding protocol.
//!
//! Every variant is a programming error: the caller violated the
//! attach/detach discipline or asked the root container for something it
//! never supports. Nothing here is retried internally.

use thiserror::Error;

/// Failures raised by container operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// The container is not in a state that allows the operation, or the
    /// calling execution unit is bound somewhere it may not leave from.
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// The operation is never valid for the root container.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

impl ContainerError {
    pub(crate) fn not_running() -> Self {
        Self::IllegalState("container not running".to_string())
    }

    pub(crate) fn not_in_root() -> Self {
        Self::IllegalState(
            "must be in root container before running into non-root container".to_string(),
        )
    }

    /// Returns `true` for [`ContainerError::IllegalState`].
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_))
    }

    /// Returns `true` for [`ContainerError::Unsupported`].
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            ContainerError::not_running().to_string(),
            "illegal state: container not running"
        );
        assert!(ContainerError::not_in_root()
            .to_string()
            .contains("must be in root container"));
        assert_eq!(
            ContainerError::Unsupported("should not reach here").to_string(),
            "unsupported: should not reach here"
        );
    }

    #[test]
    fn test_predicates() {
        assert!(ContainerError::not_running().is_illegal_state());
        assert!(!ContainerError::not_running().is_unsupported());
        assert!(ContainerError::Unsupported("x").is_unsupported());
    }
}
