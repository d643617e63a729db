//! Error types for the session pool

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a [`SessionProvider`](crate::SessionProvider).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("could not set transfer mode: {0}")]
    TransferMode(String),

    #[error("session is not alive: {0}")]
    Dead(String),

    #[error("close failed: {0}")]
    Close(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    ConfigInvalid(String),

    #[error("Could not connect session: {0}")]
    ConnectFailed(String),

    #[error("Could not authenticate session: {0}")]
    AuthFailed(String),

    #[error("Could not set transfer mode: {0}")]
    TransferModeFailed(String),

    #[error("Pool is draining - acquisitions are rejected")]
    Draining,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl From<SessionError> for PoolError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Connect(msg) => PoolError::ConnectFailed(msg),
            SessionError::Auth(msg) => PoolError::AuthFailed(msg),
            SessionError::TransferMode(msg) => PoolError::TransferModeFailed(msg),
            // Probe and close failures never leave the pool; if a provider
            // reports one during creation it is a failed connection.
            SessionError::Dead(msg) | SessionError::Close(msg) => PoolError::ConnectFailed(msg),
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_errors_map_to_acquire_errors() {
        assert_eq!(
            PoolError::from(SessionError::Connect("refused".into())),
            PoolError::ConnectFailed("refused".into())
        );
        assert_eq!(
            PoolError::from(SessionError::Auth("530".into())),
            PoolError::AuthFailed("530".into())
        );
        assert_eq!(
            PoolError::from(SessionError::TransferMode("PASV".into())),
            PoolError::TransferModeFailed("PASV".into())
        );
    }

    #[test]
    fn test_error_messages() {
        let err = PoolError::ConfigInvalid("maxConnections 0 must be larger than zero".into());
        assert_eq!(
            err.to_string(),
            "Invalid pool configuration: maxConnections 0 must be larger than zero"
        );
        assert_eq!(PoolError::Cancelled.to_string(), "Operation was cancelled");
    }
}
