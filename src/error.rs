use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),
    #[error("session already in use: {0}")]
    SessionInUse(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Failures reported by the SQL backend, either while dialing or while
/// running a query on an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend rejected the caller's credentials.
    #[error("{0}")]
    AccessDenied(String),
    /// The running statement was interrupted.
    #[error("{0}")]
    Canceled(String),
    /// The statement ran past its execution deadline.
    #[error("{0}")]
    DeadlineExceeded(String),
    #[error("Row count exceeded {limit}")]
    RowCountExceeded { limit: usize },
    #[error("{message} (errno {code}) (sqlstate {state})")]
    Server {
        code: u16,
        state: String,
        message: String,
    },
    #[error("connection error: {0}")]
    Connection(String),
    #[error("driver error: {0}")]
    Driver(String),
}
