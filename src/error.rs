//! Error taxonomy for session operations.
//!
//! ERROR HANDLING
//! ==============
//! `ServiceError` covers everything the identity service (or the transport to
//! it) can report; its `Display` is the human-readable message surfaced in
//! toasts. `AuthError` is what `SessionManager` operations return: either a
//! service failure or a precondition failure detected locally. Form-level
//! validation lives in `validation::ValidationErrors` and never reaches the
//! manager.

/// Failure reported by the identity service or its transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("network error: {0}")]
    Request(String),

    /// The service answered with a non-success status.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// The service answered with a body we could not decode.
    #[error("unexpected response: {0}")]
    Parse(String),

    /// An operation required a session and none is held.
    #[error("Auth session missing!")]
    SessionMissing,

    /// The HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// Reading or writing the persisted session failed.
    #[error("session storage error: {0}")]
    Storage(String),
}

impl ServiceError {
    /// Status code for API failures, `None` otherwise.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Error returned by `SessionManager` operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The operation needs a signed-in user.
    #[error("No user logged in")]
    NoUser,
}
