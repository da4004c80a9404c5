use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or unusable configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// What is wrong.
        message: String,
    },

    /// Profile store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Server synchronization failure.
    #[error("Session sync error: {0}")]
    Sync(#[from] SyncError),

    /// Page values that cannot be interpreted.
    #[error("Invalid page context: {message}")]
    InvalidPage {
        /// What is wrong.
        message: String,
    },

    /// Unexpected internal state.
    #[error("Internal error: {message}")]
    Internal {
        /// What happened.
        message: String,
    },
}

/// Browser-profile store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be opened.
    #[error("Store connection failed: {message}")]
    Connection {
        /// Underlying cause.
        message: String,
    },

    /// A read or write failed.
    #[error("Query failed: {message}")]
    Query {
        /// Underlying cause.
        message: String,
    },

    /// Schema migration failed.
    #[error("Migration failed: {message}")]
    Migration {
        /// Underlying cause.
        message: String,
    },

    /// A value could not be encoded as JSON.
    #[error("Serialization failed for key {key}: {message}")]
    Serialization {
        /// Key being written.
        key: String,
        /// Encoder message.
        message: String,
    },

    /// Raw SQLx error.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Session sync transport errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// Every attempt failed with a transient error.
    #[error("Server unavailable: {message} (retries: {retries})")]
    Unavailable {
        /// Last error seen.
        message: String,
        /// Retries performed.
        retries: u32,
    },

    /// Non-success HTTP status.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The response body does not have the expected shape.
    #[error("Malformed response from {route}: {message}")]
    MalformedResponse {
        /// Route that answered.
        route: String,
        /// Why the body was rejected.
        message: String,
    },

    /// The request exceeded its timeout.
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Client errors (4xx) and malformed payloads are final.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Api { status, .. } => *status >= 500,
            SyncError::MalformedResponse { .. } => false,
            SyncError::Unavailable { .. } | SyncError::Timeout { .. } | SyncError::Http(_) => true,
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for session sync operations
pub type SyncResult<T> = Result<T, SyncError>;
