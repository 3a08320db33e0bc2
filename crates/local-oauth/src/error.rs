//! Error types for the local OAuth server.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.

use std::path::PathBuf;

/// Errors from the persistent token store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Reading, writing or renaming the store file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File the operation touched
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The in-memory state could not be encoded as JSON.
    #[error("Failed to encode token store: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Create an I/O error for a path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// Errors from credential file management.
#[derive(thiserror::Error, Debug)]
pub enum CredentialError {
    /// Password hashing failed (bad parameters or RNG failure).
    #[error("Password hashing failed: {0}")]
    Hash(String),

    /// Writing the credential file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Credential file path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Username cannot be stored in an htpasswd line.
    #[error("Invalid username: {0}")]
    InvalidUsername(String),
}

/// Errors from the authorization server state machine.
///
/// Variants map onto RFC 6749 error codes via [`OAuthError::error_code`].
/// Login failures are not protocol errors; the login page renders them.
#[derive(thiserror::Error, Debug)]
pub enum OAuthError {
    /// Client unknown, or client authentication failed.
    #[error("Invalid client: {0}")]
    InvalidClient(String),

    /// Code or refresh token missing, expired, already consumed, or mismatched.
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// Required parameter missing or malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested scope exceeds the original grant.
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Grant type other than `authorization_code` or `refresh_token`.
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Response type other than `code`.
    #[error("Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// Client registration metadata rejected.
    #[error("Invalid client metadata: {0}")]
    InvalidClientMetadata(String),

    /// Username/password did not verify.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Pending authorization unknown or expired at login submit.
    #[error("Session expired. Please try again.")]
    SessionExpired,

    /// Persisting state failed; nothing was committed.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl OAuthError {
    /// Create an invalid grant error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant(message.into())
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an invalid client error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient(message.into())
    }

    /// RFC 6749 / RFC 7591 error code for the response body.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::InvalidRequest(_) | Self::SessionExpired | Self::InvalidCredentials => {
                "invalid_request"
            }
            Self::InvalidScope(_) => "invalid_scope",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidClientMetadata(_) => "invalid_client_metadata",
            Self::Storage(_) => "server_error",
        }
    }

    /// Human-readable description for `error_description`.
    ///
    /// Storage failures are reported generically; details go to the log.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::InvalidClient(msg)
            | Self::InvalidGrant(msg)
            | Self::InvalidRequest(msg)
            | Self::InvalidScope(msg)
            | Self::InvalidClientMetadata(msg) => msg.clone(),
            Self::UnsupportedGrantType(grant) => format!("grant_type '{grant}' is not supported"),
            Self::UnsupportedResponseType(kind) => {
                format!("response_type '{kind}' is not supported")
            }
            Self::Storage(_) => "Internal storage error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Returns true if the failure was on the server side.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for authorization server operations.
pub type OAuthResult<T> = Result<T, OAuthError>;
