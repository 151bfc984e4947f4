//! Fetch error types.

use thiserror::Error;

use skypanel_core::CoreError;

// ============================================================================
// Main Fetch Error
// ============================================================================

/// Error type for session and API operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No session is held; call `authenticate` or `restore` first.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Credential exchange was rejected or returned an unusable body.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Refresh token was rejected or the refresh call failed.
    #[error("Session refresh failed: {0}")]
    RefreshFailed(String),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Non-success HTTP status.
    #[error("Request failed with status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },

    /// Body did not parse as the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Caller supplied an unusable argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Core error.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl FetchError {
    /// Returns true for non-auth HTTP or network failures.
    pub fn is_request_error(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status { .. })
    }

    /// Returns true if the server answered 401.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status: 401, .. })
    }
}

// ============================================================================
// HTTP Error
// ============================================================================

/// HTTP-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Request error.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Timeout.
    #[error("Request timed out")]
    Timeout,

    /// Client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Build(String),
}

// ============================================================================
// Keychain Error
// ============================================================================

/// Error type for keychain operations.
#[derive(Debug, Error)]
pub enum KeychainError {
    /// Credential not found.
    #[error("Credential not found for {service}/{account}")]
    NotFound {
        /// Service name.
        service: String,
        /// Account name.
        account: String,
    },

    /// Access denied.
    #[error("Access denied to keychain")]
    AccessDenied,

    /// Platform error.
    #[error("Platform error: {0}")]
    Platform(String),

    /// Generic error.
    #[error("Keychain error: {0}")]
    Other(String),
}

impl From<keyring::Error> for KeychainError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => KeychainError::NotFound {
                service: String::new(),
                account: String::new(),
            },
            keyring::Error::PlatformFailure(e) => KeychainError::Platform(e.to_string()),
            keyring::Error::NoStorageAccess(_) => KeychainError::AccessDenied,
            _ => KeychainError::Other(err.to_string()),
        }
    }
}
