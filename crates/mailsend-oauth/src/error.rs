//! Error types for `OAuth2` operations.

use reqwest::StatusCode;

/// Result type alias for `OAuth2` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `OAuth2` error codes that mean the refresh token or client itself was rejected.
const TERMINAL_ERROR_CODES: &[&str] = &["invalid_grant", "invalid_client", "unauthorized_client"];

/// `OAuth2` error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP transport error (connect, TLS, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `OAuth2` error reported by the token endpoint.
    #[error("OAuth2 error ({status}): {error} - {description}")]
    OAuth {
        /// HTTP status of the response carrying the error.
        status: StatusCode,
        /// Error code (e.g., `invalid_grant`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// Non-success status without a parsable `OAuth2` error body.
    #[error("Token endpoint returned {status}: {body}")]
    HttpStatus {
        /// HTTP status.
        status: StatusCode,
        /// Raw response body, truncated.
        body: String,
    },

    /// No refresh token available.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Invalid token response.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// No refresh strategy is registered for the provider.
    #[error("No refresh strategy for provider '{0}'")]
    UnsupportedProvider(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl Error {
    /// Creates an OAuth error from status, error code and description.
    #[must_use]
    pub fn oauth_error(
        status: StatusCode,
        error: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::OAuth {
            status,
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns true if retrying with the same refresh token cannot succeed.
    ///
    /// A rejected refresh token (HTTP 400/401, or one of the `invalid_grant`
    /// family of error codes) needs a new authorization; everything else
    /// (transport errors, timeouts, 5xx) may be retried later.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::OAuth { status, error, .. } => {
                is_rejection_status(*status) || TERMINAL_ERROR_CODES.contains(&error.as_str())
            }
            Self::HttpStatus { status, .. } => is_rejection_status(*status),
            Self::NoRefreshToken | Self::UnsupportedProvider(_) | Self::InvalidConfig(_) => true,
            Self::Http(_) | Self::Json(_) | Self::InvalidResponse(_) | Self::UrlError(_) => false,
        }
    }

    /// Returns the provider's `OAuth2` error code, if the endpoint sent one.
    #[must_use]
    pub fn oauth_code(&self) -> Option<&str> {
        match self {
            Self::OAuth { error, .. } => Some(error),
            _ => None,
        }
    }
}

fn is_rejection_status(status: StatusCode) -> bool {
    status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED
}
