//! `OAuth2` token types and freshness checks.
//!
//! A [`Token`] is one grant at a point in time. It is never patched in place
//! by a refresh; [`Token::refreshed`] builds its successor instead.

use std::fmt;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Token type assumed when the provider does not report one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Lifetime assumed when a token response carries no `expires_in`.
pub const DEFAULT_LIFETIME_SECS: i64 = 3600;

/// Longest token lifetime accepted; longer lifetimes are clamped to it.
pub const MAX_LIFETIME_SECS: i64 = 365 * 24 * 3600;

/// `OAuth2` grant for one account.
///
/// Serializes to the flat on-disk record: string fields as-is, timestamps as
/// Unix seconds in a string, `valid` as a boolean.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Token {
    /// Access token string.
    pub access_token: String,
    /// Refresh token for obtaining new access tokens (empty if none).
    pub refresh_token: String,
    /// Scope granted by the authorization server.
    pub scope: String,
    /// Token type (usually "Bearer").
    pub token_type: String,
    /// Expiration time.
    #[serde(with = "unix_seconds")]
    pub expires_at: DateTime<Utc>,
    /// Time the grant was issued or last refreshed.
    #[serde(with = "unix_seconds")]
    pub created_at: DateTime<Utc>,
    /// Whether the grant was ever successfully obtained.
    pub valid: bool,
}

impl Token {
    /// Creates a valid token issued now that lives for `lifetime_secs`.
    ///
    /// The lifetime is clamped to `0..=MAX_LIFETIME_SECS`, so `expires_at`
    /// never precedes `created_at`.
    #[must_use]
    pub fn issued(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        lifetime_secs: i64,
    ) -> Self {
        let created_at = now();
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            scope: String::new(),
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            expires_at: expiry_after(created_at, lifetime_secs),
            created_at,
            valid: true,
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Sets the expiration time.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Builds the token that supersedes `self` after a successful refresh.
    ///
    /// The provider's `expires_in` is honoured, within the same bounds as
    /// [`Token::issued`]. A refresh token or scope the
    /// provider does not send back is carried over from `self`.
    #[must_use]
    pub fn refreshed(&self, response: TokenResponse) -> Self {
        let created_at = now();
        let lifetime = response.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS);

        Self {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.refresh_token.clone()),
            scope: response
                .scope
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| self.scope.clone()),
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            expires_at: expiry_after(created_at, lifetime),
            created_at,
            valid: true,
        }
    }

    /// Checks whether the token is expired, or will be within `buffer`.
    #[must_use]
    pub fn is_expired_within(&self, buffer: Duration) -> bool {
        self.is_expired_at(Utc::now(), buffer)
    }

    /// Checks expiry against an explicit clock reading: `now >= expires_at - buffer`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(buffer)
            .is_none_or(|stale_at| now >= stale_at)
    }

    /// Returns true if the token may be handed out to a caller right now.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.valid && !self.is_expired_within(Duration::zero())
    }

    /// Seconds until expiry; negative once expired.
    #[must_use]
    pub fn lifetime(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }

    /// Returns true if a refresh token is available.
    #[must_use]
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .field("valid", &self.valid)
            .finish()
    }
}

/// Placeholder shown instead of a secret in debug output.
#[must_use]
pub fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "<redacted>" }
}

/// `created_at` plus `lifetime_secs`, clamped to `0..=MAX_LIFETIME_SECS`.
fn expiry_after(created_at: DateTime<Utc>, lifetime_secs: i64) -> DateTime<Utc> {
    Duration::try_seconds(lifetime_secs.clamp(0, MAX_LIFETIME_SECS))
        .and_then(|lifetime| created_at.checked_add_signed(lifetime))
        .unwrap_or(created_at)
}

/// Current time truncated to whole seconds, the resolution of the stored record.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Successful response from an `OAuth2` token endpoint.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Expires in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Refresh token, when the provider rotates it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Creates a response carrying only an access token and its lifetime.
    #[must_use]
    pub fn new(access_token: impl Into<String>, expires_in: i64) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some(DEFAULT_TOKEN_TYPE.to_string()),
            expires_in: Some(expires_in),
            refresh_token: None,
            scope: None,
        }
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &redact(&self.access_token))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_deref().map(redact),
            )
            .field("scope", &self.scope)
            .finish()
    }
}

/// Error response from an `OAuth2` token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

/// Serde helpers storing a timestamp as Unix seconds in a string.
///
/// Reading also accepts a bare integer.
mod unix_seconds {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    pub fn serialize<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&at.timestamp().to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.trim().parse::<i64>().map_err(D::Error::custom)?,
            Raw::Number(n) => n,
        };
        DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {secs}")))
    }
}
