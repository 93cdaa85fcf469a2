//! Refresh-token exchange against provider token endpoints.
//!
//! [`RefreshStrategy`] is the seam: the token manager only ever talks to a
//! strategy looked up by [`Provider`] in [`Strategies`]. [`HttpRefresher`] is
//! the standard `grant_type=refresh_token` POST used by every built-in
//! provider; the providers differ only in endpoint.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;
use url::{Host, Url};

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::token::{ErrorResponse, TokenResponse, redact};

/// Timeout applied to a whole token request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Inputs to one refresh exchange.
#[derive(Clone, Copy)]
pub struct RefreshRequest<'a> {
    /// Client ID from the provider.
    pub client_id: &'a str,
    /// Client secret (empty for public clients).
    pub client_secret: &'a str,
    /// Refresh token to exchange.
    pub refresh_token: &'a str,
}

impl fmt::Debug for RefreshRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshRequest")
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(self.client_secret))
            .field("refresh_token", &redact(self.refresh_token))
            .finish()
    }
}

/// Provider-specific exchange of a refresh token for a new access token.
///
/// Implementations block the calling thread for the duration of the
/// exchange and must bound it with a timeout.
pub trait RefreshStrategy: Send + Sync {
    /// Performs the exchange.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, an
    /// `error` field in the body, or a body without `access_token`.
    fn refresh(&self, request: &RefreshRequest<'_>) -> Result<TokenResponse>;
}

/// Refresh strategy speaking the standard `OAuth2` token endpoint protocol.
///
/// Uses a blocking HTTP client; do not call it from inside an async runtime
/// without `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct HttpRefresher {
    token_url: Url,
    http_client: Client,
}

impl HttpRefresher {
    /// Creates a refresher for the given token endpoint with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, is not HTTPS (loopback hosts
    /// excepted), or the HTTP client cannot be built.
    pub fn new(token_url: impl AsRef<str>) -> Result<Self> {
        Self::with_timeout(token_url, REQUEST_TIMEOUT)
    }

    /// Creates a refresher with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Same as [`HttpRefresher::new`].
    pub fn with_timeout(token_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let token_url = Url::parse(token_url.as_ref())?;
        if token_url.scheme() != "https" && !is_loopback(&token_url) {
            return Err(Error::InvalidConfig(format!(
                "token endpoint must use https: {token_url}"
            )));
        }

        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            token_url,
            http_client,
        })
    }

    /// Creates a refresher for a built-in provider's endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedProvider`] for custom providers.
    pub fn for_provider(provider: &Provider) -> Result<Self> {
        let url = provider
            .token_url()
            .ok_or_else(|| Error::UnsupportedProvider(provider.to_string()))?;
        Self::new(url)
    }

    /// Returns the token endpoint.
    #[must_use]
    pub const fn token_url(&self) -> &Url {
        &self.token_url
    }
}

impl RefreshStrategy for HttpRefresher {
    fn refresh(&self, request: &RefreshRequest<'_>) -> Result<TokenResponse> {
        if request.refresh_token.is_empty() {
            return Err(Error::NoRefreshToken);
        }

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("client_id", request.client_id),
        ];
        if !request.client_secret.is_empty() {
            params.push(("client_secret", request.client_secret));
        }
        params.push(("refresh_token", request.refresh_token));

        debug!(endpoint = %self.token_url, "Requesting token refresh");
        let response = self
            .http_client
            .post(self.token_url.clone())
            .form(&params)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        parse_token_response(status, &body)
    }
}

/// Token endpoint body before classification; providers mix success and
/// error fields.
#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Classifies a token endpoint response.
///
/// # Errors
///
/// See [`RefreshStrategy::refresh`].
pub fn parse_token_response(status: StatusCode, body: &str) -> Result<TokenResponse> {
    if !status.is_success() {
        return Err(match serde_json::from_str::<ErrorResponse>(body) {
            Ok(error) => Error::oauth_error(status, error.error, error.error_description),
            Err(_) => Error::HttpStatus {
                status,
                body: truncate(body),
            },
        });
    }

    let raw: RawTokenResponse = serde_json::from_str(body)?;
    if let Some(error) = raw.error {
        return Err(Error::oauth_error(
            status,
            error,
            raw.error_description.unwrap_or_default(),
        ));
    }

    let access_token = raw
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| Error::InvalidResponse("missing access_token".to_string()))?;

    Ok(TokenResponse {
        access_token,
        token_type: raw.token_type,
        expires_in: raw.expires_in,
        refresh_token: raw.refresh_token,
        scope: raw.scope,
    })
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        None => false,
    }
}

/// Refresh strategies keyed by provider.
///
/// Adding a provider means inserting a strategy here; the token manager
/// needs no change.
#[derive(Clone, Default)]
pub struct Strategies {
    by_provider: HashMap<Provider, Arc<dyn RefreshStrategy>>,
}

impl Strategies {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with HTTP refreshers for Google and Microsoft.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        let mut strategies = Self::new();
        for provider in [Provider::Google, Provider::Microsoft] {
            let refresher = HttpRefresher::for_provider(&provider)?;
            strategies.insert(provider, Arc::new(refresher));
        }
        Ok(strategies)
    }

    /// Registers (or replaces) the strategy for a provider.
    pub fn insert(&mut self, provider: Provider, strategy: Arc<dyn RefreshStrategy>) {
        self.by_provider.insert(provider, strategy);
    }

    /// Builder form of [`Strategies::insert`].
    #[must_use]
    pub fn with(mut self, provider: Provider, strategy: impl RefreshStrategy + 'static) -> Self {
        self.insert(provider, Arc::new(strategy));
        self
    }

    /// Looks up the strategy for a provider.
    #[must_use]
    pub fn get(&self, provider: &Provider) -> Option<Arc<dyn RefreshStrategy>> {
        self.by_provider.get(provider).cloned()
    }

    /// Returns true if a strategy is registered for the provider.
    #[must_use]
    pub fn supports(&self, provider: &Provider) -> bool {
        self.by_provider.contains_key(provider)
    }
}

impl fmt::Debug for Strategies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<&Provider> = self.by_provider.keys().collect();
        providers.sort();
        f.debug_struct("Strategies")
            .field("providers", &providers)
            .finish()
    }
}
