//! # mailsend-oauth
//!
//! `OAuth2` building blocks for keeping mail-sending credentials fresh.
//!
//! ## Features
//!
//! - **Token value**: [`Token`] with expiry checks and the on-disk record format
//! - **Providers**: [`Provider`] with built-in Google and Microsoft endpoints
//! - **Refresh**: the [`RefreshStrategy`] seam, the standard [`HttpRefresher`]
//!   and a [`Strategies`] registry keyed by provider
//!
//! ## Refreshing a token
//!
//! ```ignore
//! use mailsend_oauth::{HttpRefresher, Provider, RefreshRequest, RefreshStrategy, Token};
//!
//! let token = Token::issued("ya29.a0...", "1//0g...", 3599);
//! let refresher = HttpRefresher::for_provider(&Provider::Google)?;
//! let response = refresher.refresh(&RefreshRequest {
//!     client_id: "your_client_id",
//!     client_secret: "your_secret",
//!     refresh_token: &token.refresh_token,
//! })?;
//! let token = token.refreshed(response);
//! ```
//!
//! Refresh failures are classified by [`Error::is_terminal`]: a rejected
//! refresh token needs a new authorization, anything else can be retried.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod provider;
pub mod refresh;
pub mod token;

pub use error::{Error, Result};
pub use reqwest::StatusCode;
pub use provider::Provider;
pub use refresh::{HttpRefresher, RefreshRequest, RefreshStrategy, Strategies};
pub use token::{Token, TokenResponse};
