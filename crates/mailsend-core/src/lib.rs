//! # mailsend-core
//!
//! `OAuth2` credential lifecycle for mailsend accounts.
//!
//! This crate provides:
//! - Account registration and validation
//! - Durable token storage behind the [`TokenStore`] trait, with a file
//!   backend and optional AES-256-GCM encryption at rest
//! - The [`TokenManager`], which hands out access tokens and refreshes them
//!   before they expire
//! - JSON configuration of settings and accounts
//!
//! ```ignore
//! use std::sync::Arc;
//! use mailsend_core::{AccountRegistration, FileTokenStore, TokenManager};
//! use mailsend_oauth::{Provider, Strategies};
//!
//! let store = Arc::new(FileTokenStore::new("/var/lib/mailsend/tokens")?);
//! let manager = TokenManager::new(store, Strategies::with_defaults()?);
//! manager.register_account(
//!     AccountRegistration::new("work", Provider::Google, "client-id")
//!         .with_client_secret("client-secret")
//!         .with_user_email("me@example.com"),
//! );
//! match manager.access_token("work") {
//!     Some(token) => { /* AUTH XOAUTH2 with token */ }
//!     None => { /* no usable credential */ }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod config;
mod error;
pub mod manager;
pub mod store;

pub use account::{
    Account, AccountRegistration, ValidationError, ValidationResult, validate_account_id,
    validate_registration,
};
pub use config::Config;
pub use error::{Error, Result};
pub use manager::TokenManager;
pub use store::{
    Aes256GcmCipher, FileTokenStore, MemoryTokenStore, TokenCipher, TokenStore, generate_key,
};
