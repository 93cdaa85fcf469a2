//! Durable token storage.
//!
//! [`TokenStore`] is the persistence capability behind the token manager:
//!
//! - [`FileTokenStore`] - one JSON record per account, optionally encrypted
//! - [`MemoryTokenStore`] - in-process map, for tests and ephemeral use
//!
//! The store is the source of truth; the manager's registry is a cache kept
//! consistent with it.

pub mod cipher;
mod file;
mod memory;

use std::collections::BTreeSet;

use mailsend_oauth::Token;

pub use cipher::{Aes256GcmCipher, TokenCipher, generate_key};
pub use file::FileTokenStore;
pub(crate) use file::write_atomic;
pub use memory::MemoryTokenStore;

use crate::Result;

/// Persistence of one token per account id.
///
/// Implementations must be safe to share between threads.
pub trait TokenStore: Send + Sync {
    /// Saves the token for an account, replacing any previous record.
    ///
    /// A crash mid-save must never leave a half-written record readable.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn save(&self, account_id: &str, token: &Token) -> Result<()>;

    /// Loads the token for an account.
    ///
    /// Returns `Ok(None)` when no record exists, which is distinct from a
    /// record that exists with `valid == false`.
    ///
    /// # Errors
    ///
    /// Returns an error if a record exists but cannot be read or parsed.
    fn load(&self, account_id: &str) -> Result<Option<Token>>;

    /// Deletes the record for an account. Deleting a missing record succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing record cannot be removed.
    fn delete(&self, account_id: &str) -> Result<()>;

    /// Lists the account ids that have a stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be enumerated.
    fn list_accounts(&self) -> Result<BTreeSet<String>>;
}
