//! In-memory token store.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use mailsend_oauth::Token;

use super::TokenStore;
use crate::Result;

/// Token store backed by a `HashMap`; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, Token>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, Token>> {
        // A panic while holding the lock cannot leave a half-inserted token.
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, account_id: &str, token: &Token) -> Result<()> {
        self.tokens().insert(account_id.to_string(), token.clone());
        Ok(())
    }

    fn load(&self, account_id: &str) -> Result<Option<Token>> {
        Ok(self.tokens().get(account_id).cloned())
    }

    fn delete(&self, account_id: &str) -> Result<()> {
        self.tokens().remove(account_id);
        Ok(())
    }

    fn list_accounts(&self) -> Result<BTreeSet<String>> {
        Ok(self.tokens().keys().cloned().collect())
    }
}
