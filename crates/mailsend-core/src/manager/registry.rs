//! In-memory account registry guarded by the manager's lock.

use std::collections::HashMap;

use mailsend_oauth::Token;

use crate::account::{Account, AccountRegistration};

/// Registry slot for one account.
#[derive(Debug)]
pub(super) struct Entry {
    pub account: Account,
    /// Distinguishes this slot from a later one for the same id after a
    /// delete and re-register.
    pub epoch: u64,
    /// A refresh for this account is between its snapshot and its commit.
    pub refresh_in_flight: bool,
    /// Number of finished refresh attempts.
    pub refresh_seq: u64,
    /// Outcome of the most recent finished attempt.
    pub last_refresh_ok: bool,
}

/// Map of account id to account, plus the epoch counter.
#[derive(Debug, Default)]
pub(super) struct Registry {
    entries: HashMap<String, Entry>,
    next_epoch: u64,
}

impl Registry {
    pub fn get(&self, account_id: &str) -> Option<&Entry> {
        self.entries.get(account_id)
    }

    pub fn get_mut(&mut self, account_id: &str) -> Option<&mut Entry> {
        self.entries.get_mut(account_id)
    }

    /// Inserts a new account or overwrites an existing one's metadata.
    ///
    /// `stored` replaces the in-memory token when present. A new account
    /// without a stored token starts with the invalid default token.
    pub fn upsert(&mut self, registration: AccountRegistration, stored: Option<Token>) {
        if let Some(entry) = self.entries.get_mut(&registration.account_id) {
            entry.account.apply(registration);
            if let Some(token) = stored {
                entry.account.token = token;
            }
            return;
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.entries.insert(
            registration.account_id.clone(),
            Entry {
                account: Account::new(registration, stored.unwrap_or_default()),
                epoch,
                refresh_in_flight: false,
                refresh_seq: 0,
                last_refresh_ok: false,
            },
        );
    }

    pub fn remove(&mut self, account_id: &str) -> Option<Entry> {
        self.entries.remove(account_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
