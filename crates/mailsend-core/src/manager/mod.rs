//! Token manager: account registry, freshness policy and refresh orchestration.
//!
//! All registry reads and writes go through one mutex. The provider exchange
//! runs with that mutex released: a refresh snapshots what it needs, marks
//! the account as having a refresh in flight, talks to the provider, and
//! then re-acquires the lock only to commit. Callers that find a refresh in
//! flight for the same account wait on a condition variable for its outcome
//! instead of issuing a second provider call.

mod registry;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use chrono::Duration;
use mailsend_oauth::{RefreshRequest, Strategies, Token};
use tracing::{debug, info, warn};

use self::registry::Registry;
use crate::account::{Account, AccountRegistration, validate_account_id};
use crate::error::{Error, Result};
use crate::store::TokenStore;

/// Refresh buffer applied until [`TokenManager::set_refresh_buffer`] is called.
pub const DEFAULT_REFRESH_BUFFER_MINUTES: i64 = 5;

/// Largest accepted refresh buffer (one year).
pub const MAX_REFRESH_BUFFER_MINUTES: i64 = 365 * 24 * 60;

/// Owns the account registry and keeps each account's token fresh.
///
/// Construct one per process and share it (e.g. behind an `Arc`); every
/// method takes `&self` and is safe to call from many threads.
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    strategies: Strategies,
    registry: Mutex<Registry>,
    refresh_done: Condvar,
    auto_refresh: AtomicBool,
    refresh_buffer_minutes: AtomicI64,
}

impl TokenManager {
    /// Creates a manager persisting through `store` and refreshing through `strategies`.
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>, strategies: Strategies) -> Self {
        Self {
            store,
            strategies,
            registry: Mutex::new(Registry::default()),
            refresh_done: Condvar::new(),
            auto_refresh: AtomicBool::new(true),
            refresh_buffer_minutes: AtomicI64::new(DEFAULT_REFRESH_BUFFER_MINUTES),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Registry mutations are single assignments; a panicking holder
        // cannot leave an entry half-written.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an account, or overwrites the metadata of a registered one.
    ///
    /// Any token persisted for the account id is loaded and attached. A
    /// store read failure is logged and treated as "no token yet".
    ///
    /// Returns false only if the account id cannot be used as a storage key.
    pub fn register_account(&self, registration: AccountRegistration) -> bool {
        let account_id = registration.account_id.clone();
        if let Err(e) = validate_account_id(&account_id) {
            warn!(account_id, "Refusing to register account: {e}");
            return false;
        }

        let mut registry = self.lock();
        let stored = match self.store.load(&account_id) {
            Ok(token) => token,
            Err(e) => {
                warn!(account_id, "Could not load stored token, treating as absent: {e}");
                None
            }
        };
        let has_token = stored.as_ref().is_some_and(|t| t.valid);
        let provider = registration.provider.clone();
        registry.upsert(registration, stored);
        drop(registry);

        info!(account_id, %provider, has_token, "Registered account");
        true
    }

    /// Returns a usable access token for the account, refreshing first if needed.
    ///
    /// With auto-refresh enabled, a token within the refresh buffer of its
    /// expiry triggers a refresh attempt. Returns `None` for unknown
    /// accounts, and whenever the token is invalid or expired after that
    /// attempt.
    pub fn access_token(&self, account_id: &str) -> Option<String> {
        let needs_refresh = {
            let registry = self.lock();
            let token = &registry.get(account_id)?.account.token;
            self.auto_refresh() && token.is_expired_within(self.refresh_buffer())
        };

        if needs_refresh {
            match self.refresh_inner(account_id, Some(self.refresh_buffer())) {
                Ok(()) => {}
                Err(Error::OAuth(mailsend_oauth::Error::NoRefreshToken)) => {
                    debug!(account_id, "Token is stale and cannot be refreshed");
                }
                Err(e) => {
                    warn!(
                        account_id,
                        terminal = e.is_terminal(),
                        "Automatic token refresh failed: {e}"
                    );
                }
            }
        }

        let registry = self.lock();
        let token = &registry.get(account_id)?.account.token;
        token.is_usable().then(|| token.access_token.clone())
    }

    /// Exchanges the account's refresh token for a new access token.
    ///
    /// On success the new token is persisted, then committed to the
    /// registry. On failure the previous token is left untouched, both in
    /// memory and in the store. If a refresh of the same account is already
    /// in flight, this waits for it and reports its outcome instead of
    /// contacting the provider again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] for unknown accounts,
    /// [`Error::OAuth`] carrying the provider's error (see
    /// [`Error::is_terminal`]), [`Error::RefreshFailedElsewhere`] when the
    /// awaited concurrent attempt failed, or a store error if the new token
    /// could not be persisted.
    pub fn refresh(&self, account_id: &str) -> Result<()> {
        self.refresh_inner(account_id, None)
    }

    /// Refreshes the account; with `stale_within` set, skips accounts whose
    /// token is no longer stale once the lock is held.
    fn refresh_inner(&self, account_id: &str, stale_within: Option<Duration>) -> Result<()> {
        let mut registry = self.lock();
        let mut awaited: Option<(u64, u64)> = None;

        loop {
            let entry = registry
                .get(account_id)
                .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;

            if let Some((epoch, seq)) = awaited
                && entry.epoch == epoch
                && entry.refresh_seq != seq
                && !entry.refresh_in_flight
            {
                debug!(account_id, ok = entry.last_refresh_ok, "Joined concurrent refresh");
                return if entry.last_refresh_ok {
                    Ok(())
                } else {
                    Err(Error::RefreshFailedElsewhere(account_id.to_string()))
                };
            }

            if !entry.refresh_in_flight {
                break;
            }

            awaited.get_or_insert((entry.epoch, entry.refresh_seq));
            registry = self
                .refresh_done
                .wait(registry)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let entry = registry
            .get_mut(account_id)
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;
        let account = &entry.account;
        if stale_within.is_some_and(|buffer| !account.token.is_expired_within(buffer)) {
            debug!(account_id, "Token already fresh; skipping refresh");
            return Ok(());
        }
        let strategy = self.strategies.get(&account.provider).ok_or_else(|| {
            mailsend_oauth::Error::UnsupportedProvider(account.provider.to_string())
        })?;
        if !account.token.has_refresh_token() {
            return Err(mailsend_oauth::Error::NoRefreshToken.into());
        }

        entry.refresh_in_flight = true;
        let in_flight = InFlight {
            manager: self,
            account_id,
            epoch: entry.epoch,
            previous: account.token.clone(),
            finished: false,
        };
        let client_id = account.client_id.clone();
        let client_secret = account.client_secret.clone();
        let provider = account.provider.clone();
        drop(registry);

        debug!(account_id, %provider, "Refreshing access token");
        let outcome = strategy.refresh(&RefreshRequest {
            client_id: &client_id,
            client_secret: &client_secret,
            refresh_token: &in_flight.previous.refresh_token,
        });

        in_flight.finish(outcome)
    }

    /// Checks whether the account's token expires within `buffer_minutes`.
    ///
    /// Unknown accounts count as expired, and so does every token when the
    /// buffer is too large to represent.
    pub fn is_token_expired(&self, account_id: &str, buffer_minutes: i64) -> bool {
        let Some(buffer) = Duration::try_minutes(buffer_minutes) else {
            return true;
        };
        self.lock()
            .get(account_id)
            .is_none_or(|entry| entry.account.token.is_expired_within(buffer))
    }

    /// Stores a token pair obtained outside the manager, e.g. from an
    /// authorization-code exchange.
    ///
    /// The token is issued now and expires `expires_in_secs` later. The
    /// previously granted scope is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] for unknown accounts, or a store
    /// error, in which case the registry is left unchanged.
    pub fn store_tokens(
        &self,
        account_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: i64,
    ) -> Result<()> {
        let mut registry = self.lock();
        let entry = registry
            .get_mut(account_id)
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;

        let token = Token::issued(access_token, refresh_token, expires_in_secs)
            .with_scope(entry.account.token.scope.clone());
        self.store.save(account_id, &token)?;
        entry.account.token = token;
        drop(registry);

        info!(account_id, expires_in_secs, "Stored new tokens");
        Ok(())
    }

    /// Seconds until the account's token expires; negative once expired,
    /// zero for unknown accounts.
    pub fn token_lifetime(&self, account_id: &str) -> i64 {
        self.lock()
            .get(account_id)
            .map_or(0, |entry| entry.account.token.lifetime())
    }

    /// Removes the account from the registry and deletes its stored token.
    ///
    /// Returns false if the account was not registered; the stored record
    /// is deleted either way.
    pub fn delete_account(&self, account_id: &str) -> bool {
        let mut registry = self.lock();
        let removed = registry.remove(account_id).is_some();
        if let Err(e) = self.store.delete(account_id) {
            warn!(account_id, "Failed to delete stored token: {e}");
        }
        drop(registry);
        self.refresh_done.notify_all();

        if removed {
            info!(account_id, "Deleted account");
        }
        removed
    }

    /// Lists registered account ids, sorted.
    pub fn list_accounts(&self) -> Vec<String> {
        self.lock().ids()
    }

    /// Returns true if the account is registered.
    pub fn account_exists(&self, account_id: &str) -> bool {
        self.lock().get(account_id).is_some()
    }

    /// Returns a snapshot of the account, token included.
    pub fn account(&self, account_id: &str) -> Option<Account> {
        self.lock()
            .get(account_id)
            .map(|entry| entry.account.clone())
    }

    /// Refreshes every account whose token is within the refresh buffer of
    /// expiry and has a refresh token.
    ///
    /// Returns the outcome for each account attempted.
    pub fn refresh_stale(&self) -> Vec<(String, Result<()>)> {
        let buffer = self.refresh_buffer();
        let stale: Vec<String> = {
            let registry = self.lock();
            registry
                .ids()
                .into_iter()
                .filter(|id| {
                    registry.get(id).is_some_and(|entry| {
                        let token = &entry.account.token;
                        token.has_refresh_token() && token.is_expired_within(buffer)
                    })
                })
                .collect()
        };

        stale
            .into_iter()
            .map(|id| {
                let outcome = self.refresh_inner(&id, Some(buffer));
                (id, outcome)
            })
            .collect()
    }

    /// Enables or disables refresh-on-read in [`TokenManager::access_token`].
    pub fn set_auto_refresh(&self, enabled: bool) {
        self.auto_refresh.store(enabled, Ordering::Relaxed);
    }

    /// Returns true if refresh-on-read is enabled.
    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh.load(Ordering::Relaxed)
    }

    /// Sets how many minutes before expiry a token counts as stale.
    ///
    /// Values are clamped to `0..=MAX_REFRESH_BUFFER_MINUTES`.
    pub fn set_refresh_buffer(&self, minutes: i64) {
        self.refresh_buffer_minutes.store(
            minutes.clamp(0, MAX_REFRESH_BUFFER_MINUTES),
            Ordering::Relaxed,
        );
    }

    /// Returns the refresh buffer.
    pub fn refresh_buffer(&self) -> Duration {
        Duration::try_minutes(self.refresh_buffer_minutes.load(Ordering::Relaxed))
            .unwrap_or(Duration::MAX)
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("accounts", &self.lock().len())
            .field("strategies", &self.strategies)
            .field("auto_refresh", &self.auto_refresh())
            .field("refresh_buffer", &self.refresh_buffer())
            .finish_non_exhaustive()
    }
}

/// A refresh between its snapshot and its commit.
///
/// Dropping it without [`InFlight::finish`] (e.g. a panicking strategy)
/// records a failed attempt so waiters are released.
struct InFlight<'a> {
    manager: &'a TokenManager,
    account_id: &'a str,
    epoch: u64,
    previous: Token,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(mut self, outcome: mailsend_oauth::Result<mailsend_oauth::TokenResponse>) -> Result<()> {
        self.finished = true;
        let account_id = self.account_id;
        let mut registry = self.manager.lock();

        let result = match registry.get_mut(account_id) {
            Some(entry) if entry.epoch == self.epoch => {
                let result = match outcome {
                    Ok(_) if entry.account.token != self.previous => {
                        debug!(account_id, "Tokens replaced during refresh; keeping them");
                        Ok(())
                    }
                    Ok(response) => {
                        let token = entry.account.token.refreshed(response);
                        match self.manager.store.save(account_id, &token) {
                            Ok(()) => {
                                info!(
                                    account_id,
                                    expires_at = %token.expires_at,
                                    "Refreshed access token"
                                );
                                entry.account.token = token;
                                Ok(())
                            }
                            Err(e) => {
                                warn!(account_id, "Refreshed token could not be stored: {e}");
                                Err(e)
                            }
                        }
                    }
                    Err(e) => Err(e.into()),
                };
                entry.refresh_in_flight = false;
                entry.refresh_seq += 1;
                entry.last_refresh_ok = result.is_ok();
                result
            }
            _ => {
                debug!(account_id, "Account removed during refresh; discarding result");
                Err(Error::AccountNotFound(account_id.to_string()))
            }
        };

        drop(registry);
        self.manager.refresh_done.notify_all();
        result
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut registry = self.manager.lock();
        if let Some(entry) = registry.get_mut(self.account_id)
            && entry.epoch == self.epoch
        {
            entry.refresh_in_flight = false;
            entry.refresh_seq += 1;
            entry.last_refresh_ok = false;
        }
        drop(registry);
        self.manager.refresh_done.notify_all();
    }
}
