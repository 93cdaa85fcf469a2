//! Persistent configuration for the token subsystem.
//!
//! Stored as JSON, by default at `<config dir>/mailsend/oauth.json`. Secrets
//! for encrypting stored tokens are never part of this file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::account::AccountRegistration;
use crate::error::{Error, Result};
use crate::manager::{DEFAULT_REFRESH_BUFFER_MINUTES, TokenManager};
use crate::store::write_atomic;

/// Application directory name under the platform config/data dirs.
const APP_DIR: &str = "mailsend";

/// Configuration file name.
const CONFIG_FILE: &str = "oauth.json";

/// Token manager settings and registered accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Refresh stale tokens when an access token is requested.
    pub auto_refresh: bool,
    /// Minutes before expiry at which a token counts as stale.
    pub refresh_buffer_minutes: i64,
    /// Directory for token records (platform data dir when unset).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_dir: Option<PathBuf>,
    /// Accounts to register on startup.
    pub accounts: Vec<AccountRegistration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            refresh_buffer_minutes: DEFAULT_REFRESH_BUFFER_MINUTES,
            token_dir: None,
            accounts: Vec::new(),
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no config directory.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or_else(|| Error::Config("no configuration directory on this platform".into()))
    }

    /// Loads configuration; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Saves configuration, replacing the file atomically. The file is
    /// readable by the owner only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Directory holding token records.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the platform has
    /// no data directory.
    pub fn token_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.token_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR).join("tokens"))
            .ok_or_else(|| Error::Config("no data directory on this platform".into()))
    }

    /// Looks up a configured account.
    #[must_use]
    pub fn account(&self, account_id: &str) -> Option<&AccountRegistration> {
        self.accounts.iter().find(|a| a.account_id == account_id)
    }

    /// Adds an account, replacing any entry with the same id.
    pub fn upsert_account(&mut self, registration: AccountRegistration) {
        match self
            .accounts
            .iter_mut()
            .find(|a| a.account_id == registration.account_id)
        {
            Some(existing) => *existing = registration,
            None => self.accounts.push(registration),
        }
    }

    /// Removes an account; returns false if it was not configured.
    pub fn remove_account(&mut self, account_id: &str) -> bool {
        let before = self.accounts.len();
        self.accounts.retain(|a| a.account_id != account_id);
        self.accounts.len() != before
    }

    /// Applies the settings to a manager and registers every configured account.
    ///
    /// Returns the number of accounts registered.
    pub fn apply_to(&self, manager: &TokenManager) -> usize {
        manager.set_auto_refresh(self.auto_refresh);
        manager.set_refresh_buffer(self.refresh_buffer_minutes);
        self.accounts
            .iter()
            .filter(|registration| manager.register_account((*registration).clone()))
            .count()
    }
}
