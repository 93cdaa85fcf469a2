//! File-backed token store: one `<account_id>.json` per account.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mailsend_oauth::Token;
use tracing::{debug, warn};

use super::TokenStore;
use super::cipher::TokenCipher;
use crate::account::validate_account_id;
use crate::error::{Error, Result};

/// Extension of token record files.
const RECORD_EXTENSION: &str = "json";

/// Permissions for the token directory on Unix.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Permissions for token files on Unix.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Token store writing one record file per account into a directory.
///
/// Records are written to a temporary file in the same directory and renamed
/// into place, so a reader sees either the old record or the new one. With a
/// cipher configured the file holds the base64 of the sealed JSON record.
pub struct FileTokenStore {
    dir: PathBuf,
    cipher: Option<Arc<dyn TokenCipher>>,
    io_lock: Mutex<()>,
}

impl FileTokenStore {
    /// Opens a plaintext store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open(dir.into(), None)
    }

    /// Opens a store that encrypts records with `cipher`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_cipher(dir: impl Into<PathBuf>, cipher: Arc<dyn TokenCipher>) -> Result<Self> {
        Self::open(dir.into(), Some(cipher))
    }

    fn open(dir: PathBuf, cipher: Option<Arc<dyn TokenCipher>>) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(DIR_MODE))?;
        }
        debug!(dir = %dir.display(), encrypted = cipher.is_some(), "Opened token store");
        Ok(Self {
            dir,
            cipher,
            io_lock: Mutex::new(()),
        })
    }

    /// Returns the directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns true if records are encrypted at rest.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn record_path(&self, account_id: &str) -> Result<PathBuf> {
        validate_account_id(account_id)
            .map_err(|_| Error::InvalidAccountId(account_id.to_string()))?;
        Ok(self.dir.join(format!("{account_id}.{RECORD_EXTENSION}")))
    }

    fn encode(&self, token: &Token) -> Result<Vec<u8>> {
        let json = serde_json::to_vec_pretty(token)?;
        match &self.cipher {
            Some(cipher) => Ok(STANDARD.encode(cipher.seal(&json)?).into_bytes()),
            None => Ok(json),
        }
    }

    fn decode(&self, account_id: &str, bytes: &[u8]) -> Result<Token> {
        let corrupt = |reason: String| Error::CorruptRecord {
            account_id: account_id.to_string(),
            reason,
        };

        let json = match &self.cipher {
            Some(_) if bytes.trim_ascii_start().starts_with(b"{") => {
                warn!(account_id, "Token record is not encrypted; it will be on next save");
                bytes.to_vec()
            }
            Some(cipher) => {
                let sealed = STANDARD
                    .decode(bytes.trim_ascii())
                    .map_err(|e| corrupt(format!("not base64: {e}")))?;
                cipher.open(&sealed).map_err(|e| corrupt(e.to_string()))?
            }
            None => bytes.to_vec(),
        };

        serde_json::from_slice(&json).map_err(|e| corrupt(e.to_string()))
    }
}

/// Writes `contents` to a fresh owner-only temporary file next to `path`,
/// syncs it and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.{}.{seq}.tmp", std::process::id()));

    let result = (|| {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(FILE_MODE);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

impl TokenStore for FileTokenStore {
    fn save(&self, account_id: &str, token: &Token) -> Result<()> {
        let path = self.record_path(account_id)?;
        let contents = self.encode(token)?;

        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        write_atomic(&path, &contents)?;
        debug!(account_id, "Saved token record");
        Ok(())
    }

    fn load(&self, account_id: &str) -> Result<Option<Token>> {
        let path = self.record_path(account_id)?;

        let bytes = {
            let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
            match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(account_id, "No token record");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.decode(account_id, &bytes).map(Some)
    }

    fn delete(&self, account_id: &str) -> Result<()> {
        let path = self.record_path(account_id)?;

        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(account_id, "Deleted token record");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(account_id, "Failed to delete token record: {e}");
                Err(e.into())
            }
        }
    }

    fn list_accounts(&self) -> Result<BTreeSet<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut accounts = BTreeSet::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str())
                && validate_account_id(stem).is_ok()
            {
                accounts.insert(stem.to_string());
            }
        }
        Ok(accounts)
    }
}

impl fmt::Debug for FileTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTokenStore")
            .field("dir", &self.dir)
            .field("encrypted", &self.is_encrypted())
            .finish_non_exhaustive()
    }
}
