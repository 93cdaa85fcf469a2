//! Integration tests for the token manager.
//!
//! Refreshes go through a scripted strategy so the tests control what the
//! provider returns and can observe how often it is contacted.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration as StdDuration;

use mailsend_core::{
    AccountRegistration, Error, FileTokenStore, MemoryTokenStore, TokenManager, TokenStore,
};
use mailsend_oauth::token::MAX_LIFETIME_SECS;
use mailsend_oauth::{
    Provider, RefreshRequest, RefreshStrategy, StatusCode, Strategies, TokenResponse,
};

type Script = Box<dyn Fn(usize) -> mailsend_oauth::Result<TokenResponse> + Send + Sync>;

/// Refresh strategy returning scripted outcomes.
struct ScriptedRefresher {
    calls: AtomicUsize,
    script: Script,
}

impl ScriptedRefresher {
    fn new(
        script: impl Fn(usize) -> mailsend_oauth::Result<TokenResponse> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Box::new(script),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RefreshStrategy for ScriptedRefresher {
    fn refresh(&self, request: &RefreshRequest<'_>) -> mailsend_oauth::Result<TokenResponse> {
        assert!(!request.refresh_token.is_empty());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(call)
    }
}

fn rotated(access: &str, refresh: &str, expires_in: i64) -> TokenResponse {
    TokenResponse {
        refresh_token: Some(refresh.to_string()),
        ..TokenResponse::new(access, expires_in)
    }
}

fn invalid_grant() -> mailsend_oauth::Error {
    mailsend_oauth::Error::oauth_error(
        StatusCode::BAD_REQUEST,
        "invalid_grant",
        "Token has been expired or revoked.",
    )
}

fn registration(id: &str) -> AccountRegistration {
    AccountRegistration::new(id, Provider::Google, "cid")
        .with_client_secret("secret")
        .with_user_email(format!("{id}@example.com"))
}

fn manager_with(store: Arc<dyn TokenStore>, refresher: &Arc<ScriptedRefresher>) -> TokenManager {
    let mut strategies = Strategies::new();
    strategies.insert(Provider::Google, Arc::clone(refresher) as Arc<dyn RefreshStrategy>);
    TokenManager::new(store, strategies)
}

fn memory_manager(refresher: &Arc<ScriptedRefresher>) -> TokenManager {
    manager_with(Arc::new(MemoryTokenStore::new()), refresher)
}

fn unreachable_refresher() -> Arc<ScriptedRefresher> {
    ScriptedRefresher::new(|_| panic!("provider must not be contacted"))
}

#[test]
fn test_unknown_account() {
    let manager = memory_manager(&unreachable_refresher());
    assert_eq!(manager.access_token("ghost"), None);
    assert!(manager.is_token_expired("ghost", 0));
    assert_eq!(manager.token_lifetime("ghost"), 0);
    assert!(!manager.delete_account("ghost"));
    assert!(matches!(
        manager.store_tokens("ghost", "AT", "RT", 60),
        Err(Error::AccountNotFound(_))
    ));
}

#[test]
fn test_registered_account_without_token() {
    let refresher = unreachable_refresher();
    let manager = memory_manager(&refresher);
    assert!(manager.register_account(registration("work")));

    assert!(manager.account_exists("work"));
    assert_eq!(manager.access_token("work"), None);
    assert!(manager.is_token_expired("work", 0));
    assert!(matches!(
        manager.refresh("work"),
        Err(Error::OAuth(mailsend_oauth::Error::NoRefreshToken))
    ));
    assert_eq!(refresher.calls(), 0);
}

#[test]
fn test_store_tokens_then_access() {
    let refresher = unreachable_refresher();
    let manager = memory_manager(&refresher);
    manager.register_account(registration("work"));

    manager.store_tokens("work", "AT1", "RT1", 3600).unwrap();

    assert_eq!(manager.access_token("work").as_deref(), Some("AT1"));
    let lifetime = manager.token_lifetime("work");
    assert!(lifetime > 3500 && lifetime <= 3600, "lifetime {lifetime}");
    assert!(!manager.is_token_expired("work", 5));
    assert_eq!(refresher.calls(), 0);
}

#[test]
fn test_expiry_buffer() {
    let manager = memory_manager(&unreachable_refresher());
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 120).unwrap();

    assert!(manager.is_token_expired("work", 5));
    assert!(!manager.is_token_expired("work", 1));
}

#[test]
fn test_list_accounts() {
    let manager = memory_manager(&unreachable_refresher());
    for id in ["c", "a", "b", "a"] {
        assert!(manager.register_account(registration(id)));
    }
    assert_eq!(manager.list_accounts(), vec!["a", "b", "c"]);
}

#[test]
fn test_reregister_overwrites_metadata_keeps_token() {
    let manager = memory_manager(&unreachable_refresher());
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 3600).unwrap();

    manager.register_account(
        AccountRegistration::new("work", Provider::Google, "cid2").with_user_email("new@example.com"),
    );

    let account = manager.account("work").unwrap();
    assert_eq!(account.client_id, "cid2");
    assert_eq!(account.user_email, "new@example.com");
    assert_eq!(account.token.access_token, "AT1");
}

#[test]
fn test_delete_removes_stored_record() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTokenStore::new(tmp.path()).unwrap());
    let manager = manager_with(store.clone(), &unreachable_refresher());
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 3600).unwrap();
    assert!(tmp.path().join("work.json").exists());

    assert!(manager.delete_account("work"));
    assert!(!manager.account_exists("work"));
    assert_eq!(manager.access_token("work"), None);
    assert!(store.load("work").unwrap().is_none());
    assert!(!tmp.path().join("work.json").exists());
}

#[test]
fn test_token_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let store = Arc::new(FileTokenStore::new(tmp.path()).unwrap());
        let manager = manager_with(store, &unreachable_refresher());
        manager.register_account(registration("work"));
        manager.store_tokens("work", "AT1", "RT1", 3600).unwrap();
    }

    let store = Arc::new(FileTokenStore::new(tmp.path()).unwrap());
    let manager = manager_with(store, &unreachable_refresher());
    manager.register_account(registration("work"));
    assert_eq!(manager.access_token("work").as_deref(), Some("AT1"));
}

#[test]
fn test_access_refreshes_stale_token() {
    let refresher = ScriptedRefresher::new(|_| Ok(rotated("AT2", "RT2", 7200)));
    let store = Arc::new(MemoryTokenStore::new());
    let manager = manager_with(store.clone(), &refresher);
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 60).unwrap();

    assert_eq!(manager.access_token("work").as_deref(), Some("AT2"));
    assert_eq!(refresher.calls(), 1);
    assert!(manager.token_lifetime("work") > 3600);

    let stored = store.load("work").unwrap().unwrap();
    assert_eq!(stored.access_token, "AT2");
    assert_eq!(stored.refresh_token, "RT2");

    // Fresh now; no further provider calls.
    assert_eq!(manager.access_token("work").as_deref(), Some("AT2"));
    assert_eq!(refresher.calls(), 1);
}

#[test]
fn test_refresh_keeps_refresh_token_when_not_rotated() {
    let refresher = ScriptedRefresher::new(|_| Ok(TokenResponse::new("AT2", 3600)));
    let manager = memory_manager(&refresher);
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 0).unwrap();

    manager.refresh("work").unwrap();
    let token = manager.account("work").unwrap().token;
    assert_eq!(token.access_token, "AT2");
    assert_eq!(token.refresh_token, "RT1");
}

#[test]
fn test_auto_refresh_disabled() {
    let refresher = unreachable_refresher();
    let manager = memory_manager(&refresher);
    manager.set_auto_refresh(false);
    manager.register_account(registration("work"));

    manager.store_tokens("work", "AT1", "RT1", 60).unwrap();
    assert_eq!(manager.access_token("work").as_deref(), Some("AT1"));

    manager.store_tokens("work", "AT1", "RT1", 0).unwrap();
    assert_eq!(manager.access_token("work"), None);
    assert_eq!(refresher.calls(), 0);
}

#[test]
fn test_failed_refresh_leaves_record_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTokenStore::new(tmp.path()).unwrap());
    let refresher = ScriptedRefresher::new(|_| Err(invalid_grant()));
    let manager = manager_with(store, &refresher);
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 0).unwrap();
    let record = tmp.path().join("work.json");
    let before = fs::read(&record).unwrap();

    let err = manager.refresh("work").unwrap_err();
    assert!(err.is_terminal());
    assert_eq!(fs::read(&record).unwrap(), before);
    assert_eq!(manager.account("work").unwrap().token.access_token, "AT1");

    // Expired and unrefreshable: no token handed out.
    assert_eq!(manager.access_token("work"), None);
    assert_eq!(refresher.calls(), 2);
}

#[test]
fn test_transient_failure_keeps_usable_token() {
    let refresher = ScriptedRefresher::new(|_| {
        Err(mailsend_oauth::Error::HttpStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "try later".into(),
        })
    });
    let manager = memory_manager(&refresher);
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 120).unwrap();

    // Within the buffer but not yet expired: the old token is still returned.
    assert_eq!(manager.access_token("work").as_deref(), Some("AT1"));
    assert_eq!(refresher.calls(), 1);
    assert!(!manager.refresh("work").unwrap_err().is_terminal());
}

#[test]
fn test_concurrent_reads_share_one_refresh() {
    const THREADS: usize = 16;
    let refresher = ScriptedRefresher::new(|_| {
        thread::sleep(StdDuration::from_millis(200));
        Ok(rotated("AT2", "RT2", 3600))
    });
    let manager = Arc::new(memory_manager(&refresher));
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 0).unwrap();

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.access_token("work")
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().as_deref(), Some("AT2"));
    }
    assert_eq!(refresher.calls(), 1);
}

#[test]
fn test_waiters_see_failure_of_shared_refresh() {
    const THREADS: usize = 8;
    let refresher = ScriptedRefresher::new(|_| {
        thread::sleep(StdDuration::from_millis(200));
        Err(invalid_grant())
    });
    let manager = Arc::new(memory_manager(&refresher));
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 0).unwrap();

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.refresh("work").is_err()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
    // Late arrivals may start their own attempt, but never concurrently
    // with another, so calls stay well below one per thread.
    assert!(refresher.calls() >= 1);
    assert!(refresher.calls() < THREADS);
}

#[test]
fn test_concurrent_register_and_delete() {
    const THREADS: usize = 12;
    const ROUNDS: usize = 30;
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTokenStore::new(tmp.path()).unwrap());
    // Refreshed tokens expire immediately, so every read of "shared" races
    // a refresh against the other threads' deletes.
    let refresher = ScriptedRefresher::new(|call| {
        thread::sleep(StdDuration::from_millis(2));
        Ok(rotated(&format!("AT-{call}"), &format!("RT-{call}"), 0))
    });
    let manager = Arc::new(manager_with(store.clone(), &refresher));

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let own = format!("acct-{t}");
                barrier.wait();
                for round in 0..ROUNDS {
                    assert!(manager.register_account(registration("shared")));
                    if round % 2 == t % 2 {
                        // May lose to a concurrent delete.
                        let _ = manager.store_tokens("shared", "AT", "RT", 0);
                    }
                    let _ = manager.access_token("shared");
                    let _ = manager.refresh("shared");

                    assert!(manager.register_account(registration(&own)));
                    manager.store_tokens(&own, "AT", "RT", 3600).unwrap();
                    assert_eq!(manager.access_token(&own).as_deref(), Some("AT"));

                    if round % 3 == t % 3 {
                        manager.delete_account("shared");
                    }
                    if round % 2 == 1 {
                        assert!(manager.delete_account(&own));
                        assert!(!manager.account_exists(&own));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(refresher.calls() > 0);

    // Every stored record belongs to a registered account holding that token.
    for id in store.list_accounts().unwrap() {
        let account = manager
            .account(&id)
            .unwrap_or_else(|| panic!("record for unregistered account {id}"));
        assert_eq!(store.load(&id).unwrap().unwrap(), account.token, "{id}");
    }
    // Every registered account with a token has it on disk.
    for id in manager.list_accounts() {
        let token = manager.account(&id).unwrap().token;
        match store.load(&id).unwrap() {
            Some(record) => assert_eq!(record, token, "{id}"),
            None => assert!(!token.valid, "{id} has a token but no record"),
        }
    }
    for t in 0..THREADS {
        let own = format!("acct-{t}");
        assert!(!manager.account_exists(&own));
        assert!(store.load(&own).unwrap().is_none());
    }
}

#[test]
fn test_corrupt_record_counts_as_no_token() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("work.json"), "{ not json").unwrap();
    let store = Arc::new(FileTokenStore::new(tmp.path()).unwrap());
    let manager = manager_with(store, &unreachable_refresher());

    assert!(manager.register_account(registration("work")));
    assert!(manager.account_exists("work"));
    assert_eq!(manager.access_token("work"), None);
    assert!(manager.is_token_expired("work", 0));
}

#[test]
fn test_huge_lifetimes_are_clamped() {
    let refresher = ScriptedRefresher::new(|_| Ok(TokenResponse::new("AT2", i64::MAX)));
    let manager = memory_manager(&refresher);
    manager.register_account(registration("work"));

    manager.store_tokens("work", "AT1", "RT1", i64::MAX).unwrap();
    let lifetime = manager.token_lifetime("work");
    assert!(lifetime > 0 && lifetime <= MAX_LIFETIME_SECS, "lifetime {lifetime}");

    manager.store_tokens("work", "AT1", "RT1", 0).unwrap();
    manager.refresh("work").unwrap();
    assert_eq!(manager.access_token("work").as_deref(), Some("AT2"));
    let lifetime = manager.token_lifetime("work");
    assert!(lifetime > 0 && lifetime <= MAX_LIFETIME_SECS, "lifetime {lifetime}");
    assert_eq!(refresher.calls(), 1);
}

#[test]
fn test_huge_refresh_buffer() {
    let refresher = ScriptedRefresher::new(|_| Ok(TokenResponse::new("AT2", 3600)));
    let manager = memory_manager(&refresher);
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 3600).unwrap();

    assert!(manager.is_token_expired("work", i64::MAX));
    assert!(manager.is_token_expired("work", i64::MIN));

    // Clamped to a year: every token is stale, and reads still work.
    manager.set_refresh_buffer(i64::MAX);
    assert_eq!(manager.access_token("work").as_deref(), Some("AT2"));
    assert_eq!(refresher.calls(), 1);
}

#[test]
fn test_delete_during_refresh_discards_result() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let refresher = ScriptedRefresher::new(move |_| {
        entered_tx.lock().unwrap().send(()).unwrap();
        release_rx.lock().unwrap().recv().unwrap();
        Ok(rotated("AT2", "RT2", 3600))
    });
    let store = Arc::new(MemoryTokenStore::new());
    let manager = Arc::new(manager_with(store.clone(), &refresher));
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 0).unwrap();

    let worker = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.refresh("work"))
    };
    entered_rx.recv().unwrap();
    assert!(manager.delete_account("work"));
    release_tx.send(()).unwrap();

    assert!(matches!(
        worker.join().unwrap(),
        Err(Error::AccountNotFound(_))
    ));
    assert!(!manager.account_exists("work"));
    assert!(store.load("work").unwrap().is_none());
}

#[test]
fn test_store_tokens_during_refresh_wins() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let refresher = ScriptedRefresher::new(move |_| {
        entered_tx.lock().unwrap().send(()).unwrap();
        release_rx.lock().unwrap().recv().unwrap();
        Ok(rotated("AT2", "RT2", 3600))
    });
    let store = Arc::new(MemoryTokenStore::new());
    let manager = Arc::new(manager_with(store.clone(), &refresher));
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT1", "RT1", 0).unwrap();

    let worker = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.refresh("work"))
    };
    entered_rx.recv().unwrap();
    manager.store_tokens("work", "AT9", "RT9", 3600).unwrap();
    release_tx.send(()).unwrap();

    worker.join().unwrap().unwrap();
    assert_eq!(manager.access_token("work").as_deref(), Some("AT9"));
    assert_eq!(store.load("work").unwrap().unwrap().refresh_token, "RT9");
}

#[test]
fn test_refresh_stale() {
    let refresher = ScriptedRefresher::new(|call| Ok(rotated(&format!("AT-{call}"), "RT", 3600)));
    let manager = memory_manager(&refresher);
    for id in ["fresh", "stale", "no-refresh", "no-token"] {
        manager.register_account(registration(id));
    }
    manager.store_tokens("fresh", "AT", "RT", 3600).unwrap();
    manager.store_tokens("stale", "AT", "RT", 0).unwrap();
    manager.store_tokens("no-refresh", "AT", "", 0).unwrap();

    let outcomes = manager.refresh_stale();
    let attempted: BTreeSet<&str> = outcomes.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(attempted, BTreeSet::from(["stale"]));
    assert!(outcomes.iter().all(|(_, outcome)| outcome.is_ok()));
    assert_eq!(refresher.calls(), 1);
    assert_eq!(manager.access_token("stale").as_deref(), Some("AT-0"));
}

#[test]
fn test_store_records_are_encrypted_when_keyed() {
    let tmp = tempfile::tempdir().unwrap();
    let cipher = Arc::new(mailsend_core::Aes256GcmCipher::from_passphrase("hunter2"));
    let store = Arc::new(FileTokenStore::with_cipher(tmp.path(), cipher).unwrap());
    let manager = manager_with(store, &unreachable_refresher());
    manager.register_account(registration("work"));
    manager.store_tokens("work", "AT-secret", "RT-secret", 3600).unwrap();

    let raw = fs::read_to_string(tmp.path().join("work.json")).unwrap();
    assert!(!raw.contains("AT-secret"));
    assert!(!raw.contains("RT-secret"));
    assert_eq!(manager.access_token("work").as_deref(), Some("AT-secret"));
}
