//! Command implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use mailsend_core::{
    Aes256GcmCipher, AccountRegistration, Config, FileTokenStore, TokenManager, generate_key,
    validate_registration,
};
use mailsend_oauth::{Provider, Strategies};
use tracing::{debug, info};

use crate::cli::{AddArgs, Cli, Command, GlobalArgs, StoreArgs};

/// Loaded configuration plus where it came from.
struct Workspace {
    config_path: PathBuf,
    config: Config,
    manager: TokenManager,
}

/// Runs the parsed command line.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let Cli { global, command } = cli;
    match command {
        Command::Keygen => {
            println!("{}", generate_key());
            Ok(())
        }
        Command::Add(args) => add(&mut Workspace::open(&global)?, args),
        Command::Remove { account } => remove(&mut Workspace::open(&global)?, &account),
        Command::List => {
            list(&Workspace::open(&global)?);
            Ok(())
        }
        Command::Status { account } => status(&Workspace::open(&global)?, account.as_deref()),
        Command::Store(args) => store(&Workspace::open(&global)?, &args),
        Command::Token { account } => {
            let ws = Workspace::open(&global)?;
            let token = ws
                .manager
                .access_token(&account)
                .with_context(|| format!("no usable access token for '{account}'"))?;
            println!("{token}");
            Ok(())
        }
        Command::Refresh { account, all } => {
            let ws = Workspace::open(&global)?;
            if all {
                refresh_all(&ws)
            } else {
                let account = account.context("an account id or --all is required")?;
                refresh(&ws, &account)
            }
        }
    }
}

impl Workspace {
    /// Loads the configuration and builds the manager from it.
    fn open(global: &GlobalArgs) -> anyhow::Result<Self> {
        let config_path = match &global.config {
            Some(path) => path.clone(),
            None => Config::default_path()?,
        };
        let config = Config::load(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;

        let token_dir = match &global.token_dir {
            Some(dir) => dir.clone(),
            None => config.token_dir()?,
        };
        let store = match &global.token_key {
            Some(key) => {
                FileTokenStore::with_cipher(&token_dir, Arc::new(Aes256GcmCipher::from_passphrase(key)))
            }
            None => FileTokenStore::new(&token_dir),
        }
        .with_context(|| format!("failed to open token directory {}", token_dir.display()))?;

        let manager = TokenManager::new(Arc::new(store), Strategies::with_defaults()?);
        let registered = config.apply_to(&manager);
        if let Some(minutes) = global.refresh_buffer {
            manager.set_refresh_buffer(minutes);
        }
        if global.no_auto_refresh {
            manager.set_auto_refresh(false);
        }
        debug!(
            config = %config_path.display(),
            tokens = %token_dir.display(),
            registered,
            "Token manager ready"
        );

        Ok(Self {
            config_path,
            config,
            manager,
        })
    }

    fn save_config(&self) -> anyhow::Result<()> {
        self.config
            .save(&self.config_path)
            .with_context(|| format!("failed to save {}", self.config_path.display()))
    }

    fn require_account(&self, account: &str) -> anyhow::Result<()> {
        if !self.manager.account_exists(account) {
            bail!("unknown account '{account}' (see `mailsend list`)");
        }
        Ok(())
    }
}

fn add(ws: &mut Workspace, args: AddArgs) -> anyhow::Result<()> {
    let Ok(provider) = args.provider.parse::<Provider>();
    let registration = AccountRegistration::new(args.account, provider, args.client_id)
        .with_client_secret(args.client_secret)
        .with_redirect_uri(args.redirect_uri)
        .with_user_email(args.email);

    if let Err(errors) = validate_registration(&registration) {
        let reasons: Vec<String> = errors
            .iter()
            .map(|e| format!("{}: {e}", e.field()))
            .collect();
        bail!("invalid account: {}", reasons.join("; "));
    }
    if !ws.manager.register_account(registration.clone()) {
        bail!("account '{}' could not be registered", registration.account_id);
    }

    let account_id = registration.account_id.clone();
    ws.config.upsert_account(registration);
    ws.save_config()?;
    info!(account_id, "Account saved to configuration");
    println!("Added account {account_id}");
    Ok(())
}

fn remove(ws: &mut Workspace, account: &str) -> anyhow::Result<()> {
    let configured = ws.config.remove_account(account);
    let registered = ws.manager.delete_account(account);
    if !configured && !registered {
        bail!("unknown account '{account}'");
    }
    if configured {
        ws.save_config()?;
    }
    println!("Removed account {account}");
    Ok(())
}

fn list(ws: &Workspace) {
    for account_id in ws.manager.list_accounts() {
        if let Some(account) = ws.manager.account(&account_id) {
            println!("{account_id}\t{}\t{}", account.provider, account.user_email);
        }
    }
}

fn status(ws: &Workspace, account: Option<&str>) -> anyhow::Result<()> {
    let ids = match account {
        Some(id) => {
            ws.require_account(id)?;
            vec![id.to_string()]
        }
        None => ws.manager.list_accounts(),
    };

    let buffer_minutes = ws.manager.refresh_buffer().num_minutes();
    for account_id in ids {
        let Some(account) = ws.manager.account(&account_id) else {
            continue;
        };
        let token = &account.token;
        let state = if !token.valid {
            "no token".to_string()
        } else if ws.manager.is_token_expired(&account_id, 0) {
            "expired".to_string()
        } else if ws.manager.is_token_expired(&account_id, buffer_minutes) {
            format!("expiring, {} left", format_lifetime(token.lifetime()))
        } else {
            format!("valid, {} left", format_lifetime(token.lifetime()))
        };
        let refresh = if token.has_refresh_token() {
            "refreshable"
        } else {
            "no refresh token"
        };
        println!("{account_id}\t{}\t{state}\t{refresh}", account.provider);
    }
    Ok(())
}

fn store(ws: &Workspace, args: &StoreArgs) -> anyhow::Result<()> {
    ws.require_account(&args.account)?;
    ws.manager
        .store_tokens(
            &args.account,
            &args.access_token,
            &args.refresh_token,
            args.expires_in,
        )
        .with_context(|| format!("failed to store tokens for '{}'", args.account))?;
    println!("Stored tokens for {}", args.account);
    Ok(())
}

fn refresh(ws: &Workspace, account: &str) -> anyhow::Result<()> {
    ws.require_account(account)?;
    ws.manager
        .refresh(account)
        .with_context(|| format!("failed to refresh '{account}'"))?;
    println!(
        "Refreshed {account}, {} left",
        format_lifetime(ws.manager.token_lifetime(account))
    );
    Ok(())
}

fn refresh_all(ws: &Workspace) -> anyhow::Result<()> {
    let outcomes = ws.manager.refresh_stale();
    if outcomes.is_empty() {
        println!("All tokens are fresh");
        return Ok(());
    }

    let mut failed = 0usize;
    for (account_id, outcome) in &outcomes {
        match outcome {
            Ok(()) => println!("{account_id}\trefreshed"),
            Err(e) => {
                failed += 1;
                let hint = if e.is_terminal() {
                    " (re-authorization required)"
                } else {
                    ""
                };
                println!("{account_id}\tfailed: {e}{hint}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} refreshes failed", outcomes.len());
    }
    Ok(())
}

/// Formats a number of seconds as `1h 05m`, `4m 09s` or `12s`.
fn format_lifetime(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}
