//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "mailsend",
    about = "Manage OAuth2 credentials for sending mail",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Path to the configuration file
    #[arg(long, global = true, env = "MAILSEND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding token records (overrides the configuration file)
    #[arg(long, global = true, env = "MAILSEND_TOKEN_DIR")]
    pub token_dir: Option<PathBuf>,

    /// Key for encrypting token records at rest (see `mailsend keygen`)
    #[arg(long, global = true, env = "MAILSEND_TOKEN_KEY", hide_env_values = true)]
    pub token_key: Option<String>,

    /// Minutes before expiry at which a token is refreshed
    #[arg(long, global = true, env = "MAILSEND_REFRESH_BUFFER")]
    pub refresh_buffer: Option<i64>,

    /// Never refresh tokens implicitly when reading them
    #[arg(long, global = true, env = "MAILSEND_NO_AUTO_REFRESH")]
    pub no_auto_refresh: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register an account (or update a registered one)
    Add(AddArgs),
    /// Forget an account and delete its stored token
    Remove {
        /// Account id
        account: String,
    },
    /// List registered accounts
    List,
    /// Show token status for one or all accounts
    Status {
        /// Account id (omit for all accounts)
        account: Option<String>,
    },
    /// Store tokens obtained from an authorization flow
    Store(StoreArgs),
    /// Print a usable access token, refreshing it first if needed
    Token {
        /// Account id
        account: String,
    },
    /// Refresh an account's access token now
    Refresh {
        /// Account id
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        account: Option<String>,
        /// Refresh every account whose token is about to expire
        #[arg(long)]
        all: bool,
    },
    /// Generate a random key for encrypting token records
    Keygen,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Account id, used as the token record name
    pub account: String,

    /// OAuth2 provider (google, microsoft, or a custom name)
    #[arg(long, default_value = "google")]
    pub provider: String,

    /// OAuth2 client id
    #[arg(long, env = "MAILSEND_CLIENT_ID")]
    pub client_id: String,

    /// OAuth2 client secret (omit for public clients)
    #[arg(long, env = "MAILSEND_CLIENT_SECRET", hide_env_values = true, default_value = "")]
    pub client_secret: String,

    /// Redirect URI registered with the provider
    #[arg(long, default_value = "")]
    pub redirect_uri: String,

    /// Address the account sends as
    #[arg(long, default_value = "")]
    pub email: String,
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Account id
    pub account: String,

    /// Access token
    #[arg(long, env = "MAILSEND_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: String,

    /// Refresh token
    #[arg(long, env = "MAILSEND_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: String,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = 3600)]
    pub expires_in: i64,
}
