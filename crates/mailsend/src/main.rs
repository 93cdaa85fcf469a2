//! `mailsend` - OAuth2 credential manager for sending mail
//!
//! Registers accounts, stores the tokens an authorization flow produced and
//! hands out fresh access tokens for SMTP `XOAUTH2` authentication.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so that `mailsend token` output stays pipeable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailsend=info,mailsend_core=info,mailsend_oauth=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    commands::run(Cli::parse())
}
