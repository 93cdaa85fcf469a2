//! Account model types.

use std::fmt;

use mailsend_oauth::token::redact;
use mailsend_oauth::{Provider, Token};
use serde::{Deserialize, Serialize};

/// Everything needed to register an account, minus its token.
///
/// This is also the per-account entry of the configuration file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRegistration {
    /// Unique, caller-chosen identifier.
    pub account_id: String,
    /// Identity provider.
    pub provider: Provider,
    /// `OAuth2` client id.
    pub client_id: String,
    /// `OAuth2` client secret (empty for public clients).
    #[serde(default)]
    pub client_secret: String,
    /// Redirect URI used when the grant was authorized.
    #[serde(default)]
    pub redirect_uri: String,
    /// Mailbox the account sends as.
    #[serde(default)]
    pub user_email: String,
}

impl AccountRegistration {
    /// Creates a registration with the required fields.
    #[must_use]
    pub fn new(
        account_id: impl Into<String>,
        provider: Provider,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            provider,
            client_id: client_id.into(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            user_email: String::new(),
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = secret.into();
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    /// Sets the user email.
    #[must_use]
    pub fn with_user_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = email.into();
        self
    }
}

impl fmt::Debug for AccountRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRegistration")
            .field("account_id", &self.account_id)
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("redirect_uri", &self.redirect_uri)
            .field("user_email", &self.user_email)
            .finish()
    }
}

/// A registered account together with its current token.
///
/// An account that never had a token stored carries [`Token::default`],
/// which is invalid.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    /// Unique identifier.
    pub account_id: String,
    /// Identity provider.
    pub provider: Provider,
    /// `OAuth2` client id.
    pub client_id: String,
    /// `OAuth2` client secret.
    pub client_secret: String,
    /// Redirect URI.
    pub redirect_uri: String,
    /// Mailbox the account sends as.
    pub user_email: String,
    /// Current token.
    pub token: Token,
}

impl Account {
    /// Builds an account from its registration and token.
    #[must_use]
    pub fn new(registration: AccountRegistration, token: Token) -> Self {
        Self {
            account_id: registration.account_id,
            provider: registration.provider,
            client_id: registration.client_id,
            client_secret: registration.client_secret,
            redirect_uri: registration.redirect_uri,
            user_email: registration.user_email,
            token,
        }
    }

    /// Replaces the metadata with a new registration, keeping the token.
    pub fn apply(&mut self, registration: AccountRegistration) {
        let token = std::mem::take(&mut self.token);
        *self = Self::new(registration, token);
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("account_id", &self.account_id)
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("redirect_uri", &self.redirect_uri)
            .field("user_email", &self.user_email)
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_serde() {
        let json = r#"{"account_id":"work","provider":"microsoft","client_id":"cid"}"#;
        let reg: AccountRegistration = serde_json::from_str(json).unwrap();
        assert_eq!(reg.provider, Provider::Microsoft);
        assert!(reg.client_secret.is_empty());
        assert!(reg.redirect_uri.is_empty());
    }

    #[test]
    fn test_apply_keeps_token() {
        let reg = AccountRegistration::new("work", Provider::Google, "cid");
        let mut account = Account::new(reg.clone(), Token::issued("AT1", "RT1", 60));
        account.apply(reg.with_user_email("new@example.com"));
        assert_eq!(account.user_email, "new@example.com");
        assert_eq!(account.token.access_token, "AT1");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let reg = AccountRegistration::new("work", Provider::Google, "cid")
            .with_client_secret("s3cret");
        let account = Account::new(reg.clone(), Token::issued("AT1", "RT1", 60));
        assert!(!format!("{reg:?}").contains("s3cret"));
        let rendered = format!("{account:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("AT1"));
        assert!(rendered.contains("cid"));
    }
}
