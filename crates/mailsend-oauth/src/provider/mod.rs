//! `OAuth2` provider identities and their token endpoints.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Google token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Microsoft identity platform (v2.0, common tenant) token endpoint.
pub const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Identity provider an account authenticates against.
///
/// Built-in providers carry a known token endpoint. Anything else is
/// `Custom` and needs a refresh strategy registered for it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provider {
    /// Google (Gmail).
    Google,
    /// Microsoft (Outlook / Microsoft 365).
    Microsoft,
    /// Any other provider, identified by its lowercase name.
    Custom(String),
}

impl Provider {
    /// Returns the provider's lowercase name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Custom(name) => name,
        }
    }

    /// Token endpoint for built-in providers.
    #[must_use]
    pub const fn token_url(&self) -> Option<&'static str> {
        match self {
            Self::Google => Some(GOOGLE_TOKEN_URL),
            Self::Microsoft => Some(MICROSOFT_TOKEN_URL),
            Self::Custom(_) => None,
        }
    }

    /// Returns true for providers with a built-in refresh endpoint.
    #[must_use]
    pub const fn is_builtin(&self) -> bool {
        self.token_url().is_some()
    }
}

impl FromStr for Provider {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Ok(match name.as_str() {
            "google" | "gmail" => Self::Google,
            "microsoft" | "outlook" | "office365" => Self::Microsoft,
            _ => Self::Custom(name),
        })
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Provider {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Provider {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        let Ok(provider) = name.parse::<Self>();
        Ok(provider)
    }
}
