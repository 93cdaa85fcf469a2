//! Account validation.

use super::model::AccountRegistration;

/// Longest accepted account identifier.
const MAX_ACCOUNT_ID_LEN: usize = 128;

/// Validation error for account registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Account id is empty.
    EmptyAccountId,
    /// Account id cannot be used as a file name.
    InvalidAccountId,
    /// Client id is empty.
    EmptyClientId,
    /// Email address format is invalid.
    InvalidEmail,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptyAccountId => "Account id is required",
            Self::InvalidAccountId => {
                "Account id must not contain path separators, start with '.', or exceed 128 characters"
            }
            Self::EmptyClientId => "OAuth2 client id is required",
            Self::InvalidEmail => "Invalid email address format",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyAccountId | Self::InvalidAccountId => "account_id",
            Self::EmptyClientId => "client_id",
            Self::InvalidEmail => "user_email",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating an account.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Checks that an account id is usable as a storage key.
///
/// Ids become file names, so anything that could escape the token directory
/// or hide the file is refused.
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate_account_id(account_id: &str) -> Result<(), ValidationError> {
    if account_id.is_empty() {
        return Err(ValidationError::EmptyAccountId);
    }
    let bad_char = account_id
        .chars()
        .any(|c| matches!(c, '/' | '\\' | ':' | '\0') || c.is_control());
    if bad_char || account_id.starts_with('.') || account_id.len() > MAX_ACCOUNT_ID_LEN {
        return Err(ValidationError::InvalidAccountId);
    }
    Ok(())
}

/// Validate a registration before it is saved to configuration.
///
/// # Errors
///
/// Returns all validation errors found.
pub fn validate_registration(registration: &AccountRegistration) -> ValidationResult {
    let mut errors = Vec::new();

    if let Err(e) = validate_account_id(&registration.account_id) {
        errors.push(e);
    }

    if registration.client_id.trim().is_empty() {
        errors.push(ValidationError::EmptyClientId);
    }

    if !registration.user_email.is_empty() && !is_valid_email(&registration.user_email) {
        errors.push(ValidationError::InvalidEmail);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Basic email format check: one `@`, non-empty local part, dotted domain.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
