//! Account management module.
//!
//! Provides account registration data and validation.

mod model;
mod validation;

pub use model::{Account, AccountRegistration};
pub use validation::{
    ValidationError, ValidationResult, validate_account_id, validate_registration,
};
