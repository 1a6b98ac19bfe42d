//! Identifier validator.
//!
//! Database, sink and test names as well as result column names must match
//! `[a-zA-Z][a-zA-Z0-9]*` over the whole string. Column names end up as tag
//! keys and inside generated INSERT statements.

use crate::errors::AppError;

/// Validates names against the identifier grammar.
pub struct IdentifierValidator;

impl IdentifierValidator {
    /// Checks if `name` is a valid identifier.
    pub fn is_valid(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() => {
                chars.all(|c| c.is_ascii_alphanumeric())
            }
            _ => false,
        }
    }

    /// Validates a configuration name.
    ///
    /// # Errors
    /// Returns `AppError::InvalidIdentifier` naming the kind of entry.
    pub fn validate(kind: &'static str, name: &str) -> Result<(), AppError> {
        if Self::is_valid(name) {
            Ok(())
        } else {
            Err(AppError::InvalidIdentifier {
                kind,
                name: name.to_string(),
            })
        }
    }

    /// Validates a result column name.
    ///
    /// # Errors
    /// Returns `AppError::InvalidColumn` if the column name is unsafe.
    pub fn validate_column(name: &str) -> Result<(), AppError> {
        if Self::is_valid(name) {
            Ok(())
        } else {
            Err(AppError::InvalidColumn(name.to_string()))
        }
    }
}
