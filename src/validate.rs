//! Request validation.
//!
//! Bound request types implement [`Validate`] and express their constraints
//! with the rule helpers in this module:
//!
//! ```rust
//! use serde::Deserialize;
//! use sprig::validate::{self, Validate, ValidationError};
//!
//! #[derive(Deserialize)]
//! struct EchoRequest {
//!     #[serde(default)]
//!     str: String,
//! }
//!
//! impl Validate for EchoRequest {
//!     fn validate(&self) -> Result<(), ValidationError> {
//!         validate::required("str", &self.str)?;
//!         validate::len("str", &self.str, 4)
//!     }
//! }
//!
//! assert!(EchoRequest { str: "abcd".into() }.validate().is_ok());
//! assert!(EchoRequest { str: "ab".into() }.validate().is_err());
//! ```

use std::fmt::Display;

use serde::Serialize;

/// A field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// Constraints checked after a request has been decoded.
///
/// The default accepts everything, so types without constraints only need
/// an empty `impl Validate for T {}`.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl<T: Validate + ?Sized> Validate for Box<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        (**self).validate()
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> Result<(), ValidationError> {
        self.as_ref().map_or(Ok(()), Validate::validate)
    }
}

/// Non-empty string.
pub fn required(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(field, "is required"));
    }
    Ok(())
}

/// Exactly `n` characters.
pub fn len(field: &str, value: &str, n: usize) -> Result<(), ValidationError> {
    let actual = value.chars().count();
    if actual != n {
        return Err(ValidationError::new(field, format!("length must be {n}, got {actual}")));
    }
    Ok(())
}

/// At least `n` characters.
pub fn min_len(field: &str, value: &str, n: usize) -> Result<(), ValidationError> {
    if value.chars().count() < n {
        return Err(ValidationError::new(field, format!("length must be at least {n}")));
    }
    Ok(())
}

/// At most `n` characters.
pub fn max_len(field: &str, value: &str, n: usize) -> Result<(), ValidationError> {
    if value.chars().count() > n {
        return Err(ValidationError::new(field, format!("length must be at most {n}")));
    }
    Ok(())
}

/// `min <= value <= max`.
pub fn range<T: PartialOrd + Display>(field: &str, value: T, min: T, max: T) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::new(field, format!("must be between {min} and {max}, got {value}")));
    }
    Ok(())
}

/// One of the listed values.
pub fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), ValidationError> {
    if !allowed.contains(&value) {
        return Err(ValidationError::new(field, format!("must be one of {}", allowed.join(", "))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_counts_characters_not_bytes() {
        assert!(len("s", "äöü!", 4).is_ok());
        assert_eq!(
            len("s", "ab", 4).unwrap_err(),
            ValidationError::new("s", "length must be 4, got 2")
        );
    }

    #[test]
    fn bounds_and_membership() {
        assert!(min_len("s", "abc", 3).is_ok());
        assert!(max_len("s", "abcd", 3).is_err());
        assert!(range("age", 17, 18, 130).is_err());
        assert!(range("age", 30, 18, 130).is_ok());
        assert!(one_of("color", "red", &["red", "blue"]).is_ok());
        assert!(one_of("color", "green", &["red", "blue"]).is_err());
        assert!(required("name", "").is_err());
    }
}
