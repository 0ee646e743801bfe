//! Stock keeping unit type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Sku`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SkuError {
    /// The input string is empty (or only whitespace).
    #[error("sku cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("sku must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input contains whitespace or control characters.
    #[error("sku must not contain whitespace or control characters")]
    InvalidCharacter,
}

/// Identifier of one purchasable variant of a product (e.g. a color/size
/// combination).
///
/// ## Constraints
///
/// - Length: 1-64 characters
/// - No whitespace or control characters
///
/// ## Examples
///
/// ```
/// use cart_sync_core::Sku;
///
/// assert!(Sku::parse("A1").is_ok());
/// assert!(Sku::parse("TEE-BLK-XL").is_ok());
///
/// assert!(Sku::parse("").is_err());
/// assert!(Sku::parse("has space").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Sku(String);

impl Sku {
    /// Maximum length of a SKU.
    pub const MAX_LENGTH: usize = 64;

    /// Parse a `Sku` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, longer than 64 characters, or
    /// contains whitespace/control characters.
    pub fn parse(s: &str) -> Result<Self, SkuError> {
        if s.trim().is_empty() {
            return Err(SkuError::Empty);
        }

        if s.len() > Self::MAX_LENGTH {
            return Err(SkuError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(SkuError::InvalidCharacter);
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the SKU as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `Sku` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Sku {
    type Err = SkuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Sku {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_skus() {
        assert!(Sku::parse("A1").is_ok());
        assert!(Sku::parse("TEE-BLK-XL").is_ok());
        assert!(Sku::parse("sku_0001").is_ok());
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Sku::parse(""), Err(SkuError::Empty));
        assert_eq!(Sku::parse("   "), Err(SkuError::Empty));
    }

    #[test]
    fn test_parse_too_long() {
        let long = "X".repeat(Sku::MAX_LENGTH + 1);
        assert_eq!(
            Sku::parse(&long),
            Err(SkuError::TooLong {
                max: Sku::MAX_LENGTH
            })
        );
    }

    #[test]
    fn test_parse_whitespace() {
        assert_eq!(Sku::parse("A 1"), Err(SkuError::InvalidCharacter));
        assert_eq!(Sku::parse("A1\n"), Err(SkuError::InvalidCharacter));
    }

    #[test]
    fn test_from_str_and_display() {
        let sku: Sku = "A1".parse().unwrap();
        assert_eq!(sku.to_string(), "A1");
        assert_eq!(sku.as_ref(), "A1");
    }
}
