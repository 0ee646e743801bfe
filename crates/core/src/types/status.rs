//! Status enums for cart entities.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a cart, as reported by the cart backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CartStatus {
    /// Cart is being shopped.
    #[default]
    Active,
    /// Cart was left without checking out.
    Abandoned,
    /// Cart was converted into an order.
    CheckedOut,
    /// Guest cart that has been merged into a user's cart.
    Merged,
}

impl CartStatus {
    /// Whether the cart can still be mutated.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::Abandoned)
    }
}

impl std::fmt::Display for CartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Abandoned => write!(f, "abandoned"),
            Self::CheckedOut => write!(f, "checkedOut"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

impl std::str::FromStr for CartStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "abandoned" => Ok(Self::Abandoned),
            "checkedOut" => Ok(Self::CheckedOut),
            "merged" => Ok(Self::Merged),
            _ => Err(format!("invalid cart status: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_status_round_trip_through_display() {
        for status in [
            CartStatus::Active,
            CartStatus::Abandoned,
            CartStatus::CheckedOut,
            CartStatus::Merged,
        ] {
            assert_eq!(status.to_string().parse::<CartStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_cart_status_serde_camel_case() {
        let json = serde_json::to_string(&CartStatus::CheckedOut).unwrap();
        assert_eq!(json, "\"checkedOut\"");
    }

    #[test]
    fn test_is_open() {
        assert!(CartStatus::Active.is_open());
        assert!(!CartStatus::CheckedOut.is_open());
        assert!(!CartStatus::Merged.is_open());
    }
}
