//! Failure normalization and transient/fatal classification.
//!
//! Every Transport Client failure is normalized into a [`Failure`]
//! (`{kind, status, message}`) before the engine decides how to surface it.
//! Recovery is always local first (rollback); [`classify`] only decides how
//! loudly the failure is reported.

use serde::Serialize;

/// What went wrong, derived from the response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request rejected (4xx other than auth/conflict, or `success:false`).
    Validation,
    /// State conflict, e.g. requested quantity exceeds stock (409).
    Conflict,
    /// Missing or invalid credential (401/403).
    Auth,
    /// Backend failure (5xx).
    Server,
    /// No response at all (connect error, timeout, undecodable body).
    Network,
    /// Superseded by a newer request. Never an error.
    Cancelled,
}

impl FailureKind {
    /// Classify an HTTP status.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            409 => Self::Conflict,
            500..=599 => Self::Server,
            _ => Self::Validation,
        }
    }
}

/// A normalized failure: what the UI may see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// Human-readable message.
    pub message: String,
}

impl Failure {
    /// Failure for a received HTTP status.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Failure with no HTTP response.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Network,
            status: None,
            message: message.into(),
        }
    }

    /// A superseded request.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            status: None,
            message: "Request cancelled".to_string(),
        }
    }

    /// Whether this failure is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, FailureKind::Cancelled)
    }
}

/// How a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Not surfaced at all.
    Silent,
    /// Time-boxed inline message; never blocks further operations.
    Transient,
    /// Full-page failure with a manual retry.
    Fatal,
}

/// Which operation failed, as far as classification cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureContext {
    /// The initial cart fetch. `has_local_cart` says whether any cart data
    /// (in memory or mirrored) is available to show instead.
    InitialFetch {
        /// Whether local cart data exists.
        has_local_cart: bool,
    },
    /// Any other cart operation.
    Operation,
}

/// Decide how a failure is surfaced.
///
/// - cancellation is silent
/// - auth failures are transient, never fatal (guests may read a cart)
/// - any 5xx is fatal
/// - an initial fetch failure with no local cart is fatal
/// - everything else is transient
#[must_use]
pub const fn classify(failure: &Failure, context: FailureContext) -> Severity {
    match failure.kind {
        FailureKind::Cancelled => Severity::Silent,
        FailureKind::Auth => Severity::Transient,
        FailureKind::Server => Severity::Fatal,
        FailureKind::Validation | FailureKind::Conflict | FailureKind::Network => match context {
            FailureContext::InitialFetch {
                has_local_cart: false,
            } => Severity::Fatal,
            FailureContext::InitialFetch {
                has_local_cart: true,
            }
            | FailureContext::Operation => Severity::Transient,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_status() {
        assert_eq!(FailureKind::from_status(400), FailureKind::Validation);
        assert_eq!(FailureKind::from_status(401), FailureKind::Auth);
        assert_eq!(FailureKind::from_status(403), FailureKind::Auth);
        assert_eq!(FailureKind::from_status(409), FailureKind::Conflict);
        assert_eq!(FailureKind::from_status(429), FailureKind::Validation);
        assert_eq!(FailureKind::from_status(500), FailureKind::Server);
        assert_eq!(FailureKind::from_status(503), FailureKind::Server);
        // success:false on a 2xx is a validation failure
        assert_eq!(FailureKind::from_status(200), FailureKind::Validation);
    }

    #[test]
    fn test_conflict_is_transient() {
        let failure = Failure::from_status(409, "Only 5 left in stock");
        assert_eq!(
            classify(&failure, FailureContext::Operation),
            Severity::Transient
        );
    }

    #[test]
    fn test_server_error_is_fatal() {
        let failure = Failure::from_status(500, "Internal server error");
        assert_eq!(classify(&failure, FailureContext::Operation), Severity::Fatal);
    }

    #[test]
    fn test_auth_is_never_fatal() {
        let failure = Failure::from_status(401, "Unauthorized");
        assert_eq!(
            classify(
                &failure,
                FailureContext::InitialFetch {
                    has_local_cart: false
                }
            ),
            Severity::Transient
        );
    }

    #[test]
    fn test_initial_fetch_without_local_cart_is_fatal() {
        let failure = Failure::network("connection refused");
        assert_eq!(
            classify(
                &failure,
                FailureContext::InitialFetch {
                    has_local_cart: false
                }
            ),
            Severity::Fatal
        );
        assert_eq!(
            classify(
                &failure,
                FailureContext::InitialFetch {
                    has_local_cart: true
                }
            ),
            Severity::Transient
        );
    }

    #[test]
    fn test_cancellation_is_silent() {
        assert_eq!(
            classify(&Failure::cancelled(), FailureContext::Operation),
            Severity::Silent
        );
    }
}
