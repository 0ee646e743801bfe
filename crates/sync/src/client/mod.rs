//! Transport Client for the cart backend.
//!
//! # Architecture
//!
//! - [`CartTransport`] is the seam the engine depends on; [`HttpCartClient`]
//!   is the `reqwest` implementation
//! - Every request carries the [`SessionContext`](crate::session::SessionContext)
//!   headers (bearer credential or guest session id)
//! - Raw transport errors never reach the UI: every failure is a
//!   [`TransportError`] that normalizes into a [`Failure`]
//!
//! # Endpoints
//!
//! | Operation | Method & Path |
//! |---|---|
//! | Fetch cart | `GET /api/cart` |
//! | Add item | `POST /api/cart/items` |
//! | Update quantity | `PUT /api/cart/items/:itemId` |
//! | Remove item | `DELETE /api/cart/items/:itemId` |
//! | Clear cart | `DELETE /api/cart` |
//! | Merge guest cart | `POST /api/cart/merge` |
//! | Validate stock | `GET /api/cart/validate-stock` |
//! | Per-SKU stock | `GET /api/products/:id` (cancellable) |

mod http;
pub mod types;

pub use http::HttpCartClient;
pub use types::{
    AddItemRequest, ProductStock, SkuStock, StockCheck, StockValidation, UpdateQuantityRequest,
};

use async_trait::async_trait;
use cart_sync_core::{Cart, GuestSessionId, LineId, ProductId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::Failure;
use crate::session::SessionError;

/// Errors that can occur when talking to the cart backend.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Backend answered with a failure (non-2xx, or `success:false`).
    #[error("HTTP {status}: {message}")]
    Api {
        /// Response status.
        status: u16,
        /// Server-provided message.
        message: String,
    },

    /// No usable response (connect error, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("Invalid response: {0}")]
    Decode(String),

    /// The session could not be turned into request headers.
    #[error("Session error: {0}")]
    Session(String),

    /// Superseded by a newer request.
    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    /// HTTP status, when a response was received.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this is a cancellation rather than a genuine failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Normalize into `{kind, status, message}`.
    #[must_use]
    pub fn to_failure(&self) -> Failure {
        match self {
            Self::Api { status, message } => Failure::from_status(*status, message.clone()),
            Self::Network(message) | Self::Decode(message) | Self::Session(message) => {
                Failure::network(message.clone())
            }
            Self::Cancelled => Failure::cancelled(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<SessionError> for TransportError {
    fn from(err: SessionError) -> Self {
        Self::Session(err.to_string())
    }
}

impl From<TransportError> for Failure {
    fn from(err: TransportError) -> Self {
        err.to_failure()
    }
}

/// Cart operations against the authoritative backend.
///
/// Every mutating operation answers with the full, authoritative cart.
#[async_trait]
pub trait CartTransport: Send + Sync {
    /// `GET /api/cart`.
    async fn fetch_cart(&self) -> Result<Cart, TransportError>;

    /// `POST /api/cart/items`.
    async fn add_item(&self, request: &AddItemRequest) -> Result<Cart, TransportError>;

    /// `PUT /api/cart/items/:itemId`.
    async fn update_quantity(&self, line_id: &LineId, quantity: u32)
    -> Result<Cart, TransportError>;

    /// `DELETE /api/cart/items/:itemId`.
    async fn remove_item(&self, line_id: &LineId) -> Result<Cart, TransportError>;

    /// `DELETE /api/cart`.
    async fn clear_cart(&self) -> Result<Cart, TransportError>;

    /// `POST /api/cart/merge`.
    async fn merge_cart(&self, guest_session_id: &GuestSessionId)
    -> Result<Cart, TransportError>;

    /// `GET /api/cart/validate-stock`.
    async fn validate_stock(&self) -> Result<StockValidation, TransportError>;

    /// `GET /api/products/:id`, abandoned with [`TransportError::Cancelled`]
    /// as soon as `cancel` fires.
    async fn product_stock(
        &self,
        product_id: &ProductId,
        cancel: &CancellationToken,
    ) -> Result<ProductStock, TransportError>;
}
