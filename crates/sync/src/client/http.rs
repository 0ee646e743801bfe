//! `reqwest` implementation of [`CartTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use cart_sync_core::{Cart, GuestSessionId, LineId, ProductId};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::types::{
    AddItemRequest, ApiEnvelope, CartPayload, MergeRequest, ProductStock, StockValidation,
    UpdateQuantityRequest,
};
use super::{CartTransport, TransportError};
use crate::config::ApiConfig;
use crate::session::SessionContext;

/// Longest body excerpt written to logs.
const LOG_BODY_LIMIT: usize = 500;

// =============================================================================
// HttpCartClient
// =============================================================================

/// HTTP client for the cart backend.
///
/// Cheap to clone; the session headers are attached to every request.
#[derive(Clone)]
pub struct HttpCartClient {
    inner: Arc<HttpCartClientInner>,
}

struct HttpCartClientInner {
    client: reqwest::Client,
    base_url: Url,
    session: SessionContext,
}

impl std::fmt::Debug for HttpCartClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCartClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("session", &self.inner.session)
            .finish_non_exhaustive()
    }
}

impl HttpCartClient {
    /// Create a new cart client.
    ///
    /// # Errors
    ///
    /// Returns an error if the session headers are invalid or the HTTP client
    /// fails to build.
    pub fn new(config: &ApiConfig, session: SessionContext) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .default_headers(session.headers()?)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpCartClientInner {
                client,
                base_url: config.base_url.clone(),
                session,
            }),
        })
    }

    /// The session this client presents.
    #[must_use]
    pub fn session(&self) -> &SessionContext {
        &self.inner.session
    }

    /// Build an endpoint URL from percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::Network("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, TransportError> {
        Ok(self.inner.client.request(method, self.endpoint(segments)?))
    }

    /// Send a request and decode the (possibly enveloped) response.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TransportError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        decode_body(status, &body)
    }

    /// Send a request expected to answer with a cart.
    async fn send_cart(&self, request: RequestBuilder) -> Result<Cart, TransportError> {
        let payload: CartPayload = self.send(request).await?;
        Cart::try_from(payload)
    }
}

#[async_trait]
impl CartTransport for HttpCartClient {
    #[instrument(skip(self))]
    async fn fetch_cart(&self) -> Result<Cart, TransportError> {
        let request = self.request(Method::GET, &["api", "cart"])?;
        self.send_cart(request).await
    }

    #[instrument(skip(self), fields(product_id = %request.product_id, sku = %request.sku))]
    async fn add_item(&self, request: &AddItemRequest) -> Result<Cart, TransportError> {
        let builder = self
            .request(Method::POST, &["api", "cart", "items"])?
            .json(request);
        self.send_cart(builder).await
    }

    #[instrument(skip(self), fields(line_id = %line_id))]
    async fn update_quantity(
        &self,
        line_id: &LineId,
        quantity: u32,
    ) -> Result<Cart, TransportError> {
        let builder = self
            .request(Method::PUT, &["api", "cart", "items", line_id.as_str()])?
            .json(&UpdateQuantityRequest { quantity });
        self.send_cart(builder).await
    }

    #[instrument(skip(self), fields(line_id = %line_id))]
    async fn remove_item(&self, line_id: &LineId) -> Result<Cart, TransportError> {
        let builder = self.request(Method::DELETE, &["api", "cart", "items", line_id.as_str()])?;
        self.send_cart(builder).await
    }

    #[instrument(skip(self))]
    async fn clear_cart(&self) -> Result<Cart, TransportError> {
        let builder = self.request(Method::DELETE, &["api", "cart"])?;
        self.send_cart(builder).await
    }

    #[instrument(skip(self, guest_session_id))]
    async fn merge_cart(&self, guest_session_id: &GuestSessionId) -> Result<Cart, TransportError> {
        let builder = self
            .request(Method::POST, &["api", "cart", "merge"])?
            .json(&MergeRequest {
                guest_session_id: guest_session_id.clone(),
            });
        self.send_cart(builder).await
    }

    #[instrument(skip(self))]
    async fn validate_stock(&self) -> Result<StockValidation, TransportError> {
        let builder = self.request(Method::GET, &["api", "cart", "validate-stock"])?;
        self.send(builder).await
    }

    #[instrument(skip(self, cancel), fields(product_id = %product_id))]
    async fn product_stock(
        &self,
        product_id: &ProductId,
        cancel: &CancellationToken,
    ) -> Result<ProductStock, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let builder = self.request(Method::GET, &["api", "products", product_id.as_str()])?;

        // Dropping the request future aborts the in-flight HTTP request.
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Stock lookup cancelled");
                Err(TransportError::Cancelled)
            }
            result = self.send::<ProductStock>(builder) => result,
        }
    }
}

// =============================================================================
// Response Decoding
// =============================================================================

/// Decode a response body.
///
/// Non-2xx bodies are parsed as `{success, message}` for the message. On 2xx,
/// an enveloped body (`{success, message, data}`) is unwrapped, and
/// `success:false` is treated exactly like a non-2xx failure. A bare body is
/// decoded directly.
fn decode_body<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, TransportError> {
    if !status.is_success() {
        let message = error_message(status, body);
        if status.is_server_error() {
            error!(status = %status, body = %excerpt(body), "Cart backend returned server error");
        } else {
            warn!(status = %status, message = %message, "Cart backend rejected request");
        }
        return Err(TransportError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        error!(error = %e, body = %excerpt(body), "Failed to parse cart backend response");
        TransportError::Decode(e.to_string())
    })?;

    let is_envelope = value
        .as_object()
        .is_some_and(|object| object.get("success").is_some_and(serde_json::Value::is_boolean));

    if !is_envelope {
        return serde_json::from_value(value).map_err(|e| TransportError::Decode(e.to_string()));
    }

    let envelope: ApiEnvelope<T> =
        serde_json::from_value(value).map_err(|e| TransportError::Decode(e.to_string()))?;

    if !envelope.success {
        let message = envelope
            .message
            .unwrap_or_else(|| "Request was not successful".to_string());
        warn!(status = %status, message = %message, "Cart backend reported failure");
        return Err(TransportError::Api {
            status: status.as_u16(),
            message,
        });
    }

    envelope
        .data
        .ok_or_else(|| TransportError::Decode("envelope has no data".to_string()))
}

/// Extract the human-readable message from a failure body.
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map(String::from)
        })
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map_or_else(|| format!("HTTP {}", status.as_u16()), String::from)
        })
}

fn excerpt(body: &str) -> String {
    body.chars().take(LOG_BODY_LIMIT).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::StockValidation;

    #[test]
    fn test_decode_bare_body() {
        let body = r#"{"isValid": true}"#;
        let result: StockValidation = decode_body(StatusCode::OK, body).unwrap();
        assert!(result.is_valid);
    }

    #[test]
    fn test_decode_envelope_success() {
        let body = r#"{"success": true, "data": {"isValid": false}}"#;
        let result: StockValidation = decode_body(StatusCode::OK, body).unwrap();
        assert!(!result.is_valid);
    }

    #[test]
    fn test_success_false_on_2xx_is_failure() {
        let body = r#"{"success": false, "message": "Only 2 left in stock"}"#;
        let err = decode_body::<StockValidation>(StatusCode::OK, body).unwrap_err();
        match err {
            TransportError::Api { status, message } => {
                assert_eq!(status, 200);
                assert_eq!(message, "Only 2 left in stock");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_2xx_message_is_extracted() {
        let body = r#"{"success": false, "message": "Quantity exceeds stock"}"#;
        let err = decode_body::<StockValidation>(StatusCode::CONFLICT, body).unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("Quantity exceeds stock"));
    }

    #[test]
    fn test_non_2xx_without_json_uses_reason() {
        let err =
            decode_body::<StockValidation>(StatusCode::BAD_GATEWAY, "<html>oops</html>").unwrap_err();
        assert!(matches!(
            err,
            TransportError::Api { status: 502, ref message } if message == "Bad Gateway"
        ));
    }

    #[test]
    fn test_invalid_json_is_decode_error() {
        let err = decode_body::<StockValidation>(StatusCode::OK, "not json").unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let config = ApiConfig::new("https://shop.test/store").unwrap();
        let client = HttpCartClient::new(
            &config,
            SessionContext::Guest(GuestSessionId::new("guest_1")),
        )
        .unwrap();
        let url = client.endpoint(&["api", "cart", "items", "a/b"]).unwrap();
        assert_eq!(url.as_str(), "https://shop.test/store/api/cart/items/a%2Fb");
    }
}
