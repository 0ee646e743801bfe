//! Wire types for the cart backend.
//!
//! Payloads are camelCase JSON. Identifiers may arrive as `id` or `_id`.
//! These types stay separate from the core [`Cart`] so the aggregate never
//! carries loosely-typed side-channel fields.

use cart_sync_core::{
    Cart, CartId, CartLine, CartStatus, CurrencyCode, GuestSessionId, LineId, ProductId, Sku,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TransportError;

// =============================================================================
// Envelope
// =============================================================================

/// Standard response envelope: `{success, message, data?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Human-readable message (always present on failure).
    #[serde(default)]
    pub message: Option<String>,
    /// Payload on success.
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

// =============================================================================
// Cart Payloads
// =============================================================================

/// A cart as sent by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartPayload {
    /// Cart ID.
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    /// Cart items.
    #[serde(default)]
    pub items: Vec<CartItemPayload>,
    /// Server-computed subtotal (ignored; recomputed locally).
    #[serde(default)]
    pub subtotal: Decimal,
    /// Server-computed shipping (ignored; derived from the shipping policy).
    #[serde(default)]
    pub shipping_cost: Decimal,
    /// Tax amount.
    #[serde(default)]
    pub tax: Decimal,
    /// Discount amount.
    #[serde(default)]
    pub discount: Decimal,
    /// Server-computed total (ignored; recomputed locally).
    #[serde(default)]
    pub total_price: Decimal,
    /// Lifecycle status.
    #[serde(default)]
    pub status: CartStatus,
    /// Currency code.
    #[serde(default)]
    pub currency: Option<CurrencyCode>,
    /// Last modification.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A cart item as sent by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemPayload {
    /// Line ID.
    #[serde(alias = "_id")]
    pub id: String,
    /// Product ID.
    pub product_id: String,
    /// Variant SKU.
    pub sku: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Image URL.
    #[serde(default)]
    pub image: Option<String>,
    /// Unit price (net of group discount).
    pub price: Decimal,
    /// Quantity.
    pub quantity: u32,
    /// Stock for the SKU, when the backend includes it.
    #[serde(default)]
    pub available_stock: Option<u32>,
}

impl TryFrom<CartItemPayload> for CartLine {
    type Error = TransportError;

    fn try_from(item: CartItemPayload) -> Result<Self, Self::Error> {
        let sku = Sku::parse(&item.sku)
            .map_err(|e| TransportError::Decode(format!("item {}: {e}", item.id)))?;

        Ok(Self {
            id: LineId::new(item.id),
            product_id: ProductId::new(item.product_id),
            sku,
            name: item.name,
            image_url: item.image,
            price: item.price,
            quantity: item.quantity,
            // Unreported stock stays unknown; the store keeps any figure it
            // already has for the line.
            available_stock: item.available_stock,
            is_selected: true,
        })
    }
}

impl TryFrom<CartPayload> for Cart {
    type Error = TransportError;

    /// Totals are copied as received; the store recomputes them on
    /// reconciliation.
    fn try_from(payload: CartPayload) -> Result<Self, Self::Error> {
        let lines = payload
            .items
            .into_iter()
            .map(CartLine::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: payload.id.map(CartId::new),
            lines,
            subtotal: payload.subtotal,
            shipping_cost: payload.shipping_cost,
            tax: payload.tax,
            discount: payload.discount,
            total_price: payload.total_price,
            status: payload.status,
            currency_code: payload.currency.unwrap_or_default(),
            updated_at: payload.updated_at,
        })
    }
}

impl From<&Cart> for CartPayload {
    fn from(cart: &Cart) -> Self {
        Self {
            id: cart.id.as_ref().map(ToString::to_string),
            items: cart
                .lines
                .iter()
                .map(|line| CartItemPayload {
                    id: line.id.to_string(),
                    product_id: line.product_id.to_string(),
                    sku: line.sku.to_string(),
                    name: line.name.clone(),
                    image: line.image_url.clone(),
                    price: line.price,
                    quantity: line.quantity,
                    available_stock: line.available_stock,
                })
                .collect(),
            subtotal: cart.subtotal,
            shipping_cost: cart.shipping_cost,
            tax: cart.tax,
            discount: cart.discount,
            total_price: cart.total_price,
            status: cart.status,
            currency: Some(cart.currency_code),
            updated_at: cart.updated_at,
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Body of `POST /api/cart/items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    /// Product to add.
    pub product_id: ProductId,
    /// Quantity to add.
    pub quantity: u32,
    /// Variant to add.
    pub sku: Sku,
}

/// Body of `PUT /api/cart/items/:itemId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateQuantityRequest {
    /// New quantity.
    pub quantity: u32,
}

/// Body of `POST /api/cart/merge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    /// Guest session whose cart is merged into the signed-in user's cart.
    pub guest_session_id: GuestSessionId,
}

// =============================================================================
// Stock
// =============================================================================

/// Result of `GET /api/cart/validate-stock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockValidation {
    /// Whether every line can be fulfilled as-is.
    pub is_valid: bool,
    /// Per-line stock status.
    #[serde(default)]
    pub items: Vec<StockCheck>,
    /// Lines whose SKU is out of stock.
    #[serde(default)]
    pub out_of_stock_items: Vec<StockCheck>,
    /// Lines whose quantity exceeds available stock.
    #[serde(default)]
    pub adjusted_items: Vec<StockCheck>,
}

impl StockValidation {
    /// Every stock figure in the result, later lists overriding earlier ones.
    pub fn stock_figures(&self) -> impl Iterator<Item = (&LineId, u32)> {
        self.items
            .iter()
            .chain(&self.adjusted_items)
            .chain(&self.out_of_stock_items)
            .map(|check| (&check.item_id, check.available_stock))
    }
}

/// Stock status of a single cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCheck {
    /// Cart line ID.
    #[serde(alias = "_id", alias = "id")]
    pub item_id: LineId,
    /// Product ID.
    #[serde(default)]
    pub product_id: Option<ProductId>,
    /// SKU.
    #[serde(default)]
    pub sku: Option<String>,
    /// Quantity currently in the cart.
    #[serde(default, alias = "quantity")]
    pub requested_quantity: Option<u32>,
    /// Authoritative stock.
    #[serde(alias = "stockQuantity")]
    pub available_stock: u32,
}

/// Product as returned by `GET /api/products/:id`, reduced to stock data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStock {
    /// Product ID.
    #[serde(alias = "_id")]
    pub id: ProductId,
    /// Per-SKU stock.
    #[serde(default)]
    pub skus: Vec<SkuStock>,
}

impl ProductStock {
    /// Stock for one SKU of this product.
    #[must_use]
    pub fn stock_for(&self, sku: &Sku) -> Option<u32> {
        self.skus
            .iter()
            .find(|s| s.sku == sku.as_str())
            .map(|s| s.stock_quantity)
    }
}

/// Stock of one SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuStock {
    /// SKU.
    pub sku: String,
    /// Units in stock.
    pub stock_quantity: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_payload_accepts_mongo_style_ids() {
        let json = r#"{
            "_id": "c1",
            "items": [{
                "_id": "l1", "productId": "p1", "sku": "A1", "name": "Tee",
                "price": 12.5, "quantity": 2, "availableStock": 5
            }],
            "subtotal": 25, "tax": 2, "discount": 0, "totalPrice": 27,
            "status": "active"
        }"#;
        let payload: CartPayload = serde_json::from_str(json).unwrap();
        let cart = Cart::try_from(payload).unwrap();

        assert_eq!(cart.id, Some(CartId::new("c1")));
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].available_stock, Some(5));
        assert_eq!(cart.lines[0].price, Decimal::new(125, 1));
        assert!(cart.lines[0].is_selected);
    }

    #[test]
    fn test_missing_stock_stays_unknown() {
        let item = CartItemPayload {
            id: "l1".to_string(),
            product_id: "p1".to_string(),
            sku: "A1".to_string(),
            name: String::new(),
            image: None,
            price: Decimal::ONE,
            quantity: 3,
            available_stock: None,
        };
        let line = CartLine::try_from(item).unwrap();
        assert_eq!(line.available_stock, None);
        assert_eq!(line.stock_limit(), 3);
    }

    #[test]
    fn test_invalid_sku_is_a_decode_error() {
        let item = CartItemPayload {
            id: "l1".to_string(),
            product_id: "p1".to_string(),
            sku: String::new(),
            name: String::new(),
            image: None,
            price: Decimal::ONE,
            quantity: 1,
            available_stock: None,
        };
        assert!(matches!(
            CartLine::try_from(item),
            Err(TransportError::Decode(_))
        ));
    }

    #[test]
    fn test_add_item_request_is_camel_case() {
        let request = AddItemRequest {
            product_id: ProductId::new("p1"),
            quantity: 2,
            sku: Sku::parse("A1").unwrap(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"productId": "p1", "quantity": 2, "sku": "A1"})
        );
    }

    #[test]
    fn test_product_stock_lookup() {
        let json = r#"{"_id": "p1", "skus": [
            {"sku": "A1", "stockQuantity": 4},
            {"sku": "B2", "stockQuantity": 0}
        ]}"#;
        let product: ProductStock = serde_json::from_str(json).unwrap();
        assert_eq!(product.stock_for(&Sku::parse("A1").unwrap()), Some(4));
        assert_eq!(product.stock_for(&Sku::parse("B2").unwrap()), Some(0));
        assert_eq!(product.stock_for(&Sku::parse("C3").unwrap()), None);
    }

    #[test]
    fn test_stock_validation_figures() {
        let json = r#"{
            "isValid": false,
            "items": [{"itemId": "l1", "availableStock": 5}],
            "outOfStockItems": [{"itemId": "l2", "stockQuantity": 0}],
            "adjustedItems": [{"itemId": "l1", "quantity": 7, "availableStock": 3}]
        }"#;
        let validation: StockValidation = serde_json::from_str(json).unwrap();
        let figures: Vec<_> = validation.stock_figures().collect();
        assert_eq!(figures.len(), 3);
        assert_eq!(figures[1], (&LineId::new("l1"), 3));
        assert_eq!(figures[2], (&LineId::new("l2"), 0));
    }
}
