//! The cart aggregate.
//!
//! A [`Cart`] is an ordered list of [`CartLine`]s plus totals. Totals are
//! always derived from the lines by [`Cart::recompute`]; a figure received
//! from the server is never trusted verbatim, because a response can be stale
//! relative to an optimistic edit made while it was in flight.
//!
//! Invariants after every transition:
//! - `subtotal == Σ(line.price × line.quantity)`
//! - `total_price == subtotal + shipping_cost − discount`

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{CartId, LineId, ProductId};
use super::price::{CurrencyCode, Price};
use super::sku::Sku;
use super::status::CartStatus;

/// Shipping rule applied when recomputing totals.
///
/// Orders at or above the threshold ship free; anything below pays a flat
/// rate. An empty cart has no shipping cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingPolicy {
    /// Subtotal at which shipping becomes free.
    pub free_shipping_threshold: Decimal,
    /// Shipping cost below the threshold.
    pub flat_rate: Decimal,
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        Self {
            free_shipping_threshold: Decimal::new(50, 0),
            flat_rate: Decimal::new(499, 2),
        }
    }
}

impl ShippingPolicy {
    /// Shipping cost for a given subtotal.
    #[must_use]
    pub fn shipping_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal.is_zero() || subtotal >= self.free_shipping_threshold {
            Decimal::ZERO
        } else {
            self.flat_rate
        }
    }

    /// How much more must be spent to reach free shipping (zero once reached).
    #[must_use]
    pub fn remaining_for_free_shipping(&self, subtotal: Decimal) -> Decimal {
        (self.free_shipping_threshold - subtotal).max(Decimal::ZERO)
    }
}

const fn selected_by_default() -> bool {
    true
}

/// A line item in the cart.
///
/// Identity is the server-issued `id`; `(product_id, sku)` is also unique
/// within a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Server-issued line ID.
    pub id: LineId,
    /// Product this line belongs to.
    pub product_id: ProductId,
    /// Purchased variant.
    pub sku: Sku,
    /// Display name.
    pub name: String,
    /// Image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Unit price, net of any applicable group discount.
    pub price: Decimal,
    /// Quantity.
    pub quantity: u32,
    /// Last-known authoritative stock for the SKU. Advisory only; may be
    /// stale. `None` until a figure has been reported for this line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_stock: Option<u32>,
    /// Client-only selection flag. Never sent to the server.
    #[serde(default = "selected_by_default")]
    pub is_selected: bool,
}

impl CartLine {
    /// `price × quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    /// Upper bound for local quantity edits.
    ///
    /// With no reported figure, nothing beyond what is already held is
    /// assumed; exceeding it triggers an authoritative revalidation.
    #[must_use]
    pub fn stock_limit(&self) -> u32 {
        self.available_stock.unwrap_or(self.quantity)
    }

    /// Whether the cached stock figure says the SKU can still be bought.
    #[must_use]
    pub fn is_in_stock(&self) -> bool {
        self.stock_limit() > 0
    }

    /// Whether the current quantity exceeds the cached stock figure.
    #[must_use]
    pub fn exceeds_stock(&self) -> bool {
        self.quantity > self.stock_limit()
    }

    /// Whether this line holds the given product variant.
    #[must_use]
    pub fn matches(&self, product_id: &ProductId, sku: &Sku) -> bool {
        &self.product_id == product_id && &self.sku == sku
    }
}

/// A shopping cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    /// Server-issued cart ID (absent before the first server round-trip).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CartId>,
    /// Cart lines, in display order.
    pub lines: Vec<CartLine>,
    /// `Σ(price × quantity)`.
    pub subtotal: Decimal,
    /// Derived from the shipping policy.
    pub shipping_cost: Decimal,
    /// Server-supplied tax (informational, not part of the total).
    pub tax: Decimal,
    /// Server-supplied discount.
    pub discount: Decimal,
    /// `subtotal + shipping_cost − discount`.
    pub total_price: Decimal,
    /// Lifecycle status.
    pub status: CartStatus,
    /// Currency of every amount in the cart.
    #[serde(default)]
    pub currency_code: CurrencyCode,
    /// Last server-side modification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Cart {
    fn default() -> Self {
        Self::empty()
    }
}

impl Cart {
    /// An empty, active cart with zero totals.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            id: None,
            lines: Vec::new(),
            subtotal: Decimal::ZERO,
            shipping_cost: Decimal::ZERO,
            tax: Decimal::ZERO,
            discount: Decimal::ZERO,
            total_price: Decimal::ZERO,
            status: CartStatus::Active,
            currency_code: CurrencyCode::USD,
            updated_at: None,
        }
    }

    /// Recompute every derived total from the current lines.
    ///
    /// Pure and idempotent: depends only on the lines, the carried discount,
    /// and the shipping policy.
    pub fn recompute(&mut self, policy: &ShippingPolicy) {
        self.subtotal = self.lines.iter().map(CartLine::line_total).sum();
        self.shipping_cost = policy.shipping_for(self.subtotal);
        self.total_price = self.subtotal + self.shipping_cost - self.discount;
    }

    /// Set a line's quantity and recompute totals.
    ///
    /// Returns the previous quantity, or `None` if no such line exists (in
    /// which case nothing changes).
    pub fn set_quantity(
        &mut self,
        line_id: &LineId,
        quantity: u32,
        policy: &ShippingPolicy,
    ) -> Option<u32> {
        let line = self.line_mut(line_id)?;
        let previous = std::mem::replace(&mut line.quantity, quantity);
        self.recompute(policy);
        Some(previous)
    }

    /// Look up a line by ID.
    #[must_use]
    pub fn line(&self, line_id: &LineId) -> Option<&CartLine> {
        self.lines.iter().find(|l| &l.id == line_id)
    }

    /// Look up a line by ID, mutably.
    pub fn line_mut(&mut self, line_id: &LineId) -> Option<&mut CartLine> {
        self.lines.iter_mut().find(|l| &l.id == line_id)
    }

    /// Look up a line by its `(product, sku)` identity.
    #[must_use]
    pub fn find_variant(&self, product_id: &ProductId, sku: &Sku) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.matches(product_id, sku))
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Wrap an amount in this cart's currency.
    #[must_use]
    pub const fn price(&self, amount: Decimal) -> Price {
        Price::new(amount, self.currency_code)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn line(id: &str, sku: &str, price: Decimal, quantity: u32, stock: u32) -> CartLine {
        CartLine {
            id: LineId::new(id),
            product_id: ProductId::new(format!("product-{id}")),
            sku: Sku::parse(sku).unwrap(),
            name: format!("Item {id}"),
            image_url: None,
            price,
            quantity,
            available_stock: Some(stock),
            is_selected: true,
        }
    }

    fn cart_with(lines: Vec<CartLine>) -> Cart {
        let mut cart = Cart {
            lines,
            ..Cart::empty()
        };
        cart.recompute(&ShippingPolicy::default());
        cart
    }

    #[test]
    fn test_recompute_subtotal_and_total() {
        let cart = cart_with(vec![
            line("1", "A1", Decimal::new(1000, 2), 2, 5),
            line("2", "B1", Decimal::new(550, 2), 1, 5),
        ]);
        assert_eq!(cart.subtotal, Decimal::new(2550, 2));
        assert_eq!(cart.shipping_cost, Decimal::new(499, 2));
        assert_eq!(cart.total_price, Decimal::new(3049, 2));
    }

    #[test]
    fn test_free_shipping_at_threshold() {
        let cart = cart_with(vec![line("1", "A1", Decimal::new(25, 0), 2, 5)]);
        assert_eq!(cart.subtotal, Decimal::new(50, 0));
        assert_eq!(cart.shipping_cost, Decimal::ZERO);
        assert_eq!(cart.total_price, Decimal::new(50, 0));
    }

    #[test]
    fn test_empty_cart_has_no_shipping() {
        let mut cart = Cart::empty();
        cart.recompute(&ShippingPolicy::default());
        assert_eq!(cart.shipping_cost, Decimal::ZERO);
        assert_eq!(cart.total_price, Decimal::ZERO);
    }

    #[test]
    fn test_discount_is_subtracted() {
        let mut cart = cart_with(vec![line("1", "A1", Decimal::new(60, 0), 1, 5)]);
        cart.discount = Decimal::new(10, 0);
        cart.recompute(&ShippingPolicy::default());
        assert_eq!(cart.total_price, Decimal::new(50, 0));
    }

    #[test]
    fn test_set_quantity_returns_previous() {
        let policy = ShippingPolicy::default();
        let mut cart = cart_with(vec![line("1", "A1", Decimal::new(10, 0), 2, 5)]);
        let prev = cart.set_quantity(&LineId::new("1"), 3, &policy);
        assert_eq!(prev, Some(2));
        assert_eq!(cart.subtotal, Decimal::new(30, 0));
    }

    #[test]
    fn test_set_quantity_unknown_line_is_noop() {
        let policy = ShippingPolicy::default();
        let mut cart = cart_with(vec![line("1", "A1", Decimal::new(10, 0), 2, 5)]);
        let before = cart.clone();
        assert_eq!(cart.set_quantity(&LineId::new("missing"), 9, &policy), None);
        assert_eq!(cart, before);
    }

    #[test]
    fn test_remaining_for_free_shipping() {
        let policy = ShippingPolicy::default();
        assert_eq!(
            policy.remaining_for_free_shipping(Decimal::new(30, 0)),
            Decimal::new(20, 0)
        );
        assert_eq!(
            policy.remaining_for_free_shipping(Decimal::new(80, 0)),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_line_selection_defaults_to_true_when_absent() {
        let json = r#"{
            "id": "l1", "productId": "p1", "sku": "A1", "name": "Tee",
            "price": "12.50", "quantity": 1, "availableStock": 3
        }"#;
        let line: CartLine = serde_json::from_str(json).unwrap();
        assert!(line.is_selected);
        assert_eq!(line.price, Decimal::new(1250, 2));
    }

    #[test]
    fn test_unreported_stock_limits_to_quantity() {
        let mut held = line("1", "A1", Decimal::ONE, 3, 10);
        assert_eq!(held.stock_limit(), 10);

        held.available_stock = None;
        assert_eq!(held.stock_limit(), 3);
        assert!(held.is_in_stock());
        assert!(!held.exceeds_stock());
    }

    #[test]
    fn test_find_variant() {
        let cart = cart_with(vec![line("1", "A1", Decimal::ONE, 1, 1)]);
        let found = cart.find_variant(&ProductId::new("product-1"), &Sku::parse("A1").unwrap());
        assert_eq!(found.map(|l| l.id.as_str()), Some("1"));
    }

    proptest! {
        #[test]
        fn prop_subtotal_never_drifts(
            prices in prop::collection::vec(1i64..100_000, 1..6),
            edits in prop::collection::vec((0usize..6, 0u32..50), 0..40),
        ) {
            let policy = ShippingPolicy::default();
            let lines = prices
                .iter()
                .enumerate()
                .map(|(i, cents)| line(&i.to_string(), &format!("S{i}"), Decimal::new(*cents, 2), 1, 50))
                .collect();
            let mut cart = cart_with(lines);

            for (index, quantity) in edits {
                let id = LineId::new((index % prices.len()).to_string());
                cart.set_quantity(&id, quantity, &policy);

                let expected: Decimal = cart
                    .lines
                    .iter()
                    .map(|l| l.price * Decimal::from(l.quantity))
                    .sum();
                prop_assert_eq!(cart.subtotal, expected);
                prop_assert_eq!(
                    cart.total_price,
                    cart.subtotal + cart.shipping_cost - cart.discount
                );
            }
        }
    }
}
