//! Test doubles and fixtures shared by the unit tests.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cart_sync_core::{
    Cart, CartId, CartLine, GuestSessionId, LineId, ProductId, ShippingPolicy, Sku,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::client::{
    AddItemRequest, CartTransport, ProductStock, SkuStock, StockCheck, StockValidation,
    TransportError,
};

// =============================================================================
// Fixtures
// =============================================================================

/// A line priced in cents, belonging to product `p-{id}`.
pub fn line(id: &str, sku: &str, cents: i64, quantity: u32, stock: u32) -> CartLine {
    CartLine {
        id: LineId::new(id),
        product_id: ProductId::new(format!("p-{id}")),
        sku: Sku::parse(sku).unwrap(),
        name: format!("Item {id}"),
        image_url: None,
        price: Decimal::new(cents, 2),
        quantity,
        available_stock: Some(stock),
        is_selected: true,
    }
}

/// A server-side cart with recomputed totals.
pub fn cart(lines: Vec<CartLine>) -> Cart {
    let mut cart = Cart {
        id: Some(CartId::new("cart-1")),
        lines,
        ..Cart::empty()
    };
    cart.recompute(&ShippingPolicy::default());
    cart
}

// =============================================================================
// FakeTransport
// =============================================================================

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fetch,
    Add(AddItemRequest),
    Update(LineId, u32),
    Remove(LineId),
    Clear,
    Merge(GuestSessionId),
    ValidateStock,
    ProductStock(ProductId),
}

/// Scriptable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Fetch,
    Add,
    Update,
    Remove,
    Clear,
    Merge,
    ValidateStock,
}

struct Step {
    delay: Duration,
    failure: Option<TransportError>,
}

struct FakeState {
    cart: Cart,
    scripts: HashMap<Op, VecDeque<Step>>,
    calls: Vec<Call>,
    stock: HashMap<String, u32>,
    stock_delay: Duration,
    validation: Option<StockValidation>,
    next_line: u32,
}

/// In-memory cart backend.
///
/// Each call pops the next scripted step for its operation (delay and
/// optional failure); unscripted calls succeed immediately. Mutations apply
/// to the server cart once the delay has elapsed.
pub struct FakeTransport {
    state: Mutex<FakeState>,
    cancelled: AtomicU32,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::with_cart(cart(vec![]))
    }

    pub fn with_cart(cart: Cart) -> Self {
        Self {
            state: Mutex::new(FakeState {
                cart,
                scripts: HashMap::new(),
                calls: Vec::new(),
                stock: HashMap::new(),
                stock_delay: Duration::ZERO,
                validation: None,
                next_line: 100,
            }),
            cancelled: AtomicU32::new(0),
        }
    }

    pub fn server_cart(&self) -> Cart {
        self.state.lock().cart.clone()
    }

    pub fn set_server_cart(&self, cart: Cart) {
        self.state.lock().cart = cart;
    }

    pub fn script(&self, op: Op, delay: Duration, failure: Option<TransportError>) {
        self.state
            .lock()
            .scripts
            .entry(op)
            .or_default()
            .push_back(Step { delay, failure });
    }

    pub fn fail_next(&self, op: Op, status: u16, message: &str) {
        self.script(
            op,
            Duration::ZERO,
            Some(TransportError::Api {
                status,
                message: message.to_string(),
            }),
        );
    }

    pub fn delay_next(&self, op: Op, delay: Duration) {
        self.script(op, delay, None);
    }

    /// Stock answered by the per-product lookup, captured when the call starts.
    pub fn set_stock(&self, sku: &str, stock: u32, delay: Duration) {
        let mut state = self.state.lock();
        state.stock.insert(sku.to_string(), stock);
        state.stock_delay = delay;
    }

    pub fn set_validation(&self, validation: StockValidation) {
        self.state.lock().validation = Some(validation);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn update_calls(&self) -> Vec<(LineId, u32)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(id, q) => Some((id, q)),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled_stock_lookups(&self) -> u32 {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Record the call and play its scripted step.
    async fn begin(&self, op: Op, call: Call) -> Result<(), TransportError> {
        let step = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.scripts.get_mut(&op).and_then(VecDeque::pop_front)
        };
        let Some(step) = step else {
            return Ok(());
        };
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.failure.map_or(Ok(()), Err)
    }

    fn mutate(&self, f: impl FnOnce(&mut FakeState)) -> Cart {
        let mut state = self.state.lock();
        f(&mut state);
        state.cart.recompute(&ShippingPolicy::default());
        state.cart.clone()
    }
}

fn not_found(message: &str) -> TransportError {
    TransportError::Api {
        status: 404,
        message: message.to_string(),
    }
}

#[async_trait]
impl CartTransport for FakeTransport {
    async fn fetch_cart(&self) -> Result<Cart, TransportError> {
        self.begin(Op::Fetch, Call::Fetch).await?;
        Ok(self.server_cart())
    }

    async fn add_item(&self, request: &AddItemRequest) -> Result<Cart, TransportError> {
        self.begin(Op::Add, Call::Add(request.clone())).await?;
        Ok(self.mutate(|state| {
            if let Some(existing) = state
                .cart
                .lines
                .iter_mut()
                .find(|l| l.matches(&request.product_id, &request.sku))
            {
                existing.quantity += request.quantity;
                return;
            }
            state.next_line += 1;
            let stock = state.stock.get(request.sku.as_str()).copied().unwrap_or(10);
            state.cart.lines.push(CartLine {
                id: LineId::new(format!("line-{}", state.next_line)),
                product_id: request.product_id.clone(),
                sku: request.sku.clone(),
                name: format!("Product {}", request.product_id),
                image_url: None,
                price: Decimal::new(10, 0),
                quantity: request.quantity,
                available_stock: Some(stock),
                is_selected: true,
            });
        }))
    }

    async fn update_quantity(
        &self,
        line_id: &LineId,
        quantity: u32,
    ) -> Result<Cart, TransportError> {
        self.begin(Op::Update, Call::Update(line_id.clone(), quantity))
            .await?;
        let mut found = false;
        let cart = self.mutate(|state| {
            if let Some(line) = state.cart.line_mut(line_id) {
                line.quantity = quantity;
                found = true;
            }
        });
        if found {
            Ok(cart)
        } else {
            Err(not_found("Cart item not found"))
        }
    }

    async fn remove_item(&self, line_id: &LineId) -> Result<Cart, TransportError> {
        self.begin(Op::Remove, Call::Remove(line_id.clone())).await?;
        Ok(self.mutate(|state| state.cart.lines.retain(|l| &l.id != line_id)))
    }

    async fn clear_cart(&self) -> Result<Cart, TransportError> {
        self.begin(Op::Clear, Call::Clear).await?;
        Ok(self.mutate(|state| state.cart.lines.clear()))
    }

    async fn merge_cart(&self, guest_session_id: &GuestSessionId) -> Result<Cart, TransportError> {
        self.begin(Op::Merge, Call::Merge(guest_session_id.clone()))
            .await?;
        Ok(self.server_cart())
    }

    async fn validate_stock(&self) -> Result<StockValidation, TransportError> {
        self.begin(Op::ValidateStock, Call::ValidateStock).await?;
        let state = self.state.lock();
        if let Some(validation) = &state.validation {
            return Ok(validation.clone());
        }
        let items: Vec<StockCheck> = state
            .cart
            .lines
            .iter()
            .map(|l| StockCheck {
                item_id: l.id.clone(),
                product_id: Some(l.product_id.clone()),
                sku: Some(l.sku.to_string()),
                requested_quantity: Some(l.quantity),
                available_stock: state
                    .stock
                    .get(l.sku.as_str())
                    .copied()
                    .unwrap_or_else(|| l.stock_limit()),
            })
            .collect();
        Ok(StockValidation {
            is_valid: items
                .iter()
                .all(|i| i.requested_quantity.unwrap_or(0) <= i.available_stock),
            items,
            out_of_stock_items: Vec::new(),
            adjusted_items: Vec::new(),
        })
    }

    async fn product_stock(
        &self,
        product_id: &ProductId,
        cancel: &CancellationToken,
    ) -> Result<ProductStock, TransportError> {
        let (skus, delay) = {
            let mut state = self.state.lock();
            state.calls.push(Call::ProductStock(product_id.clone()));
            let skus: Vec<SkuStock> = state
                .stock
                .iter()
                .map(|(sku, stock)| SkuStock {
                    sku: sku.clone(),
                    stock_quantity: *stock,
                })
                .collect();
            (skus, state.stock_delay)
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Cancelled)
            }
            () = tokio::time::sleep(delay) => {
                if skus.is_empty() {
                    Err(not_found("Product not found"))
                } else {
                    Ok(ProductStock {
                        id: product_id.clone(),
                        skus,
                    })
                }
            }
        }
    }
}
