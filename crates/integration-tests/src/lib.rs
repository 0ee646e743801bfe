//! Integration tests for the cart sync engine.
//!
//! [`MockCartBackend`] is an in-process axum server speaking the cart API on
//! an ephemeral port. Tests seed it, script failures and latency per route,
//! and inspect the requests it received.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cart-sync-integration-tests
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = MockCartBackend::start().await;
//! backend.seed_product("p1", &[("A1", 5)]);
//! backend.seed_item("l1", "p1", "A1", "10.00", 2);
//!
//! let engine = backend.engine();
//! engine.load().await.unwrap();
//! ```

#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing
)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use cart_sync::client::HttpCartClient;
use cart_sync::config::{ApiConfig, TimingConfig};
use cart_sync::session::GUEST_SESSION_HEADER;
use cart_sync::{CartTransport, SessionContext, SyncEngine};
use cart_sync_core::{GuestSessionId, ShippingPolicy};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Timings shortened so end-to-end tests finish quickly.
pub const FAST_TIMING: TimingConfig = TimingConfig {
    debounce: Duration::from_millis(60),
    error_ttl: Duration::from_millis(200),
    error_fade: Duration::from_millis(20),
    stock_notice: Duration::from_millis(400),
    stock_fade: Duration::from_millis(20),
};

/// Cart API route, for scripting and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    FetchCart,
    AddItem,
    UpdateItem,
    RemoveItem,
    ClearCart,
    Merge,
    ValidateStock,
    Product,
}

/// A request as seen by the backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub route: Route,
    pub authorization: Option<String>,
    pub session_id: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
struct MockItem {
    id: String,
    product_id: String,
    sku: String,
    price: Decimal,
    quantity: u32,
}

enum Scripted {
    Delay(Duration),
    Fail { status: u16, message: String },
    SoftFail { message: String },
}

#[derive(Default)]
struct MockState {
    items: Vec<MockItem>,
    guest_carts: HashMap<String, Vec<MockItem>>,
    products: HashMap<String, Vec<(String, u32)>>,
    scripts: HashMap<Route, VecDeque<Scripted>>,
    requests: Vec<RecordedRequest>,
    enveloped: bool,
    next_id: u32,
}

impl MockState {
    fn stock_for(&self, product_id: &str, sku: &str) -> u32 {
        self.products
            .get(product_id)
            .and_then(|skus| skus.iter().find(|(s, _)| s == sku))
            .map_or(0, |(_, stock)| *stock)
    }

    fn cart_json(&self) -> Value {
        let subtotal: Decimal = self
            .items
            .iter()
            .map(|i| i.price * Decimal::from(i.quantity))
            .sum();
        let items: Vec<Value> = self
            .items
            .iter()
            .map(|item| {
                json!({
                    "_id": item.id,
                    "productId": item.product_id,
                    "sku": item.sku,
                    "name": format!("Product {}", item.product_id),
                    "price": item.price.to_string(),
                    "quantity": item.quantity,
                    "availableStock": self.stock_for(&item.product_id, &item.sku),
                })
            })
            .collect();
        json!({
            "_id": "cart-1",
            "items": items,
            "subtotal": subtotal.to_string(),
            "shippingCost": "0",
            "tax": "0",
            "discount": "0",
            "totalPrice": subtotal.to_string(),
            "status": "active",
        })
    }

    fn wrap(&self, data: Value) -> Value {
        if self.enveloped {
            json!({ "success": true, "message": "OK", "data": data })
        } else {
            data
        }
    }
}

type Shared = Arc<Mutex<MockState>>;

/// In-process cart backend bound to `127.0.0.1` on an ephemeral port.
///
/// The server stops when the backend is dropped.
pub struct MockCartBackend {
    addr: SocketAddr,
    state: Shared,
    server: JoinHandle<()>,
}

impl Drop for MockCartBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl MockCartBackend {
    /// Start a backend with an empty cart.
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState {
            next_id: 100,
            ..MockState::default()
        }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = router(Arc::clone(&state));
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            addr,
            state,
            server,
        }
    }

    /// Base URL of the backend.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    /// Register a product and the stock of each of its SKUs.
    pub fn seed_product(&self, product_id: &str, skus: &[(&str, u32)]) {
        self.state.lock().products.insert(
            product_id.to_string(),
            skus.iter().map(|(s, n)| ((*s).to_string(), *n)).collect(),
        );
    }

    /// Put a line in the cart.
    pub fn seed_item(&self, id: &str, product_id: &str, sku: &str, price: &str, quantity: u32) {
        self.state.lock().items.push(MockItem {
            id: id.to_string(),
            product_id: product_id.to_string(),
            sku: sku.to_string(),
            price: Decimal::from_str(price).unwrap(),
            quantity,
        });
    }

    /// Put a line in a guest's cart (for merge).
    pub fn seed_guest_item(
        &self,
        guest_id: &str,
        product_id: &str,
        sku: &str,
        price: &str,
        quantity: u32,
    ) {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("g-{}", state.next_id);
        state
            .guest_carts
            .entry(guest_id.to_string())
            .or_default()
            .push(MockItem {
                id,
                product_id: product_id.to_string(),
                sku: sku.to_string(),
                price: Decimal::from_str(price).unwrap(),
                quantity,
            });
    }

    /// Change a SKU's stock.
    pub fn set_stock(&self, product_id: &str, sku: &str, stock: u32) {
        let mut state = self.state.lock();
        let skus = state.products.entry(product_id.to_string()).or_default();
        match skus.iter_mut().find(|(s, _)| s == sku) {
            Some(entry) => entry.1 = stock,
            None => skus.push((sku.to_string(), stock)),
        }
    }

    /// Answer with `{success, message, data}` envelopes instead of bare bodies.
    pub fn set_enveloped(&self, enveloped: bool) {
        self.state.lock().enveloped = enveloped;
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    /// Fail the next request on a route with a status and message.
    pub fn fail_next(&self, route: Route, status: u16, message: &str) {
        self.script(
            route,
            Scripted::Fail {
                status,
                message: message.to_string(),
            },
        );
    }

    /// Answer the next request on a route with `200 {success:false}`.
    pub fn soft_fail_next(&self, route: Route, message: &str) {
        self.script(
            route,
            Scripted::SoftFail {
                message: message.to_string(),
            },
        );
    }

    /// Delay the next request on a route.
    pub fn delay_next(&self, route: Route, delay: Duration) {
        self.script(route, Scripted::Delay(delay));
    }

    fn script(&self, route: Route, step: Scripted) {
        self.state
            .lock()
            .scripts
            .entry(route)
            .or_default()
            .push_back(step);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Requests received on one route.
    #[must_use]
    pub fn requests_to(&self, route: Route) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.route == route)
            .collect()
    }

    /// Server-side quantity of a line.
    #[must_use]
    pub fn quantity(&self, line_id: &str) -> Option<u32> {
        self.state
            .lock()
            .items
            .iter()
            .find(|i| i.id == line_id)
            .map(|i| i.quantity)
    }

    /// Number of lines in the server cart.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.state.lock().items.len()
    }

    // -------------------------------------------------------------------------
    // Clients
    // -------------------------------------------------------------------------

    /// API settings pointing at this backend.
    #[must_use]
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new(&self.base_url()).unwrap()
    }

    /// HTTP client with the given session.
    #[must_use]
    pub fn client(&self, session: SessionContext) -> HttpCartClient {
        HttpCartClient::new(&self.api_config(), session).unwrap()
    }

    /// HTTP client for a fresh guest session.
    #[must_use]
    pub fn guest_client(&self) -> HttpCartClient {
        self.client(SessionContext::Guest(GuestSessionId::generate()))
    }

    /// Engine over a guest client with shortened timings and no mirror.
    #[must_use]
    pub fn engine(&self) -> SyncEngine {
        SyncEngine::new(
            Arc::new(self.guest_client()) as Arc<dyn CartTransport>,
            FAST_TIMING,
            ShippingPolicy::default(),
            None,
        )
    }
}

// =============================================================================
// Routes
// =============================================================================

fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/cart", get(fetch_cart).delete(clear_cart))
        .route("/api/cart/items", post(add_item))
        .route("/api/cart/items/{id}", put(update_item).delete(remove_item))
        .route("/api/cart/merge", post(merge))
        .route("/api/cart/validate-stock", get(validate_stock))
        .route("/api/products/{id}", get(product))
        .with_state(state)
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}

/// Record the request and play its scripted steps.
///
/// Returns a response when a scripted failure short-circuits the handler.
async fn begin(
    state: &Shared,
    route: Route,
    headers: &HeaderMap,
    body: Option<Value>,
) -> Option<Response> {
    let step = {
        let mut state = state.lock();
        state.requests.push(RecordedRequest {
            route,
            authorization: header(headers, AUTHORIZATION.as_str()),
            session_id: header(headers, GUEST_SESSION_HEADER.as_str()),
            body,
        });
        state.scripts.get_mut(&route).and_then(VecDeque::pop_front)
    };

    match step? {
        Scripted::Delay(delay) => {
            tokio::time::sleep(delay).await;
            None
        }
        Scripted::Fail { status, message } => Some(failure(
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            &message,
        )),
        Scripted::SoftFail { message } => Some(failure(StatusCode::OK, &message)),
    }
}

fn cart_response(state: &Shared) -> Response {
    let state = state.lock();
    Json(state.wrap(state.cart_json())).into_response()
}

async fn fetch_cart(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(response) = begin(&state, Route::FetchCart, &headers, None).await {
        return response;
    }
    cart_response(&state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddBody {
    product_id: String,
    quantity: u32,
    sku: String,
}

async fn add_item(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(response) = begin(&state, Route::AddItem, &headers, Some(body.clone())).await {
        return response;
    }
    let Ok(add) = serde_json::from_value::<AddBody>(body) else {
        return failure(StatusCode::BAD_REQUEST, "Invalid request body");
    };

    {
        let mut guard = state.lock();
        let stock = guard.stock_for(&add.product_id, &add.sku);
        let held = guard
            .items
            .iter()
            .find(|i| i.product_id == add.product_id && i.sku == add.sku)
            .map_or(0, |i| i.quantity);
        if held + add.quantity > stock {
            return failure(
                StatusCode::CONFLICT,
                &format!("Only {stock} left in stock"),
            );
        }
        if let Some(item) = guard
            .items
            .iter_mut()
            .find(|i| i.product_id == add.product_id && i.sku == add.sku)
        {
            item.quantity += add.quantity;
        } else {
            guard.next_id += 1;
            let id = format!("line-{}", guard.next_id);
            guard.items.push(MockItem {
                id,
                product_id: add.product_id,
                sku: add.sku,
                price: Decimal::new(1000, 2),
                quantity: add.quantity,
            });
        }
    }
    cart_response(&state)
}

async fn update_item(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(response) = begin(&state, Route::UpdateItem, &headers, Some(body.clone())).await {
        return response;
    }
    let Some(quantity) = body
        .get("quantity")
        .and_then(Value::as_u64)
        .and_then(|q| u32::try_from(q).ok())
    else {
        return failure(StatusCode::BAD_REQUEST, "Invalid quantity");
    };

    {
        let mut guard = state.lock();
        let Some(index) = guard.items.iter().position(|i| i.id == id) else {
            return failure(StatusCode::NOT_FOUND, "Cart item not found");
        };
        let (product_id, sku) = {
            let item = &guard.items[index];
            (item.product_id.clone(), item.sku.clone())
        };
        let stock = guard.stock_for(&product_id, &sku);
        if quantity > stock {
            return failure(
                StatusCode::CONFLICT,
                &format!("Only {stock} left in stock"),
            );
        }
        guard.items[index].quantity = quantity;
    }
    cart_response(&state)
}

async fn remove_item(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(response) = begin(&state, Route::RemoveItem, &headers, None).await {
        return response;
    }
    state.lock().items.retain(|i| i.id != id);
    cart_response(&state)
}

async fn clear_cart(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(response) = begin(&state, Route::ClearCart, &headers, None).await {
        return response;
    }
    state.lock().items.clear();
    cart_response(&state)
}

async fn merge(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(response) = begin(&state, Route::Merge, &headers, Some(body.clone())).await {
        return response;
    }
    if header(&headers, AUTHORIZATION.as_str()).is_none() {
        return failure(StatusCode::UNAUTHORIZED, "Sign in to merge carts");
    }
    let Some(guest_id) = body.get("guestSessionId").and_then(Value::as_str) else {
        return failure(StatusCode::BAD_REQUEST, "guestSessionId is required");
    };

    {
        let mut guard = state.lock();
        let guest_items = guard.guest_carts.remove(guest_id).unwrap_or_default();
        for guest in guest_items {
            if let Some(item) = guard
                .items
                .iter_mut()
                .find(|i| i.product_id == guest.product_id && i.sku == guest.sku)
            {
                item.quantity += guest.quantity;
            } else {
                guard.items.push(guest);
            }
        }
    }
    cart_response(&state)
}

async fn validate_stock(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Some(response) = begin(&state, Route::ValidateStock, &headers, None).await {
        return response;
    }
    let guard = state.lock();
    let checks: Vec<(Value, u32, u32)> = guard
        .items
        .iter()
        .map(|item| {
            let stock = guard.stock_for(&item.product_id, &item.sku);
            let check = json!({
                "itemId": item.id,
                "productId": item.product_id,
                "sku": item.sku,
                "requestedQuantity": item.quantity,
                "availableStock": stock,
            });
            (check, item.quantity, stock)
        })
        .collect();

    let adjusted: Vec<&Value> = checks
        .iter()
        .filter(|(_, quantity, stock)| *stock > 0 && quantity > stock)
        .map(|(check, _, _)| check)
        .collect();
    let out_of_stock: Vec<&Value> = checks
        .iter()
        .filter(|(_, _, stock)| *stock == 0)
        .map(|(check, _, _)| check)
        .collect();
    let items: Vec<&Value> = checks.iter().map(|(check, _, _)| check).collect();

    let data = json!({
        "isValid": adjusted.is_empty() && out_of_stock.is_empty(),
        "items": items,
        "outOfStockItems": out_of_stock,
        "adjustedItems": adjusted,
    });
    Json(guard.wrap(data)).into_response()
}

async fn product(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(response) = begin(&state, Route::Product, &headers, None).await {
        return response;
    }
    let guard = state.lock();
    let Some(skus) = guard.products.get(&id) else {
        return failure(StatusCode::NOT_FOUND, "Product not found");
    };
    let skus: Vec<Value> = skus
        .iter()
        .map(|(sku, stock)| json!({ "sku": sku, "stockQuantity": stock }))
        .collect();
    // Product lookups are always enveloped.
    Json(json!({ "success": true, "data": { "_id": id, "skus": skus } })).into_response()
}
