//! Cart Store: single source of truth for the in-memory cart.
//!
//! [`CartStore`] holds the aggregate, the updating set (lines awaiting a
//! round-trip) and the adding set (SKUs awaiting an add). Its transitions are
//! pure and synchronous; only [`StoreHandle`] adds sharing and change
//! notification.
//!
//! Callers read through selectors and mutate only through the transitions;
//! nothing outside this module writes cart fields directly.

use std::collections::BTreeSet;
use std::sync::Arc;

use cart_sync_core::{Cart, CartLine, LineId, ShippingPolicy, Sku};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::watch;

// =============================================================================
// CartStore
// =============================================================================

/// The cart aggregate plus its busy-state sets.
#[derive(Debug, Clone)]
pub struct CartStore {
    cart: Cart,
    loaded: bool,
    updating: BTreeSet<LineId>,
    adding: BTreeSet<Sku>,
    policy: ShippingPolicy,
    version: u64,
}

impl CartStore {
    /// Empty, not-yet-loaded store.
    #[must_use]
    pub fn new(policy: ShippingPolicy) -> Self {
        Self {
            cart: Cart::empty(),
            loaded: false,
            updating: BTreeSet::new(),
            adding: BTreeSet::new(),
            policy,
            version: 0,
        }
    }

    /// The current cart.
    #[must_use]
    pub const fn cart(&self) -> &Cart {
        &self.cart
    }

    /// Whether any cart data (server or mirrored) has been loaded.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// The shipping policy used for recomputation.
    #[must_use]
    pub const fn policy(&self) -> &ShippingPolicy {
        &self.policy
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Set a line's quantity and recompute totals. Never fails.
    ///
    /// Returns the previous quantity, or `None` if the line is unknown.
    pub fn apply_optimistic(&mut self, line_id: &LineId, quantity: u32) -> Option<u32> {
        let previous = self.cart.set_quantity(line_id, quantity, &self.policy);
        if previous.is_some() {
            self.touch();
        }
        previous
    }

    /// Replace the aggregate with the server's version.
    ///
    /// Selection flags are captured by line id and re-applied onto matching
    /// incoming lines; unseen lines default to selected. A line the server
    /// sends without a stock figure keeps the one already cached. Totals are
    /// recomputed from the incoming lines.
    pub fn reconcile(&mut self, mut server: Cart) {
        for line in &mut server.lines {
            let existing = self.cart.line(&line.id);
            line.is_selected = existing.is_none_or(|l| l.is_selected);
            if line.available_stock.is_none() {
                line.available_stock = existing.and_then(|l| l.available_stock);
            }
        }
        server.recompute(&self.policy);

        self.updating.retain(|id| server.line(id).is_some());
        self.cart = server;
        self.loaded = true;
        self.touch();
    }

    /// Restore a line's captured prior quantity.
    pub fn rollback(&mut self, line_id: &LineId, previous: u32) {
        self.apply_optimistic(line_id, previous);
    }

    /// Mark a line as awaiting a server round-trip.
    pub fn mark_updating(&mut self, line_id: &LineId) {
        if self.updating.insert(line_id.clone()) {
            self.touch();
        }
    }

    /// Clear a line's busy state.
    pub fn clear_updating(&mut self, line_id: &LineId) {
        if self.updating.remove(line_id) {
            self.touch();
        }
    }

    /// Mark a SKU as being added.
    pub fn mark_adding(&mut self, sku: &Sku) {
        if self.adding.insert(sku.clone()) {
            self.touch();
        }
    }

    /// Clear a SKU's adding state.
    pub fn clear_adding(&mut self, sku: &Sku) {
        if self.adding.remove(sku) {
            self.touch();
        }
    }

    /// Select or deselect one line. Returns `false` if the line is unknown.
    pub fn set_selected(&mut self, line_id: &LineId, selected: bool) -> bool {
        let Some(line) = self.cart.line_mut(line_id) else {
            return false;
        };
        if line.is_selected != selected {
            line.is_selected = selected;
            self.touch();
        }
        true
    }

    /// Select or deselect every line.
    pub fn select_all(&mut self, selected: bool) {
        for line in &mut self.cart.lines {
            line.is_selected = selected;
        }
        self.touch();
    }

    /// Push an authoritative stock figure into a line.
    ///
    /// Returns whether the cached figure changed.
    pub fn set_available_stock(&mut self, line_id: &LineId, stock: u32) -> bool {
        let Some(line) = self.cart.line_mut(line_id) else {
            return false;
        };
        if line.available_stock == Some(stock) {
            return false;
        }
        line.available_stock = Some(stock);
        self.touch();
        true
    }

    /// Seed the store from a mirrored cart without marking it authoritative.
    pub fn restore(&mut self, mut cart: Cart) {
        cart.recompute(&self.policy);
        self.cart = cart;
        self.loaded = true;
        self.touch();
    }

    /// Drop all state (used on teardown).
    pub fn reset(&mut self) {
        self.cart = Cart::empty();
        self.loaded = false;
        self.updating.clear();
        self.adding.clear();
        self.touch();
    }

    const fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    // -------------------------------------------------------------------------
    // Selectors
    // -------------------------------------------------------------------------

    /// Clamp a requested quantity into `1..=stock_limit`.
    ///
    /// Returns `None` for an unknown line. A line with no stock clamps to 1;
    /// removal is always an explicit intent.
    #[must_use]
    pub fn clamp_quantity(&self, line_id: &LineId, requested: u32) -> Option<u32> {
        let line = self.cart.line(line_id)?;
        Some(requested.min(line.stock_limit()).max(1))
    }

    /// Look up a line.
    #[must_use]
    pub fn line(&self, line_id: &LineId) -> Option<&CartLine> {
        self.cart.line(line_id)
    }

    /// Total number of units.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.cart.item_count()
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.cart.lines.len()
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cart.is_empty()
    }

    /// `Σ(price × quantity)`.
    #[must_use]
    pub const fn subtotal(&self) -> Decimal {
        self.cart.subtotal
    }

    /// `subtotal + shipping − discount`.
    #[must_use]
    pub const fn total(&self) -> Decimal {
        self.cart.total_price
    }

    /// How much more must be spent for free shipping.
    #[must_use]
    pub fn free_shipping_remaining(&self) -> Decimal {
        self.policy.remaining_for_free_shipping(self.cart.subtotal)
    }

    /// Whether the subtotal has reached the free-shipping threshold.
    #[must_use]
    pub fn qualifies_for_free_shipping(&self) -> bool {
        self.free_shipping_remaining().is_zero()
    }

    /// Whether a line is awaiting a round-trip.
    #[must_use]
    pub fn is_updating(&self, line_id: &LineId) -> bool {
        self.updating.contains(line_id)
    }

    /// Whether a SKU is being added.
    #[must_use]
    pub fn is_adding(&self, sku: &Sku) -> bool {
        self.adding.contains(sku)
    }

    /// Selected lines, in display order.
    pub fn selected_lines(&self) -> impl Iterator<Item = &CartLine> {
        self.cart.lines.iter().filter(|l| l.is_selected)
    }

    /// Subtotal of the selected lines only.
    #[must_use]
    pub fn selected_subtotal(&self) -> Decimal {
        self.selected_lines().map(CartLine::line_total).sum()
    }

    /// Units across the selected lines.
    #[must_use]
    pub fn selected_count(&self) -> u32 {
        self.selected_lines().map(|l| l.quantity).sum()
    }

    /// Whether every line is selected (false for an empty cart).
    #[must_use]
    pub fn all_selected(&self) -> bool {
        !self.cart.is_empty() && self.cart.lines.iter().all(|l| l.is_selected)
    }

    /// Immutable view for subscribers.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            cart: self.cart.clone(),
            loaded: self.loaded,
            updating: self.updating.clone(),
            adding: self.adding.clone(),
            version: self.version,
        }
    }
}

/// Point-in-time view of the store, published after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartSnapshot {
    /// The cart.
    pub cart: Cart,
    /// Whether any cart data has been loaded.
    pub loaded: bool,
    /// Lines awaiting a round-trip.
    pub updating: BTreeSet<LineId>,
    /// SKUs awaiting an add.
    pub adding: BTreeSet<Sku>,
    /// Incremented on every mutation.
    pub version: u64,
}

impl CartSnapshot {
    /// Whether a line is awaiting a round-trip.
    #[must_use]
    pub fn is_updating(&self, line_id: &LineId) -> bool {
        self.updating.contains(line_id)
    }
}

// =============================================================================
// StoreHandle
// =============================================================================

/// Shared, observable handle to a [`CartStore`].
///
/// Cheap to clone. The lock is never held across an await point.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    store: Mutex<CartStore>,
    changes: watch::Sender<CartSnapshot>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("store", &*self.inner.store.lock())
            .finish()
    }
}

impl StoreHandle {
    /// Wrap a fresh store.
    #[must_use]
    pub fn new(policy: ShippingPolicy) -> Self {
        let store = CartStore::new(policy);
        let (changes, _) = watch::channel(store.snapshot());
        Self {
            inner: Arc::new(StoreInner {
                store: Mutex::new(store),
                changes,
            }),
        }
    }

    /// Read through the store.
    pub fn read<R>(&self, f: impl FnOnce(&CartStore) -> R) -> R {
        f(&self.inner.store.lock())
    }

    /// Mutate the store and publish a snapshot if anything changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut CartStore) -> R) -> R {
        let mut store = self.inner.store.lock();
        let before = store.version;
        let result = f(&mut store);
        if store.version != before {
            self.inner.changes.send_replace(store.snapshot());
        }
        result
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.read(CartStore::snapshot)
    }

    /// Observe store changes.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.changes.subscribe(),
        }
    }
}

/// A live subscription to store changes.
///
/// Dropping it or calling [`Subscription::unsubscribe`] stops delivery.
#[derive(Debug)]
pub struct Subscription {
    receiver: watch::Receiver<CartSnapshot>,
}

impl Subscription {
    /// Wait for the next change and return the latest snapshot.
    ///
    /// Intermediate snapshots published while the caller was busy are
    /// skipped. Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<CartSnapshot> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Latest snapshot, without waiting.
    #[must_use]
    pub fn current(&self) -> CartSnapshot {
        self.receiver.borrow().clone()
    }

    /// Stop receiving changes.
    pub fn unsubscribe(self) {
        drop(self);
    }
}
