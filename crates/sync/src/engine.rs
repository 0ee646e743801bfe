//! Sync Engine: optimistic apply, reconcile, rollback.
//!
//! For a quantity change on line `L` to `q`:
//!
//! 1. The last-known-good quantity is captured before any mutation.
//! 2. `L` is marked updating and `q` is applied locally.
//! 3. The update is sent.
//! 4. On success the server cart is reconciled (selection preserved), `L`
//!    leaves the updating set and its standing error is cleared.
//! 5. On failure `L` is rolled back to the last-known-good quantity, leaves
//!    the updating set, and the failure is recorded and classified.
//!
//! Every issued update carries an engine-wide monotonic sequence number.
//! Only the latest update issued for a line may reconcile or roll back; an
//! older response is discarded, though a discarded success still advances
//! the line's last-known-good quantity.
//!
//! Add, remove, clear and merge are not optimistic: the line (or SKU) shows
//! as busy and the server response is applied directly.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use cart_sync_core::{Cart, GuestSessionId, LineId, ProductId, ShippingPolicy, Sku};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::client::{AddItemRequest, CartTransport, HttpCartClient, StockValidation, TransportError};
use crate::config::{SyncConfig, TimingConfig};
use crate::debounce::{CommitFn, DebouncedCommitQueue};
use crate::error::{Failure, FailureContext, Severity, classify};
use crate::mirror::{CartMirror, FileMirror};
use crate::notices::{ErrorCenter, FatalError};
use crate::session::{GuestIdStore, SessionContext};
use crate::stock::{StockMessage, StockNotice, StockRevalidator};
use crate::store::{CartSnapshot, StoreHandle, Subscription};
use crate::telemetry;

/// Breadcrumb category for cart intents.
const BREADCRUMB_CATEGORY: &str = "cart";

/// Outcome of a local quantity intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityIntent {
    /// Line the intent applies to.
    pub line_id: LineId,
    /// Quantity the caller asked for.
    pub requested: u32,
    /// Quantity applied locally and queued for commit.
    pub quantity: u32,
    /// Whether the request exceeded the cached stock figure.
    pub clamped: bool,
    /// Cached stock notice shown when clamped.
    pub notice: Option<StockNotice>,
}

/// Unconfirmed local state of one line.
#[derive(Debug, Clone, Copy)]
struct LineSync {
    /// Sequence of the latest update issued for the line (0: none yet).
    latest: u64,
    /// Quantity to restore on rollback.
    last_good: u32,
    /// Quantity the user last asked for.
    intended: u32,
}

#[derive(Debug, Default)]
struct LineTracker {
    next_seq: u64,
    lines: HashMap<LineId, LineSync>,
}

struct EngineInner {
    transport: Arc<dyn CartTransport>,
    store: StoreHandle,
    errors: ErrorCenter,
    debounce: DebouncedCommitQueue,
    stock: StockRevalidator,
    mirror: Option<Arc<dyn CartMirror>>,
    tracker: Mutex<LineTracker>,
}

/// Orchestrates the store, transport, debounce queue and stock revalidator.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.inner.store)
            .field("errors", &self.inner.errors)
            .field("debounce", &self.inner.debounce)
            .field("stock", &self.inner.stock)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine over a transport.
    #[must_use]
    pub fn new(
        transport: Arc<dyn CartTransport>,
        timing: TimingConfig,
        shipping: ShippingPolicy,
        mirror: Option<Arc<dyn CartMirror>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let store = StoreHandle::new(shipping);
            let committer = weak.clone();
            let commit: CommitFn = Arc::new(move |line_id, quantity| {
                let committer = committer.clone();
                Box::pin(async move {
                    let Some(inner) = committer.upgrade() else {
                        return;
                    };
                    // Failures are already recorded in the error center.
                    let _ = SyncEngine { inner }
                        .update_quantity(&line_id, quantity)
                        .await;
                })
            });

            EngineInner {
                stock: StockRevalidator::new(
                    Arc::clone(&transport),
                    store.clone(),
                    timing.stock_notice,
                    timing.stock_fade,
                ),
                transport,
                store,
                errors: ErrorCenter::new(timing.error_ttl, timing.error_fade),
                debounce: DebouncedCommitQueue::new(timing.debounce, commit),
                mirror,
                tracker: Mutex::new(LineTracker::default()),
            }
        });
        Self { inner }
    }

    /// Wire an engine against the configured backend.
    ///
    /// Establishes the session (bearer token or persisted guest id) and uses
    /// a file mirror when a state directory is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest id cannot be persisted or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &SyncConfig) -> Result<Self, TransportError> {
        let guest_ids = GuestIdStore::from_path(config.guest_id_path());
        let session = SessionContext::establish(config.api.token.clone(), &guest_ids)?;
        info!(authenticated = session.is_authenticated(), "Cart session established");

        let client = HttpCartClient::new(&config.api, session)?;
        let mirror = config
            .mirror_path()
            .map(|path| Arc::new(FileMirror::new(path)) as Arc<dyn CartMirror>);

        Ok(Self::new(
            Arc::new(client),
            config.timing,
            config.shipping,
            mirror,
        ))
    }

    // -------------------------------------------------------------------------
    // Read side
    // -------------------------------------------------------------------------

    /// The shared store.
    #[must_use]
    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    /// Surfaced errors.
    #[must_use]
    pub fn errors(&self) -> &ErrorCenter {
        &self.inner.errors
    }

    /// Current store snapshot.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.inner.store.snapshot()
    }

    /// Observe store changes.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.inner.store.subscribe()
    }

    /// Quantity waiting for the debounce window to close.
    #[must_use]
    pub fn pending_quantity(&self, line_id: &LineId) -> Option<u32> {
        self.inner.debounce.pending(line_id)
    }

    /// Stock notice attached to a line.
    #[must_use]
    pub fn stock_notice(&self, line_id: &LineId) -> Option<StockMessage> {
        self.inner.stock.notice(line_id)
    }

    /// The fatal error, if the view should be replaced by a retry prompt.
    #[must_use]
    pub fn fatal_error(&self) -> Option<FatalError> {
        self.inner.errors.fatal()
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Fetch the cart from the server.
    ///
    /// On failure with nothing in memory, the mirrored cart (if any) is shown
    /// instead; with no cart data at all the failure is fatal.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<(), Failure> {
        telemetry::add_breadcrumb(BREADCRUMB_CATEGORY, "Cart fetched", None);

        match self.inner.transport.fetch_cart().await {
            Ok(cart) => {
                self.reconcile(cart);
                self.inner.errors.clear_fatal();
                self.save_mirror().await;
                info!(lines = self.inner.store.read(|s| s.line_count()), "Cart loaded");
                Ok(())
            }
            Err(e) => {
                let failure = e.to_failure();
                let mut has_local_cart = self.inner.store.read(|s| s.is_loaded());
                if !has_local_cart && let Some(cart) = self.load_mirror().await {
                    info!("Showing mirrored cart after failed fetch");
                    self.inner.store.update(|s| s.restore(cart));
                    has_local_cart = true;
                }
                self.report(
                    None,
                    &failure,
                    FailureContext::InitialFetch { has_local_cart },
                    "fetch_cart",
                );
                Err(failure)
            }
        }
    }

    /// Clear the fatal error and fetch again.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    pub async fn retry(&self) -> Result<(), Failure> {
        self.inner.errors.clear_fatal();
        self.load().await
    }

    // -------------------------------------------------------------------------
    // Quantity
    // -------------------------------------------------------------------------

    /// Set a line's quantity locally and commit it once input quiesces.
    ///
    /// The value is clamped into `1..=stock_limit`; exceeding the cached
    /// stock shows a cached notice and starts a stock revalidation. Returns
    /// `None` for an unknown line. Must be called from within a tokio runtime.
    pub fn set_quantity(&self, line_id: &LineId, requested: u32) -> Option<QuantityIntent> {
        let (current, stock) = self
            .inner
            .store
            .read(|s| s.line(line_id).map(|l| (l.quantity, l.stock_limit())))?;
        let quantity = requested.min(stock).max(1);
        let clamped = requested > stock;

        let notice = if clamped {
            debug!(line_id = %line_id, requested, stock, "Quantity clamped to cached stock");
            self.inner.stock.revalidate(line_id)
        } else {
            None
        };

        if quantity != current {
            {
                let mut tracker = self.inner.tracker.lock();
                let sync = tracker.lines.entry(line_id.clone()).or_insert(LineSync {
                    latest: 0,
                    last_good: current,
                    intended: current,
                });
                sync.intended = quantity;
                self.inner.store.update(|s| {
                    s.mark_updating(line_id);
                    s.apply_optimistic(line_id, quantity);
                });
                self.inner.debounce.push(line_id, quantity);
            }
        }

        Some(QuantityIntent {
            line_id: line_id.clone(),
            requested,
            quantity,
            clamped,
            notice,
        })
    }

    /// Increase a line's quantity by one (debounced).
    pub fn increment(&self, line_id: &LineId) -> Option<QuantityIntent> {
        let current = self.inner.store.read(|s| s.line(line_id).map(|l| l.quantity))?;
        self.set_quantity(line_id, current.saturating_add(1))
    }

    /// Decrease a line's quantity by one, never below one (debounced).
    pub fn decrement(&self, line_id: &LineId) -> Option<QuantityIntent> {
        let current = self.inner.store.read(|s| s.line(line_id).map(|l| l.quantity))?;
        self.set_quantity(line_id, current.saturating_sub(1))
    }

    /// Commit a line's pending quantity now instead of waiting.
    pub async fn flush(&self, line_id: &LineId) -> bool {
        self.inner.debounce.flush(line_id).await
    }

    /// Commit every pending quantity now.
    pub async fn flush_all(&self) {
        self.inner.debounce.flush_all().await;
    }

    /// Send a quantity update immediately, bypassing the debounce window.
    ///
    /// A quantity of zero removes the line. A superseded response is
    /// discarded and reported as success.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure after rolling the line back.
    #[instrument(skip(self, line_id), fields(line_id = %line_id))]
    pub async fn update_quantity(&self, line_id: &LineId, quantity: u32) -> Result<(), Failure> {
        if quantity == 0 {
            return self.remove_item(line_id).await;
        }
        self.inner.debounce.cancel(line_id);

        let seq = {
            let mut tracker = self.inner.tracker.lock();
            let Some(current) = self
                .inner
                .store
                .read(|s| s.line(line_id).map(|l| l.quantity))
            else {
                tracker.lines.remove(line_id);
                debug!("Quantity update for unknown line ignored");
                return Ok(());
            };
            tracker.next_seq += 1;
            let seq = tracker.next_seq;
            let sync = tracker.lines.entry(line_id.clone()).or_insert(LineSync {
                latest: 0,
                last_good: current,
                intended: current,
            });
            sync.latest = seq;
            sync.intended = quantity;
            self.inner.store.update(|s| {
                s.mark_updating(line_id);
                s.apply_optimistic(line_id, quantity);
            });
            seq
        };

        let quantity_str = quantity.to_string();
        telemetry::add_breadcrumb(
            BREADCRUMB_CATEGORY,
            "Quantity update sent",
            Some(&[("line_id", line_id.as_str()), ("quantity", quantity_str.as_str())]),
        );

        let result = self.inner.transport.update_quantity(line_id, quantity).await;
        self.resolve_update(line_id, seq, result).await
    }

    async fn resolve_update(
        &self,
        line_id: &LineId,
        seq: u64,
        result: Result<Cart, TransportError>,
    ) -> Result<(), Failure> {
        let outcome = {
            let mut tracker = self.inner.tracker.lock();
            let pending = self.inner.debounce.pending(line_id).is_some();
            let Some(sync) = tracker.lines.get_mut(line_id) else {
                debug!(seq, "Response for settled line discarded");
                return Ok(());
            };

            if sync.latest != seq {
                if let Ok(cart) = &result
                    && let Some(line) = cart.line(line_id)
                {
                    sync.last_good = line.quantity;
                }
                debug!(seq, latest = sync.latest, "Superseded quantity response discarded");
                return Ok(());
            }

            match result {
                Ok(cart) => {
                    if pending {
                        if let Some(line) = cart.line(line_id) {
                            sync.last_good = line.quantity;
                        }
                    } else {
                        tracker.lines.remove(line_id);
                    }
                    self.reconcile_locked(&tracker, cart);
                    if !pending {
                        self.inner.store.update(|s| s.clear_updating(line_id));
                    }
                    Ok(())
                }
                Err(e) => {
                    if !pending {
                        let previous = sync.last_good;
                        tracker.lines.remove(line_id);
                        self.inner.store.update(|s| {
                            s.rollback(line_id, previous);
                            s.clear_updating(line_id);
                        });
                    }
                    Err(e.to_failure())
                }
            }
        };

        match outcome {
            Ok(()) => {
                self.inner.errors.clear_line(line_id);
                self.save_mirror().await;
                Ok(())
            }
            Err(failure) => {
                self.report(
                    Some(line_id),
                    &failure,
                    FailureContext::Operation,
                    "update_quantity",
                );
                Err(failure)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Non-optimistic operations
    // -------------------------------------------------------------------------

    /// Add a product variant to the cart.
    ///
    /// A repeated add for a SKU whose previous add is still in flight is
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    #[instrument(skip(self, product_id, sku), fields(product_id = %product_id, sku = %sku))]
    pub async fn add_item(
        &self,
        product_id: &ProductId,
        sku: &Sku,
        quantity: u32,
    ) -> Result<(), Failure> {
        let already_adding = self.inner.store.update(|s| {
            let adding = s.is_adding(sku);
            s.mark_adding(sku);
            adding
        });
        if already_adding {
            debug!("Add already in flight for SKU; ignoring repeat");
            return Ok(());
        }

        telemetry::add_breadcrumb(
            BREADCRUMB_CATEGORY,
            "Item added",
            Some(&[("product_id", product_id.as_str()), ("sku", sku.as_str())]),
        );

        let request = AddItemRequest {
            product_id: product_id.clone(),
            quantity: quantity.max(1),
            sku: sku.clone(),
        };
        let result = self.inner.transport.add_item(&request).await;
        self.inner.store.update(|s| s.clear_adding(sku));
        self.apply_server_cart(result, None, "add_item").await
    }

    /// Remove a line. Any pending quantity commit for it is dropped.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    #[instrument(skip(self, line_id), fields(line_id = %line_id))]
    pub async fn remove_item(&self, line_id: &LineId) -> Result<(), Failure> {
        self.inner.debounce.cancel(line_id);
        self.inner.store.update(|s| s.mark_updating(line_id));
        telemetry::add_breadcrumb(
            BREADCRUMB_CATEGORY,
            "Item removed",
            Some(&[("line_id", line_id.as_str())]),
        );

        let result = self.inner.transport.remove_item(line_id).await;
        if result.is_ok() {
            self.inner.tracker.lock().lines.remove(line_id);
            self.inner.stock.dismiss(line_id);
            self.inner.errors.clear_line(line_id);
        } else {
            self.settle_busy(line_id);
        }
        self.apply_server_cart(result, Some(line_id), "remove_item")
            .await
    }

    /// Remove every line.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> Result<(), Failure> {
        self.inner.debounce.clear();
        let line_ids: Vec<LineId> = self
            .inner
            .store
            .read(|s| s.cart().lines.iter().map(|l| l.id.clone()).collect());
        self.inner.store.update(|s| {
            for id in &line_ids {
                s.mark_updating(id);
            }
        });
        telemetry::add_breadcrumb(BREADCRUMB_CATEGORY, "Cart cleared", None);

        let result = self.inner.transport.clear_cart().await;
        if result.is_ok() {
            self.inner.tracker.lock().lines.clear();
            self.inner.stock.teardown();
        } else {
            for id in &line_ids {
                self.settle_busy(id);
            }
        }
        self.apply_server_cart(result, None, "clear_cart").await
    }

    /// Merge a guest cart into the signed-in user's cart.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    #[instrument(skip(self, guest_session_id))]
    pub async fn merge_guest_cart(&self, guest_session_id: &GuestSessionId) -> Result<(), Failure> {
        telemetry::add_breadcrumb(BREADCRUMB_CATEGORY, "Guest cart merged", None);
        let result = self.inner.transport.merge_cart(guest_session_id).await;
        self.apply_server_cart(result, None, "merge_cart").await
    }

    /// Validate every line against authoritative stock, pushing the figures
    /// into the matching lines.
    ///
    /// # Errors
    ///
    /// Returns the normalized failure.
    #[instrument(skip(self))]
    pub async fn validate_stock(&self) -> Result<StockValidation, Failure> {
        match self.inner.transport.validate_stock().await {
            Ok(validation) => {
                let changed = self.inner.store.update(|s| {
                    let mut changed = 0_usize;
                    for (line_id, stock) in validation.stock_figures() {
                        if s.set_available_stock(line_id, stock) {
                            changed += 1;
                        }
                    }
                    changed
                });
                info!(
                    is_valid = validation.is_valid,
                    changed, "Cart stock validated"
                );
                Ok(validation)
            }
            Err(e) => {
                let failure = e.to_failure();
                self.report(None, &failure, FailureContext::Operation, "validate_stock");
                Err(failure)
            }
        }
    }

    /// Re-check stock for one line, showing the cached notice immediately.
    pub fn revalidate_line(&self, line_id: &LineId) -> Option<StockNotice> {
        self.inner.stock.revalidate(line_id)
    }

    /// Select or deselect one line (client-only).
    pub fn set_selected(&self, line_id: &LineId, selected: bool) -> bool {
        self.inner.store.update(|s| s.set_selected(line_id, selected))
    }

    /// Select or deselect every line (client-only).
    pub fn select_all(&self, selected: bool) {
        self.inner.store.update(|s| s.select_all(selected));
    }

    /// Release every timer and pending commit.
    ///
    /// In-flight requests are left to complete; their responses no longer
    /// reconcile.
    pub fn teardown(&self) {
        self.inner.debounce.clear();
        self.inner.stock.teardown();
        self.inner.errors.clear();
        {
            let mut tracker = self.inner.tracker.lock();
            let dropped: Vec<LineId> = tracker.lines.drain().map(|(id, _)| id).collect();
            self.inner.store.update(|s| {
                for line_id in &dropped {
                    s.clear_updating(line_id);
                }
            });
        }
        debug!("Sync engine torn down");
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Reconcile a server cart, keeping unconfirmed quantities of other lines.
    fn reconcile(&self, cart: Cart) {
        let tracker = self.inner.tracker.lock();
        self.reconcile_locked(&tracker, cart);
    }

    /// Settled lines are no longer tracked, so every tracked line carries an
    /// unconfirmed quantity that must survive the server cart.
    fn reconcile_locked(&self, tracker: &LineTracker, cart: Cart) {
        self.inner.store.update(|s| {
            s.reconcile(cart);
            for (id, sync) in &tracker.lines {
                s.apply_optimistic(id, sync.intended);
            }
        });
    }

    /// Clear a line's busy state unless a quantity update still owns it.
    fn settle_busy(&self, line_id: &LineId) {
        let tracker = self.inner.tracker.lock();
        if !tracker.lines.contains_key(line_id) {
            self.inner.store.update(|s| s.clear_updating(line_id));
        }
    }

    async fn apply_server_cart(
        &self,
        result: Result<Cart, TransportError>,
        line_id: Option<&LineId>,
        operation: &str,
    ) -> Result<(), Failure> {
        match result {
            Ok(cart) => {
                self.reconcile(cart);
                self.save_mirror().await;
                Ok(())
            }
            Err(e) => {
                let failure = e.to_failure();
                self.report(line_id, &failure, FailureContext::Operation, operation);
                Err(failure)
            }
        }
    }

    /// Surface a failure according to its severity.
    fn report(
        &self,
        line_id: Option<&LineId>,
        failure: &Failure,
        context: FailureContext,
        operation: &str,
    ) -> Severity {
        let severity = classify(failure, context);
        match severity {
            Severity::Silent => {
                debug!(operation, "Cancelled request ignored");
            }
            Severity::Transient => {
                info!(
                    operation,
                    kind = ?failure.kind,
                    status = ?failure.status,
                    message = %failure.message,
                    "Cart operation failed"
                );
                self.inner.errors.push_transient(line_id.cloned(), failure);
            }
            Severity::Fatal => {
                if line_id.is_some() {
                    self.inner.errors.push_transient(line_id.cloned(), failure);
                }
                telemetry::capture_fatal(operation, failure);
                self.inner.errors.set_fatal(FatalError::from(failure));
            }
        }
        severity
    }

    async fn save_mirror(&self) {
        let Some(mirror) = &self.inner.mirror else {
            return;
        };
        let cart = self.inner.store.read(|s| s.cart().clone());
        if let Err(e) = mirror.save(&cart).await {
            warn!(error = %e, "Failed to refresh cart mirror");
        }
    }

    async fn load_mirror(&self) -> Option<Cart> {
        let mirror = self.inner.mirror.as_ref()?;
        match mirror.load().await {
            Ok(cart) => cart,
            Err(e) => {
                warn!(error = %e, "Failed to read cart mirror");
                None
            }
        }
    }
}
