//! Stock Revalidator.
//!
//! Triggered when a quantity is clamped to the cached stock figure:
//!
//! 1. A notice built from the cached figure is shown immediately.
//! 2. Any lookup already in flight for the line is cancelled.
//! 3. A fresh per-SKU lookup is issued.
//! 4. If the fresh figure differs, the notice is replaced and the figure is
//!    pushed back into the line.
//! 5. The notice hides after a fixed duration; its text is cleared only after
//!    an additional fade delay.
//!
//! One lookup is outstanding per line. Ordering is enforced by cancellation
//! plus a per-line generation, never by timestamps, so a superseded lookup
//! can never overwrite the notice of a newer one.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use cart_sync_core::{CartLine, LineId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{CartTransport, TransportError};
use crate::store::StoreHandle;
use crate::timer::ScheduledTask;

/// What the stock notice says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "remaining")]
pub enum StockNotice {
    /// A limited number of units remain.
    OnlyLeft(u32),
    /// Nothing remains.
    OutOfStock,
}

impl StockNotice {
    /// Notice for a stock figure.
    #[must_use]
    pub const fn for_stock(stock: u32) -> Self {
        if stock == 0 {
            Self::OutOfStock
        } else {
            Self::OnlyLeft(stock)
        }
    }
}

impl fmt::Display for StockNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnlyLeft(n) => write!(f, "Only {n} left"),
            Self::OutOfStock => write!(f, "Out of stock"),
        }
    }
}

/// Where the figure behind a notice came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeSource {
    /// The line's cached `available_stock`.
    Cached,
    /// A completed authoritative lookup.
    Fresh,
}

/// The notice currently attached to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockMessage {
    /// Notice text.
    pub notice: StockNotice,
    /// Figure provenance.
    pub source: NoticeSource,
    /// Cleared when the auto-hide fires; the text stays until the fade ends.
    pub visible: bool,
}

struct LineCheck {
    generation: u64,
    message: Option<StockMessage>,
    cancel: CancellationToken,
    lookup: Option<ScheduledTask>,
    hide: Option<ScheduledTask>,
}

type CheckMap = Mutex<HashMap<LineId, LineCheck>>;

/// Per-line stock re-checks with cancellation and auto-hiding notices.
#[derive(Clone)]
pub struct StockRevalidator {
    transport: Arc<dyn CartTransport>,
    store: StoreHandle,
    checks: Arc<CheckMap>,
    visible_for: Duration,
    fade: Duration,
}

impl fmt::Debug for StockRevalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StockRevalidator")
            .field("active", &self.checks.lock().len())
            .field("visible_for", &self.visible_for)
            .field("fade", &self.fade)
            .finish_non_exhaustive()
    }
}

impl StockRevalidator {
    /// Create a revalidator.
    #[must_use]
    pub fn new(
        transport: Arc<dyn CartTransport>,
        store: StoreHandle,
        visible_for: Duration,
        fade: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            checks: Arc::new(Mutex::new(HashMap::new())),
            visible_for,
            fade,
        }
    }

    /// Re-check stock for a line.
    ///
    /// Returns the cached notice shown immediately, or `None` if the line is
    /// unknown. The authoritative lookup completes in the background. Must be
    /// called from within a tokio runtime.
    pub fn revalidate(&self, line_id: &LineId) -> Option<StockNotice> {
        let line = self.store.read(|s| s.line(line_id).cloned())?;
        let cached = StockNotice::for_stock(line.stock_limit());

        let mut checks = self.checks.lock();
        let generation = checks.get(line_id).map_or(1, |c| c.generation.wrapping_add(1));
        if let Some(previous) = checks.get_mut(line_id) {
            previous.cancel.cancel();
            // The superseded lookup observes its token and exits on its own.
            if let Some(lookup) = previous.lookup.take() {
                lookup.detach();
            }
        }

        let cancel = CancellationToken::new();
        let lookup = ScheduledTask::after(
            Duration::ZERO,
            lookup_stock(
                Arc::clone(&self.transport),
                self.store.clone(),
                Arc::downgrade(&self.checks),
                line,
                generation,
                cancel.clone(),
            ),
        );
        let hide = ScheduledTask::after(
            self.visible_for,
            hide_notice(
                Arc::downgrade(&self.checks),
                line_id.clone(),
                generation,
                self.fade,
            ),
        );

        checks.insert(
            line_id.clone(),
            LineCheck {
                generation,
                message: Some(StockMessage {
                    notice: cached,
                    source: NoticeSource::Cached,
                    visible: true,
                }),
                cancel,
                lookup: Some(lookup),
                hide: Some(hide),
            },
        );
        debug!(line_id = %line_id, generation, notice = %cached, "Stock revalidation started");
        Some(cached)
    }

    /// The notice attached to a line.
    #[must_use]
    pub fn notice(&self, line_id: &LineId) -> Option<StockMessage> {
        self.checks.lock().get(line_id).and_then(|c| c.message)
    }

    /// Whether a lookup is outstanding for a line.
    #[must_use]
    pub fn is_checking(&self, line_id: &LineId) -> bool {
        self.checks
            .lock()
            .get(line_id)
            .is_some_and(|c| c.lookup.as_ref().is_some_and(|t| !t.is_finished()))
    }

    /// Drop a line's notice, cancelling its lookup and timers.
    pub fn dismiss(&self, line_id: &LineId) {
        if let Some(check) = self.checks.lock().remove(line_id) {
            check.cancel.cancel();
        }
    }

    /// Cancel every lookup and timer.
    pub fn teardown(&self) {
        for (_, check) in self.checks.lock().drain() {
            check.cancel.cancel();
        }
    }
}

/// Lookup body: applies the fresh figure unless superseded.
async fn lookup_stock(
    transport: Arc<dyn CartTransport>,
    store: StoreHandle,
    checks: Weak<CheckMap>,
    line: CartLine,
    generation: u64,
    cancel: CancellationToken,
) {
    let result = transport.product_stock(&line.product_id, &cancel).await;

    let Some(checks) = checks.upgrade() else {
        return;
    };
    let mut guard = checks.lock();
    let Some(check) = guard.get_mut(&line.id) else {
        return;
    };
    if check.generation != generation || cancel.is_cancelled() {
        debug!(line_id = %line.id, generation, "Superseded stock lookup discarded");
        return;
    }
    if let Some(own) = check.lookup.take() {
        own.detach();
    }

    let stock = match result {
        Ok(product) => product.stock_for(&line.sku),
        Err(TransportError::Cancelled) => return,
        Err(e) => {
            warn!(line_id = %line.id, error = %e, "Stock lookup failed; keeping cached notice");
            return;
        }
    };
    let Some(stock) = stock else {
        warn!(line_id = %line.id, sku = %line.sku, "SKU missing from product stock");
        return;
    };

    let fresh = StockNotice::for_stock(stock);
    if let Some(message) = check.message.as_mut() {
        if message.notice != fresh {
            debug!(line_id = %line.id, notice = %fresh, "Stock notice replaced by fresh figure");
        }
        message.notice = fresh;
        message.source = NoticeSource::Fresh;
    }
    drop(guard);

    store.update(|s| s.set_available_stock(&line.id, stock));
}

/// Auto-hide body: hides the notice, then clears its text after the fade.
async fn hide_notice(checks: Weak<CheckMap>, line_id: LineId, generation: u64, fade: Duration) {
    let Some(strong) = checks.upgrade() else {
        return;
    };
    let mut guard = strong.lock();
    let Some(check) = guard.get_mut(&line_id) else {
        return;
    };
    if check.generation != generation {
        return;
    }
    if let Some(message) = check.message.as_mut() {
        message.visible = false;
    }

    let clear = ScheduledTask::after(fade, async move {
        let Some(strong) = checks.upgrade() else {
            return;
        };
        let mut guard = strong.lock();
        let Some(check) = guard.get_mut(&line_id) else {
            return;
        };
        if check.generation != generation {
            return;
        }
        check.message = None;
        if let Some(own) = check.hide.take() {
            own.detach();
        }
    });
    if let Some(own) = check.hide.replace(clear) {
        own.detach();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cart_sync_core::ShippingPolicy;

    use super::*;
    use crate::testing::{FakeTransport, cart, line};

    const NOTICE: Duration = Duration::from_millis(3500);
    const FADE: Duration = Duration::from_millis(260);

    fn setup(transport: &Arc<FakeTransport>) -> (StockRevalidator, StoreHandle) {
        let store = StoreHandle::new(ShippingPolicy::default());
        store.update(|s| s.reconcile(cart(vec![line("l1", "A1", 1000, 5, 5)])));
        let revalidator = StockRevalidator::new(
            Arc::clone(transport) as Arc<dyn CartTransport>,
            store.clone(),
            NOTICE,
            FADE,
        );
        (revalidator, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_notice_is_immediate() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_stock("A1", 5, Duration::from_millis(200));
        let (revalidator, _) = setup(&transport);

        let notice = revalidator.revalidate(&LineId::new("l1")).unwrap();
        assert_eq!(notice, StockNotice::OnlyLeft(5));
        assert_eq!(notice.to_string(), "Only 5 left");

        let message = revalidator.notice(&LineId::new("l1")).unwrap();
        assert_eq!(message.source, NoticeSource::Cached);
        assert!(message.visible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_figure_replaces_notice_and_stock() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_stock("A1", 3, Duration::from_millis(200));
        let (revalidator, store) = setup(&transport);

        revalidator.revalidate(&LineId::new("l1"));
        tokio::time::sleep(Duration::from_millis(250)).await;

        let message = revalidator.notice(&LineId::new("l1")).unwrap();
        assert_eq!(message.notice, StockNotice::OnlyLeft(3));
        assert_eq!(message.source, NoticeSource::Fresh);
        let stock = store.read(|s| s.line(&LineId::new("l1")).unwrap().available_stock);
        assert_eq!(stock, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_request_cancels_older() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_stock("A1", 2, Duration::from_millis(500));
        let (revalidator, store) = setup(&transport);

        revalidator.revalidate(&LineId::new("l1"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The second lookup answers faster with a different figure.
        transport.set_stock("A1", 4, Duration::from_millis(100));
        revalidator.revalidate(&LineId::new("l1"));
        tokio::time::sleep(Duration::from_millis(600)).await;

        let message = revalidator.notice(&LineId::new("l1")).unwrap();
        assert_eq!(message.notice, StockNotice::OnlyLeft(4));
        let stock = store.read(|s| s.line(&LineId::new("l1")).unwrap().available_stock);
        assert_eq!(stock, Some(4));
        assert_eq!(transport.cancelled_stock_lookups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notice_hides_then_clears() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_stock("A1", 5, Duration::from_millis(10));
        let (revalidator, _) = setup(&transport);

        revalidator.revalidate(&LineId::new("l1"));
        tokio::time::sleep(Duration::from_millis(3600)).await;
        let message = revalidator.notice(&LineId::new("l1")).unwrap();
        assert!(!message.visible);
        assert_eq!(message.notice, StockNotice::OnlyLeft(5));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(revalidator.notice(&LineId::new("l1")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_keeps_cached_notice() {
        let transport = Arc::new(FakeTransport::new());
        let (revalidator, _) = setup(&transport);

        revalidator.revalidate(&LineId::new("l1"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let message = revalidator.notice(&LineId::new("l1")).unwrap();
        assert_eq!(message.source, NoticeSource::Cached);
        assert!(!revalidator.is_checking(&LineId::new("l1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_lookup() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_stock("A1", 1, Duration::from_millis(500));
        let (revalidator, store) = setup(&transport);

        revalidator.revalidate(&LineId::new("l1"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        revalidator.teardown();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(revalidator.notice(&LineId::new("l1")).is_none());
        let stock = store.read(|s| s.line(&LineId::new("l1")).unwrap().available_stock);
        assert_eq!(stock, Some(5));
    }

    #[test]
    fn test_out_of_stock_notice() {
        assert_eq!(StockNotice::for_stock(0), StockNotice::OutOfStock);
        assert_eq!(StockNotice::OutOfStock.to_string(), "Out of stock");
    }
}
