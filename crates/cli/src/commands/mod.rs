//! Cart commands.
//!
//! Each command builds a [`SyncEngine`] from the environment, loads the cart,
//! performs one intent, and prints the resulting cart.
//!
//! # Environment Variables
//!
//! - `CART_API_BASE_URL` - Cart API base URL (required)
//! - `CART_API_TOKEN` - Bearer credential; a guest session is used when unset
//! - `CART_STATE_DIR` - Where the guest id and cart mirror are kept

use std::time::Duration;

use cart_sync::session::SessionError;
use cart_sync::stock::NoticeSource;
use cart_sync::{
    CartSnapshot, Failure, GuestIdStore, SyncConfig, SyncEngine, TransportError,
};
use cart_sync_core::{GuestSessionId, LineId, ProductId, Sku, SkuError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Poll interval while waiting for a fresh stock figure.
const STOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The engine could not be set up.
    #[error("Setup failed: {0}")]
    Setup(#[from] TransportError),

    /// A cart operation failed.
    #[error("{0}")]
    Failure(#[from] Failure),

    /// The guest session id could not be read.
    #[error("Guest session error: {0}")]
    Session(#[from] SessionError),

    /// Invalid SKU argument.
    #[error("Invalid SKU: {0}")]
    Sku(#[from] SkuError),

    /// No line with the given id.
    #[error("No cart line with id {0}")]
    UnknownLine(String),

    /// Merge needs a guest id and none was given or persisted.
    #[error("No guest session to merge (pass --guest-id)")]
    NoGuestSession,

    /// Merge needs a bearer credential.
    #[error("Merging requires CART_API_TOKEN")]
    NotSignedIn,

    /// JSON output failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Output format.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// Print JSON instead of a table.
    pub json: bool,
}

/// Fetch and print the cart. Falls back to the mirrored cart when offline.
pub async fn show(config: &SyncConfig, output: Output) -> Result<(), CommandError> {
    let engine = SyncEngine::from_config(config)?;
    if let Err(failure) = engine.load().await {
        if !engine.snapshot().loaded {
            return Err(failure.into());
        }
        tracing::warn!(error = %failure, "Cart fetch failed; showing mirrored cart");
    }
    finish(&engine, output)
}

/// Add a product variant.
pub async fn add(
    config: &SyncConfig,
    output: Output,
    product: &str,
    sku: &str,
    quantity: u32,
) -> Result<(), CommandError> {
    let sku = Sku::parse(sku)?;
    let engine = connect(config).await?;
    engine
        .add_item(&ProductId::new(product), &sku, quantity)
        .await?;
    finish(&engine, output)
}

/// Set a line's quantity, clamped to its cached stock.
pub async fn set(
    config: &SyncConfig,
    output: Output,
    line: &str,
    quantity: u32,
) -> Result<(), CommandError> {
    let engine = connect(config).await?;
    let line_id = LineId::new(line);

    if quantity == 0 {
        engine.remove_item(&line_id).await?;
        return finish(&engine, output);
    }

    let intent = engine
        .set_quantity(&line_id, quantity)
        .ok_or_else(|| CommandError::UnknownLine(line.to_owned()))?;
    if let Some(notice) = intent.notice {
        tracing::info!(requested = intent.requested, quantity = intent.quantity, "{notice}");
    }

    if !engine.flush(&line_id).await {
        tracing::info!(quantity = intent.quantity, "Quantity unchanged");
    }
    if let Some(error) = engine.errors().line_error(&line_id) {
        let failure = match error.status {
            Some(status) => Failure::from_status(status, error.message),
            None => Failure::network(error.message),
        };
        return Err(failure.into());
    }
    finish(&engine, output)
}

/// Remove a line.
pub async fn remove(config: &SyncConfig, output: Output, line: &str) -> Result<(), CommandError> {
    let engine = connect(config).await?;
    let line_id = LineId::new(line);
    if engine.store().read(|s| s.line(&line_id).is_none()) {
        return Err(CommandError::UnknownLine(line.to_owned()));
    }
    engine.remove_item(&line_id).await?;
    finish(&engine, output)
}

/// Remove every line.
pub async fn clear(config: &SyncConfig, output: Output) -> Result<(), CommandError> {
    let engine = connect(config).await?;
    engine.clear_cart().await?;
    finish(&engine, output)
}

/// Merge a guest cart into the signed-in cart.
///
/// Without `--guest-id` the persisted guest id is used and forgotten once the
/// merge succeeds.
pub async fn merge(
    config: &SyncConfig,
    output: Output,
    guest_id: Option<String>,
) -> Result<(), CommandError> {
    if config.api.token.is_none() {
        return Err(CommandError::NotSignedIn);
    }

    let guest_ids = GuestIdStore::from_path(config.guest_id_path());
    let (guest_id, persisted) = match guest_id {
        Some(id) => (GuestSessionId::new(id), false),
        None => (guest_ids.load()?.ok_or(CommandError::NoGuestSession)?, true),
    };

    let engine = connect(config).await?;
    engine.merge_guest_cart(&guest_id).await?;
    if persisted {
        guest_ids.clear();
    }
    finish(&engine, output)
}

/// Validate every line against stock.
pub async fn validate(config: &SyncConfig, output: Output) -> Result<(), CommandError> {
    let engine = connect(config).await?;
    let validation = engine.validate_stock().await?;

    if output.json {
        print_line(&serde_json::to_string_pretty(&validation)?);
    } else {
        print_line(if validation.is_valid {
            "All lines are in stock"
        } else {
            "Some lines exceed available stock"
        });
        for check in validation
            .adjusted_items
            .iter()
            .chain(&validation.out_of_stock_items)
        {
            print_line(&format!(
                "  {}  requested {}  available {}",
                check.item_id,
                check
                    .requested_quantity
                    .map_or_else(|| "?".to_owned(), |q| q.to_string()),
                check.available_stock,
            ));
        }
    }
    engine.teardown();
    Ok(())
}

/// Re-check stock for one line and print the fresh notice.
pub async fn stock(config: &SyncConfig, output: Output, line: &str) -> Result<(), CommandError> {
    let engine = connect(config).await?;
    let line_id = LineId::new(line);

    let cached = engine
        .revalidate_line(&line_id)
        .ok_or_else(|| CommandError::UnknownLine(line.to_owned()))?;
    tracing::debug!(notice = %cached, "Cached stock notice");

    let deadline = tokio::time::Instant::now() + config.api.request_timeout;
    let message = loop {
        let message = engine.stock_notice(&line_id);
        let fresh = message.is_some_and(|m| m.source == NoticeSource::Fresh);
        if fresh || tokio::time::Instant::now() >= deadline {
            break message;
        }
        tokio::time::sleep(STOCK_POLL_INTERVAL).await;
    };

    let (notice, source) = message.map_or((cached, NoticeSource::Cached), |m| (m.notice, m.source));
    if output.json {
        print_line(&serde_json::to_string_pretty(&serde_json::json!({
            "lineId": line_id,
            "notice": notice,
            "source": source,
        }))?);
    } else {
        let suffix = match source {
            NoticeSource::Fresh => "",
            NoticeSource::Cached => " (cached)",
        };
        print_line(&format!("{line_id}: {notice}{suffix}"));
    }
    engine.teardown();
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

async fn connect(config: &SyncConfig) -> Result<SyncEngine, CommandError> {
    let engine = SyncEngine::from_config(config)?;
    engine.load().await?;
    Ok(engine)
}

fn finish(engine: &SyncEngine, output: Output) -> Result<(), CommandError> {
    let snapshot = engine.snapshot();
    engine.teardown();
    if output.json {
        print_line(&serde_json::to_string_pretty(&snapshot.cart)?);
    } else {
        print_cart(&snapshot);
    }
    Ok(())
}

fn print_cart(snapshot: &CartSnapshot) {
    let cart = &snapshot.cart;
    if cart.is_empty() {
        print_line("Cart is empty");
        return;
    }

    for line in &cart.lines {
        print_line(&format!(
            "{:<26} {:<16} {:>4} x {:>9} = {:>9}  stock {}",
            line.id.as_str(),
            line.sku.as_str(),
            line.quantity,
            cart.price(line.price).display(),
            cart.price(line.line_total()).display(),
            line.available_stock
                .map_or_else(|| "?".to_owned(), |stock| stock.to_string()),
        ));
    }
    print_line(&format!("{:>60}", format!("Subtotal {}", cart.price(cart.subtotal))));
    print_line(&format!("{:>60}", format!("Shipping {}", cart.price(cart.shipping_cost))));
    if cart.discount > Decimal::ZERO {
        print_line(&format!("{:>60}", format!("Discount -{}", cart.price(cart.discount))));
    }
    print_line(&format!("{:>60}", format!("Total {}", cart.price(cart.total_price))));
}

#[allow(clippy::print_stdout)]
fn print_line(line: &str) {
    println!("{line}");
}
