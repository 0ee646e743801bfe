//! Cart Sync engine library.
//!
//! Keeps a locally-held cart consistent with the authoritative server-side
//! cart while absorbing bursty input (rapid quantity changes, repeated
//! add-to-cart) without blocking callers or corrupting totals.
//!
//! # Components
//!
//! - [`client`] - Transport Client: HTTP cart operations and failure normalization
//! - [`stock`] - Stock Revalidator: cancellable per-line stock re-checks
//! - [`debounce`] - Debounced Commit Queue: one update per line per quiet period
//! - [`store`] - Cart Store: the cart aggregate, updating set, and selectors
//! - [`engine`] - Sync Engine: optimistic apply, reconcile, rollback
//!
//! Supporting modules: [`config`], [`session`], [`error`], [`notices`],
//! [`timer`], [`mirror`], [`telemetry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use cart_sync::{SyncConfig, SyncEngine};
//!
//! let config = SyncConfig::from_env()?;
//! let engine = SyncEngine::from_config(&config)?;
//!
//! engine.load().await;
//! engine.set_quantity(&line_id, 3); // debounced, optimistic
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod client;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod mirror;
pub mod notices;
pub mod session;
pub mod stock;
pub mod store;
pub mod telemetry;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{CartTransport, HttpCartClient, TransportError};
pub use config::{ConfigError, SyncConfig};
pub use engine::{QuantityIntent, SyncEngine};
pub use error::{Failure, FailureKind, Severity};
pub use notices::{ErrorCenter, FatalError, TransientError};
pub use mirror::{CartMirror, FileMirror, MemoryMirror};
pub use session::{GuestIdStore, SessionContext};
pub use stock::{StockMessage, StockNotice};
pub use store::{CartSnapshot, CartStore, StoreHandle, Subscription};
