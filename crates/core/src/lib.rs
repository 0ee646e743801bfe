//! Cart Sync Core - Shared types library.
//!
//! This crate provides the types used across all cart sync components:
//! - `cart-sync` - The synchronization engine (store, transport, sync protocol)
//! - `cart-sync-cli` - Command-line driver for the engine
//!
//! # Architecture
//!
//! The core crate contains only types and pure transitions - no I/O, no HTTP
//! clients, no timers. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, SKUs, money, statuses, and the [`Cart`] aggregate

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
