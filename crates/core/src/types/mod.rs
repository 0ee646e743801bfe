//! Core types for the cart sync engine.
//!
//! This module provides type-safe wrappers for common domain concepts and the
//! cart aggregate itself.

pub mod cart;
pub mod id;
pub mod price;
pub mod sku;
pub mod status;

pub use cart::{Cart, CartLine, ShippingPolicy};
pub use id::*;
pub use price::{CurrencyCode, Price};
pub use sku::{Sku, SkuError};
pub use status::*;
