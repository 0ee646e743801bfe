//! Best-effort local mirror of the last reconciled cart.
//!
//! Refreshed after every successful reconciliation and read only when the
//! initial fetch fails with nothing in memory. Never authoritative; the
//! engine logs mirror failures and carries on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cart_sync_core::Cart;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Mirror format version. Files with another version are ignored.
const MIRROR_VERSION: u32 = 1;

/// Errors that can occur while reading or writing the mirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Mirror I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mirror serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage for the mirrored cart.
#[async_trait]
pub trait CartMirror: Send + Sync {
    /// The mirrored cart, if any.
    async fn load(&self) -> Result<Option<Cart>, MirrorError>;

    /// Replace the mirrored cart.
    async fn save(&self, cart: &Cart) -> Result<(), MirrorError>;

    /// Forget the mirrored cart.
    async fn clear(&self) -> Result<(), MirrorError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MirroredCart {
    version: u32,
    saved_at: DateTime<Utc>,
    cart: Cart,
}

// =============================================================================
// FileMirror
// =============================================================================

/// JSON file mirror.
#[derive(Debug, Clone)]
pub struct FileMirror {
    path: PathBuf,
}

impl FileMirror {
    /// Mirror stored at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CartMirror for FileMirror {
    async fn load(&self) -> Result<Option<Cart>, MirrorError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mirrored: MirroredCart = serde_json::from_str(&content)?;
        if mirrored.version != MIRROR_VERSION {
            debug!(version = mirrored.version, "Ignoring mirror with unknown version");
            return Ok(None);
        }
        Ok(Some(mirrored.cart))
    }

    async fn save(&self, cart: &Cart) -> Result<(), MirrorError> {
        let content = serde_json::to_string_pretty(&MirroredCart {
            version: MIRROR_VERSION,
            saved_at: Utc::now(),
            cart: cart.clone(),
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so a crash never leaves a truncated mirror.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), MirrorError> {
        match fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// MemoryMirror
// =============================================================================

/// In-process mirror (no persistence across restarts).
#[derive(Debug, Default)]
pub struct MemoryMirror {
    cart: Mutex<Option<Cart>>,
}

impl MemoryMirror {
    /// Empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror seeded with a cart.
    #[must_use]
    pub fn with_cart(cart: Cart) -> Self {
        Self {
            cart: Mutex::new(Some(cart)),
        }
    }
}

#[async_trait]
impl CartMirror for MemoryMirror {
    async fn load(&self) -> Result<Option<Cart>, MirrorError> {
        Ok(self.cart.lock().clone())
    }

    async fn save(&self, cart: &Cart) -> Result<(), MirrorError> {
        *self.cart.lock() = Some(cart.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), MirrorError> {
        *self.cart.lock() = None;
        Ok(())
    }
}
