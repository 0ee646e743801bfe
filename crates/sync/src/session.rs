//! Session context threaded into the Transport Client.
//!
//! Every request carries exactly one of:
//! - a bearer credential (signed-in user), or
//! - a guest session id, generated once and persisted on the client.
//!
//! [`SessionContext::establish`] is the single place a session is created.

use std::path::{Path, PathBuf};

use cart_sync_core::GuestSessionId;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Header carrying the guest session id.
pub const GUEST_SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-id");

/// Errors that can occur while establishing a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Reading or writing the persisted guest id failed.
    #[error("Guest session storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A credential could not be encoded as a header value.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),
}

/// Who the cart belongs to, as presented to the backend.
#[derive(Clone)]
pub enum SessionContext {
    /// Signed-in user.
    Bearer(SecretString),
    /// Anonymous shopper.
    Guest(GuestSessionId),
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"[REDACTED]").finish(),
            Self::Guest(id) => f.debug_tuple("Guest").field(id).finish(),
        }
    }
}

impl SessionContext {
    /// Establish the session for this client.
    ///
    /// A bearer token wins. Without one, the persisted guest id is reused or
    /// a new one is generated and persisted.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the guest id cannot be read or saved.
    pub fn establish(
        token: Option<SecretString>,
        guest_ids: &GuestIdStore,
    ) -> Result<Self, SessionError> {
        if let Some(token) = token {
            debug!("Using bearer credential for cart session");
            return Ok(Self::Bearer(token));
        }

        Ok(Self::Guest(guest_ids.load_or_create()?))
    }

    /// The guest id, when this is a guest session.
    #[must_use]
    pub const fn guest_id(&self) -> Option<&GuestSessionId> {
        match self {
            Self::Guest(id) => Some(id),
            Self::Bearer(_) => None,
        }
    }

    /// Whether requests are made as a signed-in user.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Bearer(_))
    }

    /// Headers attached to every request.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidCredential` if the value is not a valid
    /// header value.
    pub fn headers(&self) -> Result<HeaderMap, SessionError> {
        let mut headers = HeaderMap::new();
        match self {
            Self::Bearer(token) => {
                let mut value =
                    HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                        .map_err(|e| SessionError::InvalidCredential(e.to_string()))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Self::Guest(id) => {
                let value = HeaderValue::from_str(id.as_str())
                    .map_err(|e| SessionError::InvalidCredential(e.to_string()))?;
                headers.insert(GUEST_SESSION_HEADER, value);
            }
        }
        Ok(headers)
    }
}

/// Where the guest session id is persisted.
#[derive(Debug, Clone)]
pub enum GuestIdStore {
    /// Plain-text file holding the id.
    File(PathBuf),
    /// Not persisted; a new id is generated per process.
    Ephemeral,
}

impl GuestIdStore {
    /// File-backed store, or ephemeral when no path is configured.
    #[must_use]
    pub fn from_path(path: Option<PathBuf>) -> Self {
        path.map_or(Self::Ephemeral, Self::File)
    }

    /// Load the persisted id, creating and persisting a new one if absent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read, or the new
    /// id cannot be written.
    pub fn load_or_create(&self) -> Result<GuestSessionId, SessionError> {
        match self {
            Self::Ephemeral => Ok(GuestSessionId::generate()),
            Self::File(path) => {
                if let Some(existing) = read_guest_id(path)? {
                    return Ok(existing);
                }
                let id = GuestSessionId::generate();
                write_guest_id(path, &id)?;
                info!(guest_session = %id, "Created guest session");
                Ok(id)
            }
        }
    }

    /// The persisted id, without creating one.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read.
    pub fn load(&self) -> Result<Option<GuestSessionId>, SessionError> {
        match self {
            Self::Ephemeral => Ok(None),
            Self::File(path) => read_guest_id(path),
        }
    }

    /// Forget the persisted id (e.g. after the guest cart has been merged).
    pub fn clear(&self) {
        if let Self::File(path) = self
            && let Err(e) = std::fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(error = %e, path = %path.display(), "Failed to remove guest session id");
        }
    }
}

fn read_guest_id(path: &Path) -> Result<Option<GuestSessionId>, SessionError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let trimmed = raw.trim();
            Ok((!trimmed.is_empty()).then(|| GuestSessionId::new(trimmed)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_guest_id(path: &Path, id: &GuestSessionId) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, id.as_str())?;
    Ok(())
}
