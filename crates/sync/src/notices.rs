//! Transient and fatal error state.
//!
//! A [`TransientError`] is shown inline for a fixed TTL, then marked fading,
//! then removed once the fade completes. Both steps run on
//! [`ScheduledTask`]s stored per error, so dismissing an error or tearing down
//! the center releases its timers.
//!
//! A [`FatalError`] is a singleton rendered as a full-page failure with a
//! manual retry; it never expires on its own.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use cart_sync_core::LineId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::Failure;
use crate::timer::ScheduledTask;

/// A time-boxed, non-blocking failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransientError {
    /// Unique id of this occurrence.
    pub id: Uuid,
    /// Line the failure belongs to, if line-scoped.
    pub line_id: Option<LineId>,
    /// Human-readable message.
    pub message: String,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// When the failure was recorded.
    pub created_at: DateTime<Utc>,
    /// Set once the TTL has elapsed and the fade-out has started.
    pub fading: bool,
}

/// A failure that replaces the whole view with a retry prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FatalError {
    /// Human-readable message.
    pub message: String,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
}

impl From<&Failure> for FatalError {
    fn from(failure: &Failure) -> Self {
        Self {
            message: failure.message.clone(),
            status: failure.status,
        }
    }
}

#[derive(Default)]
struct ErrorState {
    transient: Vec<TransientError>,
    timers: HashMap<Uuid, ScheduledTask>,
    fatal: Option<FatalError>,
}

/// Holds every surfaced error. Cheap to clone.
#[derive(Clone)]
pub struct ErrorCenter {
    state: Arc<Mutex<ErrorState>>,
    ttl: Duration,
    fade: Duration,
}

impl std::fmt::Debug for ErrorCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ErrorCenter")
            .field("transient", &state.transient)
            .field("fatal", &state.fatal)
            .field("ttl", &self.ttl)
            .field("fade", &self.fade)
            .finish()
    }
}

impl ErrorCenter {
    /// Create an empty center.
    #[must_use]
    pub fn new(ttl: Duration, fade: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(ErrorState::default())),
            ttl,
            fade,
        }
    }

    /// Record a transient error and schedule its expiry.
    ///
    /// A line-scoped error replaces any standing error for the same line.
    /// Must be called from within a tokio runtime.
    pub fn push_transient(&self, line_id: Option<LineId>, failure: &Failure) -> Uuid {
        let error = TransientError {
            id: Uuid::new_v4(),
            line_id,
            message: failure.message.clone(),
            status: failure.status,
            created_at: Utc::now(),
            fading: false,
        };
        let id = error.id;

        let mut state = self.state.lock();
        if let Some(line_id) = &error.line_id {
            remove_line_errors(&mut state, line_id);
        }
        debug!(error_id = %id, message = %error.message, "Transient error recorded");
        state.transient.push(error);
        let timer = start_fade_after(Arc::downgrade(&self.state), id, self.ttl, self.fade);
        state.timers.insert(id, timer);
        id
    }

    /// Remove one transient error now.
    pub fn dismiss(&self, id: Uuid) {
        let mut state = self.state.lock();
        state.transient.retain(|e| e.id != id);
        state.timers.remove(&id);
    }

    /// Remove the standing error for a line, if any.
    pub fn clear_line(&self, line_id: &LineId) {
        remove_line_errors(&mut self.state.lock(), line_id);
    }

    /// The standing error for a line.
    #[must_use]
    pub fn line_error(&self, line_id: &LineId) -> Option<TransientError> {
        self.state
            .lock()
            .transient
            .iter()
            .find(|e| e.line_id.as_ref() == Some(line_id))
            .cloned()
    }

    /// Every visible transient error, oldest first.
    #[must_use]
    pub fn transient(&self) -> Vec<TransientError> {
        self.state.lock().transient.clone()
    }

    /// Set the fatal error.
    pub fn set_fatal(&self, error: FatalError) {
        self.state.lock().fatal = Some(error);
    }

    /// Clear the fatal error (before a manual retry).
    pub fn clear_fatal(&self) {
        self.state.lock().fatal = None;
    }

    /// The fatal error, if set.
    #[must_use]
    pub fn fatal(&self) -> Option<FatalError> {
        self.state.lock().fatal.clone()
    }

    /// Drop every error and abort every pending timer.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.transient.clear();
        state.timers.clear();
        state.fatal = None;
    }
}

fn remove_line_errors(state: &mut ErrorState, line_id: &LineId) {
    let ErrorState {
        transient, timers, ..
    } = state;
    transient.retain(|e| {
        let keep = e.line_id.as_ref() != Some(line_id);
        if !keep {
            timers.remove(&e.id);
        }
        keep
    });
}

/// TTL timer: marks the error as fading, then hands over to the removal timer.
fn start_fade_after(
    state: Weak<Mutex<ErrorState>>,
    id: Uuid,
    ttl: Duration,
    fade: Duration,
) -> ScheduledTask {
    ScheduledTask::after(ttl, async move {
        let Some(strong) = state.upgrade() else {
            return;
        };
        let mut guard = strong.lock();
        let Some(error) = guard.transient.iter_mut().find(|e| e.id == id) else {
            return;
        };
        error.fading = true;

        let removal = ScheduledTask::after(fade, async move {
            let Some(strong) = state.upgrade() else {
                return;
            };
            let mut guard = strong.lock();
            guard.transient.retain(|e| e.id != id);
            if let Some(own) = guard.timers.remove(&id) {
                own.detach();
            }
        });
        if let Some(own) = guard.timers.insert(id, removal) {
            own.detach();
        }
    })
}
