//! Scheduled tasks as scoped resources.
//!
//! A [`ScheduledTask`] owns a spawned tokio task. Dropping the handle aborts
//! the task, so storing it in a field or map entry is enough to guarantee the
//! timer is released when it is superseded (entry replaced) or torn down
//! (owner dropped).

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Handle to a delayed task. Aborts the task on drop.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Run `task` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn after<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Abort the task if it has not run yet.
    pub fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Release the handle without aborting the task.
    ///
    /// A firing task calls this on its own handle before removing it from the
    /// owner, so the removal does not abort the task mid-run.
    pub fn detach(mut self) {
        self.handle.take();
    }

    /// Whether the task has run to completion or been aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
