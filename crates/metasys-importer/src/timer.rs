//! Single-slot one-shot timer
//!
//! A [`TimerSlot`] holds at most one pending deadline. Scheduling replaces
//! the deadline rather than queueing another fire, so the number of pending
//! fires is always zero or one. The action runs on the slot's own task and
//! may reschedule the slot from inside itself.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Future returned by a timer action
pub type TimerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type Deadline = watch::Sender<Option<Instant>>;

pub struct TimerSlot {
    name: String,
    deadline: Arc<Deadline>,
    handle: JoinHandle<()>,
}

impl TimerSlot {
    /// Create an idle slot running `action` whenever a deadline passes
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> TimerFuture + Send + Sync + 'static,
    {
        let name = name.into();
        let (tx, rx) = watch::channel(None);
        let deadline = Arc::new(tx);
        let handle = tokio::spawn(run_slot(
            name.clone(),
            rx,
            Arc::downgrade(&deadline),
            action,
        ));

        Self {
            name,
            deadline,
            handle,
        }
    }

    /// Fire at `at`, superseding any pending deadline
    pub fn schedule_at(&self, at: Instant) {
        self.deadline.send_replace(Some(at));
        trace!(timer = %self.name, in_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64, "Timer scheduled");
    }

    /// Fire after `delay`, superseding any pending deadline
    pub fn schedule_in(&self, delay: Duration) {
        self.schedule_at(Instant::now() + delay);
    }

    /// Drop the pending deadline, if any
    pub fn cancel(&self) {
        if self.deadline.send_replace(None).is_some() {
            debug!(timer = %self.name, "Timer cancelled");
        }
    }

    /// Whether a fire is pending
    pub fn is_pending(&self) -> bool {
        self.deadline.borrow().is_some()
    }

    /// The pending deadline
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.borrow()
    }
}

impl std::fmt::Debug for TimerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerSlot")
            .field("name", &self.name)
            .field("deadline", &self.deadline())
            .finish()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_slot<F>(
    name: String,
    mut rx: watch::Receiver<Option<Instant>>,
    deadline: Weak<Deadline>,
    action: F,
) where
    F: Fn() -> TimerFuture + Send + Sync + 'static,
{
    loop {
        let next = *rx.borrow_and_update();
        let Some(at) = next else {
            if rx.changed().await.is_err() {
                return;
            }
            continue;
        };

        tokio::select! {
            _ = tokio::time::sleep_until(at) => {
                // Clear the slot unless it was rescheduled meanwhile
                let Some(tx) = deadline.upgrade() else {
                    return;
                };
                tx.send_if_modified(|current| {
                    if *current == Some(at) {
                        *current = None;
                        true
                    } else {
                        false
                    }
                });
                drop(tx);

                debug!(timer = %name, "Timer fired");
                action().await;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
