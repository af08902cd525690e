//! Delayed function items.
//!
//! A [`Callout`] holds a fully built function item until its timer fires,
//! then submits it like any other item. Cancelling takes the item back
//! before the timer does; exactly one of the two wins.

use crate::dispatch;
use crate::error::{NgError, Result};
use crate::graph::GraphCore;
use crate::item::Item;
use core::fmt;
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

struct Shared {
    item: Mutex<Option<Item>>,
    task: Mutex<Option<AbortHandle>>,
}

impl Shared {
    fn take(&self) -> Option<Item> {
        self.item.lock().take()
    }
}

/// Handle to a scheduled function item.
#[derive(Clone)]
pub struct Callout {
    shared: Arc<Shared>,
}

impl fmt::Debug for Callout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callout")
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl Callout {
    /// Arms a timer that submits `item` after `delay`.
    ///
    /// Fails with `Unreachable` once the graph is shutting down.
    pub(crate) fn arm(core: &Arc<GraphCore>, delay: Duration, item: Item) -> Result<Callout> {
        if !core.is_running() {
            return Err(item.fail(NgError::Unreachable));
        }
        let shared = Arc::new(Shared {
            item: Mutex::new(Some(item)),
            task: Mutex::new(None),
        });
        let fired = Arc::clone(&shared);
        let task = core.timer().spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(item) = fired.take() else {
                return;
            };
            trace!(?item, "callout fired");
            if let Err(err) = dispatch::submit(item) {
                debug!(%err, "callout item could not be submitted");
            }
        });
        *shared.task.lock() = Some(task.abort_handle());
        Ok(Callout { shared })
    }

    /// Cancels the callout.
    ///
    /// Returns `true` if the item was reclaimed before the timer fired,
    /// `false` if it already fired or was cancelled before.
    pub fn cancel(&self) -> bool {
        let Some(item) = self.shared.take() else {
            return false;
        };
        if let Some(task) = self.shared.task.lock().take() {
            task.abort();
        }
        drop(item);
        true
    }

    /// Returns `true` until the callout fires or is cancelled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.item.lock().is_some()
    }
}
