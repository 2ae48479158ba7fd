//! Debounced autosave for one open dataset item.
//!
//! `on_field_change()` only arms a timer; the update call happens on the
//! tokio runtime once the item has been quiet for the debounce delay. Rapid
//! edits collapse into one trailing call carrying the latest fields, and at
//! most one update per item is in flight at a time.
//!
//! Idle -> Pending (timer armed, re-armed on each change) -> Saving -> Idle.
//! A failed save sets a sticky error flag and is not retried.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiHandle;
use crate::error::Result;
use crate::models::{BatchDeleteRequest, ItemData, ItemPatch, ItemSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavePhase {
    #[default]
    Idle,
    Pending,
    Saving,
}

/// Save feedback for the UI.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SaveStatus {
    pub phase: SavePhase,
    pub has_error: bool,
    pub last_error: Option<String>,
    pub last_saved_at: Option<DateTime<Utc>>,
}

impl SaveStatus {
    pub fn is_saving(&self) -> bool {
        self.phase == SavePhase::Saving
    }

    pub fn is_pending(&self) -> bool {
        self.phase == SavePhase::Pending
    }
}

#[derive(Default)]
struct Inner {
    status: SaveStatus,
    pending: Option<ItemData>,
    timer: Option<JoinHandle<()>>,
    in_flight: usize,
}

impl Inner {
    fn settle(&mut self) {
        self.status.phase = if self.pending.is_some() {
            SavePhase::Pending
        } else if self.in_flight > 0 {
            SavePhase::Saving
        } else {
            SavePhase::Idle
        };
    }

    /// Move the pending fields into a save. The timer handle is dropped, not
    /// aborted: it may be the very task performing the save.
    fn begin_save(&mut self) -> Option<ItemData> {
        let fields = self.pending.take()?;
        self.timer = None;
        self.in_flight += 1;
        self.status.phase = SavePhase::Saving;
        Some(fields)
    }
}

struct Shared {
    dataset_id: String,
    item_id: String,
    api: ApiHandle,
    state: Mutex<Inner>,
    /// Serializes update calls for this item.
    gate: tokio::sync::Mutex<()>,
    /// Woken whenever a save finishes.
    settled: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, Inner> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn save(&self, fields: ItemData) {
        let _gate = self.gate.lock().await;
        let result = self.api.update_item(&self.item_id, &ItemPatch::data(fields)).await;

        let mut state = self.state();
        state.in_flight -= 1;
        match result {
            Ok(()) => {
                state.status.has_error = false;
                state.status.last_error = None;
                state.status.last_saved_at = Some(Utc::now());
                info!(item = %self.item_id, "Item autosaved");
            }
            Err(e) => {
                state.status.has_error = true;
                state.status.last_error = Some(e.to_string());
                warn!(item = %self.item_id, "Autosave failed: {}", e);
            }
        }
        state.settle();
        drop(state);
        self.settled.notify_waiters();
    }
}

/// Autosave controller bound to one item.
///
/// Must be used from within a tokio runtime: arming and flushing spawn tasks.
pub struct AutosaveController {
    shared: Arc<Shared>,
    delay: Duration,
}

impl AutosaveController {
    pub fn new(
        api: ApiHandle,
        dataset_id: impl Into<String>,
        item_id: impl Into<String>,
        delay: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                dataset_id: dataset_id.into(),
                item_id: item_id.into(),
                api,
                state: Mutex::new(Inner::default()),
                gate: tokio::sync::Mutex::new(()),
                settled: Notify::new(),
            }),
            delay,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.shared.item_id
    }

    pub fn status(&self) -> SaveStatus {
        self.shared.state().status.clone()
    }

    pub fn has_pending_save(&self) -> bool {
        self.shared.state().pending.is_some()
    }

    /// Record the latest full field map and (re)arm the debounce timer.
    pub fn on_field_change(&self, fields: ItemData) {
        let mut state = self.shared.state();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.pending = Some(fields);
        state.status.phase = SavePhase::Pending;

        let shared = Arc::clone(&self.shared);
        let delay = self.delay;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let fields = shared.state().begin_save();
            if let Some(fields) = fields {
                shared.save(fields).await;
            }
        }));
        debug!(item = %self.shared.item_id, delay_ms = delay.as_millis() as u64, "Autosave armed");
    }

    /// Disarm the timer and drop the pending fields without saving.
    pub fn cancel_pending_save(&self) {
        let mut state = self.shared.state();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.pending.take().is_some() {
            debug!(item = %self.shared.item_id, "Pending autosave cancelled");
        }
        state.settle();
    }

    /// Start the pending save now. The phase is `Saving` when this returns;
    /// await the handle to wait for the call to finish.
    pub fn flush_pending_save(&self) -> Option<JoinHandle<()>> {
        let fields = {
            let mut state = self.shared.state();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            state.begin_save()?
        };
        debug!(item = %self.shared.item_id, "Flushing pending autosave");
        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(async move { shared.save(fields).await }))
    }

    /// Wait until no update for this item is in flight, including one the
    /// debounce timer started on its own.
    pub async fn wait_for_saves(&self) {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.state().in_flight == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Clear the error flag and last-saved time.
    pub fn reset_save_state(&self) {
        let mut state = self.shared.state();
        state.status.has_error = false;
        state.status.last_error = None;
        state.status.last_saved_at = None;
    }

    /// Cancel any pending save, then delete the item.
    pub async fn delete_item(&self) -> Result<()> {
        self.cancel_pending_save();
        let request = BatchDeleteRequest {
            selection: ItemSelection::Ids(vec![self.shared.item_id.clone()]),
        };
        self.shared.api.delete_items(&self.shared.dataset_id, &request).await?;
        info!(item = %self.shared.item_id, "Item deleted");
        Ok(())
    }
}

impl Drop for AutosaveController {
    fn drop(&mut self) {
        // Best-effort: don't lose the last edits when the editor goes away.
        if tokio::runtime::Handle::try_current().is_ok() {
            let _ = self.flush_pending_save();
        }
    }
}
