//! Draft store: uncommitted client-side intents over one dataset's items.
//!
//! Three independent maps (added records, edited patches, deleted ids) plus
//! the selection/draft-mode flags. Nothing here touches the network; the
//! merge step (`crate::merge`) projects a snapshot of this state over each
//! fetched server page.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::models::{DatasetItem, ItemPatch};

/// The draft maps and flags. Cloning yields an immutable snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftState {
    /// Client-side records in insertion order.
    pub added_items: Vec<DatasetItem>,
    pub edited_items: HashMap<String, ItemPatch>,
    pub deleted_ids: HashSet<String>,
    pub is_all_items_selected: bool,
    pub is_draft_mode: bool,
}

impl DraftState {
    pub fn added(&self, id: &str) -> Option<&DatasetItem> {
        self.added_items.iter().find(|item| item.id == id)
    }

    pub fn is_added(&self, id: &str) -> bool {
        self.added(id).is_some()
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.deleted_ids.contains(id)
    }

    pub fn has_changes(&self) -> bool {
        !self.added_items.is_empty() || !self.edited_items.is_empty() || !self.deleted_ids.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added_items.len() + self.edited_items.len() + self.deleted_ids.len()
    }
}

/// Owner of a [`DraftState`] with the mutator operations.
///
/// Every mutation bumps [`DraftStore::revision`], which derived views use to
/// decide whether to recompute.
#[derive(Debug, Default)]
pub struct DraftStore {
    state: DraftState,
    revision: u64,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DraftState {
        &self.state
    }

    pub fn snapshot(&self) -> DraftState {
        self.state.clone()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Stage a new item. Returns the generated client id.
    pub fn add_item(&mut self, mut item: DatasetItem) -> String {
        let id = self.generate_id();
        item.id = id.clone();
        debug!(item = %id, "draft: item added");
        self.state.added_items.push(item);
        self.touch();
        id
    }

    /// Stage several items in order, e.g. generated samples.
    pub fn add_items(&mut self, items: impl IntoIterator<Item = DatasetItem>) -> Vec<String> {
        items.into_iter().map(|item| self.add_item(item)).collect()
    }

    pub fn edit_item(&mut self, id: &str, patch: ItemPatch) {
        if let Some(added) = self.state.added_items.iter_mut().find(|item| item.id == id) {
            added.apply(&patch);
            debug!(item = %id, "draft: added item edited");
        } else {
            self.state
                .edited_items
                .entry(id.to_string())
                .or_default()
                .merge(patch);
            debug!(item = %id, "draft: item edited");
        }
        self.touch();
    }

    /// Deleting an added item drops it outright; deleting a server item
    /// tombstones it and discards its pending edits.
    pub fn delete_item(&mut self, id: &str) {
        let before = self.state.added_items.len();
        self.state.added_items.retain(|item| item.id != id);
        if self.state.added_items.len() == before {
            self.state.edited_items.remove(id);
            self.state.deleted_ids.insert(id.to_string());
        }
        debug!(item = %id, "draft: item deleted");
        self.touch();
    }

    pub fn set_all_items_selected(&mut self, selected: bool) {
        self.state.is_all_items_selected = selected;
        self.touch();
    }

    pub fn set_draft_mode(&mut self, enabled: bool) {
        self.state.is_draft_mode = enabled;
        self.touch();
    }

    pub fn reset(&mut self) {
        self.state = DraftState::default();
        debug!("draft: reset");
        self.touch();
    }

    /// Drop what a commit sent, keeping anything staged after `sent` was
    /// taken. An added item edited meanwhile now exists on the server, so its
    /// newer fields become an edit; one deleted meanwhile becomes a tombstone.
    pub fn clear_committed(&mut self, sent: &DraftState) {
        for item in &sent.added_items {
            match self.state.added_items.iter().position(|a| a.id == item.id) {
                Some(pos) => {
                    let current = self.state.added_items.remove(pos);
                    if current != *item {
                        self.state.edited_items.insert(
                            current.id.clone(),
                            ItemPatch {
                                data: Some(current.data),
                                tags: Some(current.tags),
                            },
                        );
                    }
                }
                None if self.state.is_draft_mode => {
                    self.state.deleted_ids.insert(item.id.clone());
                }
                None => {}
            }
        }
        for (id, patch) in &sent.edited_items {
            if self.state.edited_items.get(id) == Some(patch) {
                self.state.edited_items.remove(id);
            }
        }
        for id in &sent.deleted_ids {
            self.state.deleted_ids.remove(id);
        }

        if self.state.has_changes() {
            self.state.is_all_items_selected = false;
            debug!(remaining = self.state.change_count(), "draft: commit cleared, later changes kept");
        } else {
            self.state = DraftState::default();
            debug!("draft: commit cleared");
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn generate_id(&self) -> String {
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if !self.state.is_added(&id) {
                return id;
            }
        }
    }
}

/// Cloneable handle to one session's [`DraftStore`].
///
/// Readers always see the current state: there is no cached copy behind the
/// handle, so a merge run after a mutation observes that mutation.
#[derive(Debug, Clone, Default)]
pub struct SharedDraftStore(Arc<Mutex<DraftStore>>);

impl SharedDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the store. A panic while holding the lock cannot leave the maps
    /// half-updated, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, DraftStore> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> DraftState {
        self.lock().snapshot()
    }

    pub fn revision(&self) -> u64 {
        self.lock().revision()
    }

    pub fn is_draft_mode(&self) -> bool {
        self.lock().state().is_draft_mode
    }

    pub fn add_item(&self, item: DatasetItem) -> String {
        self.lock().add_item(item)
    }

    pub fn add_items(&self, items: impl IntoIterator<Item = DatasetItem>) -> Vec<String> {
        self.lock().add_items(items)
    }

    pub fn edit_item(&self, id: &str, patch: ItemPatch) {
        self.lock().edit_item(id, patch)
    }

    pub fn delete_item(&self, id: &str) {
        self.lock().delete_item(id)
    }

    pub fn set_all_items_selected(&self, selected: bool) {
        self.lock().set_all_items_selected(selected)
    }

    pub fn set_draft_mode(&self, enabled: bool) {
        self.lock().set_draft_mode(enabled)
    }

    pub fn reset(&self) {
        self.lock().reset()
    }

    pub fn clear_committed(&self, sent: &DraftState) {
        self.lock().clear_committed(sent)
    }
}
