//! One dataset editing session.
//!
//! The session owns the draft store for its dataset; nothing is global, so
//! two sessions over the same dataset never see each other's drafts. Dropping
//! the session drops the draft.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::api::{ApiHandle, HttpItemsApi};
use crate::config::SessionConfig;
use crate::draft::SharedDraftStore;
use crate::editor::{EditMode, ItemEditor};
use crate::error::Result;
use crate::fetch::PagedItems;
use crate::models::{
    union_tags, BatchDeleteRequest, BatchUpdateRequest, DatasetItem, DisplayItem, ItemPatch,
    ItemSelection, ListQuery, Page,
};

/// What a commit sent to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl CommitSummary {
    pub fn is_empty(&self) -> bool {
        self.created + self.updated + self.deleted == 0
    }
}

pub struct DatasetSession {
    dataset_id: String,
    config: SessionConfig,
    api: ApiHandle,
    draft: SharedDraftStore,
    items: PagedItems,
}

impl DatasetSession {
    pub fn new(api: ApiHandle, dataset_id: impl Into<String>, config: SessionConfig) -> Self {
        let dataset_id = dataset_id.into();
        let draft = SharedDraftStore::new();
        if config.draft_mode {
            draft.set_draft_mode(true);
        }
        let items = PagedItems::new(api.clone(), draft.clone(), dataset_id.clone(), config.stale_time());
        Self {
            dataset_id,
            config,
            api,
            draft,
            items,
        }
    }

    /// Session against the HTTP service at `config.api_url`.
    pub fn connect(dataset_id: impl Into<String>, config: SessionConfig) -> Self {
        let api: ApiHandle = Arc::new(HttpItemsApi::new(config.api_url.clone()));
        Self::new(api, dataset_id, config)
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn draft(&self) -> &SharedDraftStore {
        &self.draft
    }

    pub fn items(&self) -> &PagedItems {
        &self.items
    }

    /// A query for `page` using the configured page size.
    pub fn query(&self, page: usize) -> ListQuery {
        ListQuery::new(page, self.config.page_size)
    }

    pub async fn view(&self, query: &ListQuery) -> Result<Page<DisplayItem>> {
        self.items.view(query).await
    }

    pub fn is_draft_mode(&self) -> bool {
        self.draft.is_draft_mode()
    }

    /// Entering draft mode starts from an empty draft; leaving discards it.
    pub fn set_draft_mode(&self, enabled: bool) {
        let mut store = self.draft.lock();
        if store.state().is_draft_mode == enabled {
            return;
        }
        store.reset();
        store.set_draft_mode(enabled);
        info!(dataset = %self.dataset_id, enabled, "Draft mode toggled");
    }

    pub fn discard(&self) {
        self.draft.reset();
        info!(dataset = %self.dataset_id, "Draft discarded");
    }

    /// Send the draft to the server: creates, then updates, then deletes.
    /// On success only what was sent is cleared; changes staged while the
    /// calls were in flight stay in the draft. On failure the draft is left
    /// intact so the commit can be retried.
    pub async fn commit(&self) -> Result<CommitSummary> {
        let draft = self.draft.snapshot();
        if !draft.has_changes() {
            return Ok(CommitSummary::default());
        }

        let summary = CommitSummary {
            created: draft.added_items.len(),
            updated: draft.edited_items.len(),
            deleted: draft.deleted_ids.len(),
        };

        let result = async {
            if !draft.added_items.is_empty() {
                let items = draft
                    .added_items
                    .iter()
                    .map(|item| DatasetItem {
                        created_at: None,
                        last_updated_at: None,
                        ..item.clone()
                    })
                    .collect();
                self.api.create_items(&self.dataset_id, items).await?;
            }
            for (id, patch) in &draft.edited_items {
                self.api.update_item(id, patch).await?;
            }
            if !draft.deleted_ids.is_empty() {
                let request = BatchDeleteRequest {
                    selection: ItemSelection::Ids(draft.deleted_ids.iter().cloned().collect()),
                };
                self.api.delete_items(&self.dataset_id, &request).await?;
            }
            Ok::<_, crate::error::DseditError>(())
        }
        .await;

        // Pages cached before a partial commit may be stale either way.
        self.items.invalidate();
        if let Err(e) = result {
            warn!(dataset = %self.dataset_id, "Draft commit failed: {}", e);
            return Err(e);
        }

        self.draft.clear_committed(&draft);
        info!(
            dataset = %self.dataset_id,
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            "Draft committed"
        );
        Ok(summary)
    }

    /// Union `tags` into the selected items.
    ///
    /// With "all items selected" outside draft mode the server applies it to
    /// everything matching `query`'s filters; in draft mode it is staged per
    /// displayed row.
    pub async fn bulk_add_tags(&self, query: &ListQuery, ids: &[String], tags: &[String]) -> Result<()> {
        let state = self.draft.snapshot();
        if state.is_draft_mode {
            let view = self.items.view(query).await?;
            for row in targets(&view, ids, state.is_all_items_selected) {
                self.draft
                    .edit_item(row.id(), ItemPatch::tags(union_tags(&row.item.tags, tags)));
            }
            return Ok(());
        }

        let request = BatchUpdateRequest {
            selection: selection(query, ids, state.is_all_items_selected),
            patch: ItemPatch::tags(tags.iter().cloned()),
            merge_tags: true,
        };
        self.api.batch_update(&self.dataset_id, &request).await?;
        self.items.invalidate();
        Ok(())
    }

    pub async fn bulk_delete(&self, query: &ListQuery, ids: &[String]) -> Result<()> {
        let state = self.draft.snapshot();
        if state.is_draft_mode {
            let view = self.items.view(query).await?;
            let doomed: Vec<String> = targets(&view, ids, state.is_all_items_selected)
                .map(|row| row.id().to_string())
                .collect();
            for id in &doomed {
                self.draft.delete_item(id);
            }
            return Ok(());
        }

        let request = BatchDeleteRequest {
            selection: selection(query, ids, state.is_all_items_selected),
        };
        self.api.delete_items(&self.dataset_id, &request).await?;
        self.draft.set_all_items_selected(false);
        self.items.invalidate();
        Ok(())
    }

    /// Open an editor on `item` in the mode this session is in.
    pub fn open_editor(&self, item: &DatasetItem) -> ItemEditor {
        let mode = if self.is_draft_mode() {
            EditMode::Draft
        } else if self.config.autosave {
            EditMode::Autosave
        } else {
            EditMode::Manual
        };
        ItemEditor::new(
            item,
            mode,
            self.dataset_id.clone(),
            self.api.clone(),
            self.draft.clone(),
            self.config.autosave_delay(),
        )
    }
}

fn selection(query: &ListQuery, ids: &[String], all_selected: bool) -> ItemSelection {
    if all_selected {
        ItemSelection::All {
            filters: query.filters.clone(),
        }
    } else {
        ItemSelection::Ids(ids.to_vec())
    }
}

fn targets<'a>(
    view: &'a Page<DisplayItem>,
    ids: &'a [String],
    all_selected: bool,
) -> impl Iterator<Item = &'a DisplayItem> + 'a {
    view.content
        .iter()
        .filter(move |row| all_selected || ids.iter().any(|id| id == row.id()))
}
