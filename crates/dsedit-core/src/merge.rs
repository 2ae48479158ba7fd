//! Projection of a fetched server page through the draft state.

use crate::draft::DraftState;
use crate::models::{DatasetItem, DisplayItem, DraftStatus};

/// Merge one server page with the draft into display rows.
///
/// Deleted ids are dropped, edited items get their patch applied and the
/// `edited` tag, and added items are prepended newest first. Nothing is
/// re-sorted or deduplicated; pagination, search and filtering already
/// happened server-side.
pub fn merge_items(server_items: &[DatasetItem], draft: &DraftState) -> Vec<DisplayItem> {
    let added = draft
        .added_items
        .iter()
        .rev()
        .map(|item| DisplayItem::new(item.clone(), DraftStatus::Added));

    let server = server_items
        .iter()
        .filter(|item| !draft.deleted_ids.contains(&item.id))
        .map(|item| match draft.edited_items.get(&item.id) {
            Some(patch) => DisplayItem::new(item.clone().patched(patch), DraftStatus::Edited),
            None => DisplayItem::new(item.clone(), DraftStatus::Unchanged),
        });

    added.chain(server).collect()
}

/// Tag server items as unchanged without consulting any draft.
pub fn passthrough(server_items: Vec<DatasetItem>) -> Vec<DisplayItem> {
    server_items
        .into_iter()
        .map(|item| DisplayItem::new(item, DraftStatus::Unchanged))
        .collect()
}
