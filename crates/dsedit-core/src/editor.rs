//! Item editor: routes form changes to the draft, autosave, or a manual save.

use std::time::Duration;

use tracing::{debug, info};

use crate::api::ApiHandle;
use crate::autosave::{AutosaveController, SaveStatus};
use crate::draft::SharedDraftStore;
use crate::error::{DseditError, Result};
use crate::form::{EditorForm, SaveMode};
use crate::models::{BatchDeleteRequest, DatasetItem, ItemPatch, ItemSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    /// Changes are staged in the draft store.
    Draft,
    /// Changes are sent after the debounce delay.
    Autosave,
    /// Changes are sent on explicit `save()`.
    Manual,
}

pub struct ItemEditor {
    dataset_id: String,
    mode: EditMode,
    form: EditorForm,
    api: ApiHandle,
    draft: SharedDraftStore,
    autosave: Option<AutosaveController>,
    autosave_delay: Duration,
}

impl ItemEditor {
    pub fn new(
        item: &DatasetItem,
        mode: EditMode,
        dataset_id: impl Into<String>,
        api: ApiHandle,
        draft: SharedDraftStore,
        autosave_delay: Duration,
    ) -> Self {
        let dataset_id = dataset_id.into();
        let form_mode = match mode {
            EditMode::Manual => SaveMode::Manual,
            EditMode::Draft | EditMode::Autosave => SaveMode::Autosave,
        };
        let autosave = (mode == EditMode::Autosave).then(|| {
            AutosaveController::new(api.clone(), dataset_id.clone(), item.id.clone(), autosave_delay)
        });
        Self {
            dataset_id,
            mode,
            form: EditorForm::new(item, form_mode),
            api,
            draft,
            autosave,
            autosave_delay,
        }
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn item_id(&self) -> &str {
        self.form.item_id()
    }

    pub fn form(&self) -> &EditorForm {
        &self.form
    }

    pub fn is_dirty(&self) -> bool {
        self.form.is_dirty()
    }

    pub fn save_status(&self) -> Option<SaveStatus> {
        self.autosave.as_ref().map(AutosaveController::status)
    }

    pub fn set_value(&mut self, field: &str, value: impl Into<String>) -> Result<()> {
        let Some(data) = self.form.set_value(field, value)? else {
            return Ok(());
        };
        match self.mode {
            EditMode::Draft => self.draft.edit_item(self.form.item_id(), ItemPatch::data(data)),
            EditMode::Autosave => {
                if let Some(autosave) = &self.autosave {
                    autosave.on_field_change(data);
                }
            }
            EditMode::Manual => {}
        }
        Ok(())
    }

    /// Explicit save. Validation errors block it in every mode.
    pub async fn save(&mut self) -> Result<()> {
        let data = self.form.submit()?;
        match self.mode {
            EditMode::Draft => self.draft.edit_item(self.form.item_id(), ItemPatch::data(data)),
            EditMode::Autosave => {
                if let Some(autosave) = &self.autosave {
                    autosave.on_field_change(data);
                    if let Some(handle) = autosave.flush_pending_save() {
                        handle.await.map_err(|e| DseditError::Other(e.to_string()))?;
                    }
                    autosave.wait_for_saves().await;
                }
            }
            EditMode::Manual => {
                self.api.update_item(self.form.item_id(), &ItemPatch::data(data)).await?;
                info!(item = %self.form.item_id(), "Item saved");
            }
        }
        self.form.mark_saved();
        Ok(())
    }

    /// Delete the open item. A pending autosave is cancelled first.
    pub async fn delete(&mut self) -> Result<()> {
        match self.mode {
            EditMode::Draft => {
                self.draft.delete_item(self.form.item_id());
                Ok(())
            }
            EditMode::Autosave => match &self.autosave {
                Some(autosave) => autosave.delete_item().await,
                None => Ok(()),
            },
            EditMode::Manual => {
                let request = BatchDeleteRequest {
                    selection: ItemSelection::Ids(vec![self.form.item_id().to_string()]),
                };
                self.api.delete_items(&self.dataset_id, &request).await
            }
        }
    }

    /// Move the editor to `next`. A pending autosave is flushed, and every
    /// save in flight for the current item is awaited; a dirty manual form
    /// refuses unless `force` is set.
    pub async fn navigate(&mut self, next: &DatasetItem, force: bool) -> Result<()> {
        match self.mode {
            EditMode::Manual if self.form.is_dirty() && !force => {
                return Err(DseditError::UnsavedChanges);
            }
            EditMode::Autosave => {
                if let Some(autosave) = &self.autosave {
                    if let Some(handle) = autosave.flush_pending_save() {
                        handle.await.map_err(|e| DseditError::Other(e.to_string()))?;
                    }
                    autosave.wait_for_saves().await;
                }
                self.autosave = Some(AutosaveController::new(
                    self.api.clone(),
                    self.dataset_id.clone(),
                    next.id.clone(),
                    self.autosave_delay,
                ));
            }
            _ => {}
        }
        debug!(from = %self.form.item_id(), to = %next.id, "Editor navigated");
        self.form.reset(next);
        Ok(())
    }
}
