//! dsedit-core: draft, merge and autosave state layer for dataset item editing.
//!
//! The central design principle: the display list is always re-derived from
//! the freshest server page and the current draft, never patched in place.
//! `merge::merge_items()` is a pure function; everything stateful (draft
//! store, page cache, autosave timers) is owned by a `DatasetSession`.

pub mod api;
pub mod autosave;
pub mod config;
pub mod draft;
pub mod editor;
pub mod error;
pub mod fetch;
pub mod form;
pub mod merge;
pub mod models;
pub mod session;
pub mod storage;

pub use api::{ApiHandle, DatasetItemsApi, HttpItemsApi, LocalItemsApi};
pub use autosave::{AutosaveController, SavePhase, SaveStatus};
pub use config::SessionConfig;
pub use draft::{DraftState, DraftStore, SharedDraftStore};
pub use editor::{EditMode, ItemEditor};
pub use error::DseditError;
pub use fetch::PagedItems;
pub use form::{EditorForm, FieldError, FieldKind, SaveMode};
pub use merge::merge_items;
pub use models::{
    DatasetItem, DisplayItem, DraftStatus, Filter, FilterField, FilterOperator, ItemData,
    ItemPatch, ListQuery, Page,
};
pub use session::{CommitSummary, DatasetSession};
pub use storage::DatasetStore;
