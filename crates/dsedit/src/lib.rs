#![doc = include_str!("../../../README.md")]

pub use dsedit_core::*;

/// The reference item service.
pub use dsedit_server as server;

/// The types most editing code needs in one import.
pub mod prelude {
    pub use dsedit_core::{
        ApiHandle, DatasetItem, DatasetItemsApi, DatasetSession, DraftStatus, DseditError,
        EditMode, ItemEditor, ItemPatch, ListQuery, SaveStatus, SessionConfig,
    };
}
