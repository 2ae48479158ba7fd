//! Data models for dsedit.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name -> JSON value, in insertion order.
pub type ItemData = Map<String, Value>;

/// Where a dataset item came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    #[default]
    Manual,
    Trace,
    Span,
    Sdk,
}

/// A single dataset item as owned by the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DatasetItem {
    pub id: String,
    #[serde(default)]
    pub data: ItemData,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: ItemSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl DatasetItem {
    pub fn new(id: impl Into<String>, data: ItemData) -> Self {
        Self {
            id: id.into(),
            data,
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Shallow-merge a patch: present keys replace the item's keys wholesale.
    pub fn apply(&mut self, patch: &ItemPatch) {
        if let Some(data) = &patch.data {
            self.data = data.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
    }

    pub fn patched(mut self, patch: &ItemPatch) -> Self {
        self.apply(patch);
        self
    }
}

/// A partial dataset item. `None` means "leave unchanged".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ItemData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl ItemPatch {
    pub fn data(data: ItemData) -> Self {
        Self {
            data: Some(data),
            tags: None,
        }
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            data: None,
            tags: Some(tags.into_iter().map(Into::into).collect()),
        }
    }

    /// Last-write-wins per field: keys present in `other` overwrite ours.
    pub fn merge(&mut self, other: ItemPatch) {
        if other.data.is_some() {
            self.data = other.data;
        }
        if other.tags.is_some() {
            self.tags = other.tags;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.tags.is_none()
    }
}

/// Draft status of a displayed row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    #[default]
    Unchanged,
    Added,
    Edited,
}

impl std::fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DraftStatus::Unchanged => write!(f, "unchanged"),
            DraftStatus::Added => write!(f, "added"),
            DraftStatus::Edited => write!(f, "edited"),
        }
    }
}

/// A dataset item as rendered: server snapshot plus draft overlay status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayItem {
    #[serde(flatten)]
    pub item: DatasetItem,
    pub draft_status: DraftStatus,
}

impl DisplayItem {
    pub fn new(item: DatasetItem, draft_status: DraftStatus) -> Self {
        Self { item, draft_status }
    }

    pub fn id(&self) -> &str {
        &self.item.id
    }
}

/// JSON type of a column's values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Object,
    Array,
    Boolean,
    Null,
}

impl ColumnType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ColumnType::String,
            Value::Number(_) => ColumnType::Number,
            Value::Object(_) => ColumnType::Object,
            Value::Array(_) => ColumnType::Array,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Null => ColumnType::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub types: BTreeSet<ColumnType>,
}

/// One page of a paginated list response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl<T> Page<T> {
    /// Replace `content`, keeping the rest of the response shape.
    pub fn map_content<U>(self, f: impl FnOnce(Vec<T>) -> Vec<U>) -> Page<U> {
        Page {
            content: f(self.content),
            page: self.page,
            size: self.size,
            total: self.total,
            columns: self.columns,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not_contains")]
    NotContains,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "is_empty")]
    IsEmpty,
    #[serde(rename = "is_not_empty")]
    IsNotEmpty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Id,
    Tags,
    Data,
}

/// A single structured predicate applied server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Filter {
    pub field: FilterField,
    pub operator: FilterOperator,
    /// Data field name when `field` is `Data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub value: String,
}

impl Filter {
    pub fn new(field: FilterField, operator: FilterOperator, value: impl Into<String>) -> Self {
        Self {
            field,
            operator,
            key: None,
            value: value.into(),
        }
    }

    pub fn data(key: impl Into<String>, operator: FilterOperator, value: impl Into<String>) -> Self {
        Self {
            field: FilterField::Data,
            operator,
            key: Some(key.into()),
            value: value.into(),
        }
    }
}

/// Parameters of a list call. `page` is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ListQuery {
    pub page: usize,
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            size: 100,
            search: None,
            filters: vec![],
        }
    }
}

impl ListQuery {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size,
            ..Default::default()
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = if search.is_empty() { None } else { Some(search) };
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Which items a batch call targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ItemSelection {
    /// Explicit ids.
    Ids(Vec<String>),
    /// Every item of the dataset matching the filters ("all items" mode).
    All { filters: Vec<Filter> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchUpdateRequest {
    pub selection: ItemSelection,
    pub patch: ItemPatch,
    /// Union patch tags into existing tags instead of replacing them.
    #[serde(default)]
    pub merge_tags: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchDeleteRequest {
    pub selection: ItemSelection,
}

/// Summary of a dataset held by the item service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetInfo {
    pub id: String,
    pub items_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Union `extra` into `tags`, keeping first-seen order.
pub fn union_tags(tags: &[String], extra: &[String]) -> Vec<String> {
    let mut out = tags.to_vec();
    for tag in extra {
        if !out.contains(tag) {
            out.push(tag.clone());
        }
    }
    out
}
