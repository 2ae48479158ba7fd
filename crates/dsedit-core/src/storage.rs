//! Storage layer: in-memory dataset item store with optional JSON persistence.
//!
//! Implements the list semantics the remote store applies before any draft
//! merge happens: search, filters, pagination and column inference. When a
//! data directory is configured every dataset is mirrored to
//! `<dir>/<dataset>.json` after each mutation.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info};

use crate::error::{DseditError, Result};
use crate::models::{
    union_tags, BatchDeleteRequest, BatchUpdateRequest, Column, ColumnType, DatasetInfo,
    DatasetItem, Filter, FilterField, FilterOperator, ItemPatch, ItemSelection, ListQuery, Page,
};

// ─── Directory helpers ────────────────────────────────────────────────────────

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

// ─── YAML / JSON I/O ─────────────────────────────────────────────────────────

pub fn save_yaml<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let content = serde_yaml::to_string(data)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T>
where
    T: Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    let val = serde_yaml::from_str(&content)?;
    Ok(val)
}

pub fn save_items(path: &Path, items: &[DatasetItem]) -> Result<()> {
    let content = serde_json::to_string_pretty(items)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_items(path: &Path) -> Result<Vec<DatasetItem>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Read items from a JSON array file or a JSON-lines file.
pub fn read_items_file(path: &Path) -> Result<Vec<DatasetItem>> {
    let content = fs::read_to_string(path)?;
    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&content)?);
    }
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(DseditError::from))
        .collect()
}

// ─── Dataset store ───────────────────────────────────────────────────────────

/// Thread-safe store of dataset items, keyed by dataset id.
#[derive(Debug, Default)]
pub struct DatasetStore {
    datasets: RwLock<BTreeMap<String, Vec<DatasetItem>>>,
    data_dir: Option<PathBuf>,
}

impl DatasetStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a persistent store, loading every `*.json` dataset in `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        let mut datasets = BTreeMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|n| n.to_str()) {
                datasets.insert(name.to_string(), load_items(&path)?);
            }
        }
        info!(dir = %dir.display(), datasets = datasets.len(), "Dataset store opened");
        Ok(Self {
            datasets: RwLock::new(datasets),
            data_dir: Some(dir),
        })
    }

    pub fn list_datasets(&self) -> Vec<DatasetInfo> {
        let datasets = self.read();
        datasets
            .iter()
            .map(|(id, items)| DatasetInfo {
                id: id.clone(),
                items_count: items.len(),
                last_updated_at: items.iter().filter_map(|i| i.last_updated_at).max(),
            })
            .collect()
    }

    pub fn list_items(&self, dataset_id: &str, query: &ListQuery) -> Result<Page<DatasetItem>> {
        let datasets = self.read();
        let items = datasets
            .get(dataset_id)
            .ok_or_else(|| DseditError::DatasetNotFound(dataset_id.to_string()))?;

        let matching: Vec<&DatasetItem> = items
            .iter()
            .filter(|item| matches_search(item, query.search.as_deref()))
            .filter(|item| query.filters.iter().all(|f| matches_filter(item, f)))
            .collect();

        let size = query.size.max(1);
        let page = query.page.max(1);
        let content: Vec<DatasetItem> = matching
            .iter()
            .skip((page - 1).saturating_mul(size))
            .take(size)
            .map(|item| (*item).clone())
            .collect();

        Ok(Page {
            content,
            page,
            size,
            total: matching.len(),
            columns: infer_columns(items),
        })
    }

    pub fn get_item(&self, dataset_id: &str, item_id: &str) -> Result<DatasetItem> {
        let datasets = self.read();
        datasets
            .get(dataset_id)
            .and_then(|items| items.iter().find(|i| i.id == item_id))
            .cloned()
            .ok_or_else(|| DseditError::ItemNotFound(item_id.to_string()))
    }

    /// Insert items; an item whose id already exists replaces it in place.
    /// New items are placed first, newest on top.
    pub fn create_items(&self, dataset_id: &str, new_items: Vec<DatasetItem>) -> Result<usize> {
        let now = Utc::now();
        let count = new_items.len();
        self.mutate(dataset_id, true, |items| {
            for mut item in new_items {
                if item.id.is_empty() {
                    item.id = uuid::Uuid::new_v4().to_string();
                }
                item.last_updated_at = Some(now);
                match items.iter_mut().find(|existing| existing.id == item.id) {
                    Some(existing) => {
                        item.created_at = existing.created_at;
                        *existing = item;
                    }
                    None => {
                        item.created_at.get_or_insert(now);
                        items.insert(0, item);
                    }
                }
            }
            Ok(())
        })?;
        Ok(count)
    }

    /// Patch one item, searching every dataset for its id.
    pub fn update_item(&self, item_id: &str, patch: &ItemPatch) -> Result<()> {
        let dataset_id = {
            let datasets = self.read();
            datasets
                .iter()
                .find(|(_, items)| items.iter().any(|i| i.id == item_id))
                .map(|(id, _)| id.clone())
                .ok_or_else(|| DseditError::ItemNotFound(item_id.to_string()))?
        };
        self.mutate(&dataset_id, false, |items| {
            if let Some(item) = items.iter_mut().find(|i| i.id == item_id) {
                item.apply(patch);
                item.last_updated_at = Some(Utc::now());
            }
            Ok(())
        })
    }

    pub fn batch_update(&self, dataset_id: &str, request: &BatchUpdateRequest) -> Result<usize> {
        let mut updated = 0;
        self.mutate(dataset_id, false, |items| {
            let now = Utc::now();
            for item in items.iter_mut().filter(|i| is_selected(i, &request.selection)) {
                if let Some(data) = &request.patch.data {
                    item.data = data.clone();
                }
                if let Some(tags) = &request.patch.tags {
                    item.tags = if request.merge_tags {
                        union_tags(&item.tags, tags)
                    } else {
                        tags.clone()
                    };
                }
                item.last_updated_at = Some(now);
                updated += 1;
            }
            Ok(())
        })?;
        Ok(updated)
    }

    pub fn delete_items(&self, dataset_id: &str, request: &BatchDeleteRequest) -> Result<usize> {
        let mut deleted = 0;
        self.mutate(dataset_id, false, |items| {
            let before = items.len();
            items.retain(|i| !is_selected(i, &request.selection));
            deleted = before - items.len();
            Ok(())
        })?;
        Ok(deleted)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<DatasetItem>>> {
        self.datasets.read().unwrap_or_else(|p| p.into_inner())
    }

    fn mutate<F>(&self, dataset_id: &str, create: bool, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<DatasetItem>) -> Result<()>,
    {
        validate_dataset_id(dataset_id)?;
        let mut datasets = self.datasets.write().unwrap_or_else(|p| p.into_inner());
        let existed = datasets.contains_key(dataset_id);
        if create && !existed {
            datasets.insert(dataset_id.to_string(), vec![]);
        }
        let Some(items) = datasets.get_mut(dataset_id) else {
            return Err(DseditError::DatasetNotFound(dataset_id.to_string()));
        };

        // Memory and disk move together: a failed change or write is rolled back.
        let before = items.clone();
        if let Err(e) = f(items).and_then(|()| self.persist(dataset_id, items)) {
            if existed {
                *items = before;
            } else {
                datasets.remove(dataset_id);
            }
            return Err(e);
        }
        Ok(())
    }

    fn persist(&self, dataset_id: &str, items: &[DatasetItem]) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let path = dir.join(format!("{dataset_id}.json"));
        save_items(&path, items).inspect_err(|e| {
            error!(dataset = %dataset_id, "Failed to persist dataset: {}", e);
        })
    }
}

/// Dataset ids double as file names, so they must stay inside the data dir.
pub fn validate_dataset_id(id: &str) -> Result<()> {
    let invalid = id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(DseditError::InvalidDatasetId(id.to_string()));
    }
    Ok(())
}

// ─── Query semantics ─────────────────────────────────────────────────────────

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches_search(item: &DatasetItem, search: Option<&str>) -> bool {
    let Some(needle) = search.map(str::to_lowercase) else {
        return true;
    };
    item.id.to_lowercase().contains(&needle)
        || item
            .data
            .values()
            .any(|v| value_text(v).to_lowercase().contains(&needle))
}

fn matches_filter(item: &DatasetItem, filter: &Filter) -> bool {
    let needle = filter.value.to_lowercase();
    match filter.field {
        FilterField::Id => compare_text(Some(item.id.clone()), filter.operator, &needle),
        FilterField::Tags => {
            let any = |pred: &dyn Fn(&str) -> bool| item.tags.iter().any(|t| pred(&t.to_lowercase()));
            match filter.operator {
                FilterOperator::Contains => any(&|t| t.contains(&needle)),
                FilterOperator::NotContains => !any(&|t| t.contains(&needle)),
                FilterOperator::Equal => any(&|t| t == needle),
                FilterOperator::NotEqual => !any(&|t| t == needle),
                FilterOperator::IsEmpty => item.tags.is_empty(),
                FilterOperator::IsNotEmpty => !item.tags.is_empty(),
            }
        }
        FilterField::Data => {
            let value = filter
                .key
                .as_deref()
                .and_then(|key| item.data.get(key))
                .filter(|v| !v.is_null())
                .map(value_text);
            compare_text(value, filter.operator, &needle)
        }
    }
}

fn compare_text(value: Option<String>, op: FilterOperator, needle: &str) -> bool {
    let value = value.map(|v| v.to_lowercase());
    match op {
        FilterOperator::Contains => value.is_some_and(|v| v.contains(needle)),
        FilterOperator::NotContains => !value.is_some_and(|v| v.contains(needle)),
        FilterOperator::Equal => value.is_some_and(|v| v == needle),
        FilterOperator::NotEqual => !value.is_some_and(|v| v == needle),
        FilterOperator::IsEmpty => value.map_or(true, |v| v.is_empty()),
        FilterOperator::IsNotEmpty => value.is_some_and(|v| !v.is_empty()),
    }
}

fn is_selected(item: &DatasetItem, selection: &ItemSelection) -> bool {
    match selection {
        ItemSelection::Ids(ids) => ids.iter().any(|id| id == &item.id),
        ItemSelection::All { filters } => filters.iter().all(|f| matches_filter(item, f)),
    }
}

/// Columns in first-seen order with the set of value types each carries.
pub fn infer_columns(items: &[DatasetItem]) -> Vec<Column> {
    let mut order: Vec<String> = vec![];
    let mut types: HashMap<String, Column> = HashMap::new();
    for item in items {
        for (name, value) in &item.data {
            let column = types.entry(name.clone()).or_insert_with(|| {
                order.push(name.clone());
                Column {
                    name: name.clone(),
                    types: Default::default(),
                }
            });
            column.types.insert(ColumnType::of(value));
        }
    }
    order
        .into_iter()
        .filter_map(|name| types.remove(&name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str, data: Value, tags: &[&str]) -> DatasetItem {
        DatasetItem::new(id, data.as_object().cloned().unwrap_or_default()).with_tags(tags.iter().copied())
    }

    fn seeded() -> DatasetStore {
        let store = DatasetStore::in_memory();
        store
            .create_items(
                "ds",
                vec![
                    item("c", json!({"input": "gamma", "score": 3}), &[]),
                    item("b", json!({"input": "beta", "score": 2}), &["gold"]),
                    item("a", json!({"input": "Alpha", "meta": {"k": 1}}), &["gold", "new"]),
                ],
            )
            .unwrap();
        store
    }

    fn ids(page: &Page<DatasetItem>) -> Vec<&str> {
        page.content.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn new_items_are_listed_newest_first() {
        let store = seeded();
        let page = store.list_items("ds", &ListQuery::default()).unwrap();
        assert_eq!(ids(&page), vec!["a", "b", "c"]);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn pagination_slices_after_filtering() {
        let store = seeded();
        let page = store.list_items("ds", &ListQuery::new(2, 2)).unwrap();
        assert_eq!(ids(&page), vec!["c"]);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn search_is_case_insensitive_over_data() {
        let store = seeded();
        let page = store
            .list_items("ds", &ListQuery::default().with_search("alpha"))
            .unwrap();
        assert_eq!(ids(&page), vec!["a"]);
    }

    #[test]
    fn filters_on_tags_and_data() {
        let store = seeded();
        let q = ListQuery::default()
            .with_filter(Filter::new(FilterField::Tags, FilterOperator::Equal, "gold"))
            .with_filter(Filter::data("score", FilterOperator::Equal, "2"));
        assert_eq!(ids(&store.list_items("ds", &q).unwrap()), vec!["b"]);

        let q = ListQuery::default().with_filter(Filter::data("meta", FilterOperator::IsEmpty, ""));
        assert_eq!(ids(&store.list_items("ds", &q).unwrap()), vec!["b", "c"]);
    }

    #[test]
    fn columns_collect_types_in_first_seen_order() {
        let store = seeded();
        let page = store.list_items("ds", &ListQuery::default()).unwrap();
        let names: Vec<&str> = page.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["input", "meta", "score"]);
        assert!(page.columns[1].types.contains(&ColumnType::Object));
    }

    #[test]
    fn batch_update_merges_or_replaces_tags() {
        let store = seeded();
        let merge = BatchUpdateRequest {
            selection: ItemSelection::Ids(vec!["a".into(), "c".into()]),
            patch: ItemPatch::tags(["new", "x"]),
            merge_tags: true,
        };
        assert_eq!(store.batch_update("ds", &merge).unwrap(), 2);
        assert_eq!(store.get_item("ds", "a").unwrap().tags, vec!["gold", "new", "x"]);
        assert_eq!(store.get_item("ds", "c").unwrap().tags, vec!["new", "x"]);

        let replace = BatchUpdateRequest {
            selection: ItemSelection::All {
                filters: vec![Filter::new(FilterField::Tags, FilterOperator::Contains, "gold")],
            },
            patch: ItemPatch::tags(["only"]),
            merge_tags: false,
        };
        assert_eq!(store.batch_update("ds", &replace).unwrap(), 2);
        assert_eq!(store.get_item("ds", "b").unwrap().tags, vec!["only"]);
    }

    #[test]
    fn delete_all_with_filters() {
        let store = seeded();
        let request = BatchDeleteRequest {
            selection: ItemSelection::All {
                filters: vec![Filter::new(FilterField::Tags, FilterOperator::IsNotEmpty, "")],
            },
        };
        assert_eq!(store.delete_items("ds", &request).unwrap(), 2);
        let page = store.list_items("ds", &ListQuery::default()).unwrap();
        assert_eq!(ids(&page), vec!["c"]);
    }

    #[test]
    fn unknown_dataset_is_an_error() {
        let store = DatasetStore::in_memory();
        assert!(matches!(
            store.list_items("nope", &ListQuery::default()),
            Err(DseditError::DatasetNotFound(_))
        ));
    }

    #[test]
    fn persistent_store_reloads() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let store = DatasetStore::open(tmp.path()).unwrap();
            store.create_items("ds", vec![item("a", json!({"q": 1}), &[])]).unwrap();
        }
        let store = DatasetStore::open(tmp.path()).unwrap();
        assert_eq!(store.get_item("ds", "a").unwrap().data["q"], 1);
    }

    #[test]
    fn huge_page_number_yields_empty_page() {
        let store = seeded();
        let page = store.list_items("ds", &ListQuery::new(usize::MAX, 100)).unwrap();
        assert!(page.content.is_empty());
        assert_eq!(page.total, 3);
    }

    #[test]
    fn dataset_ids_cannot_leave_data_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let data_dir = tmp.path().join("data");
        let store = DatasetStore::open(&data_dir).unwrap();

        for bad in ["../escaped", "a/b", "a\\b", "..", ""] {
            let err = store.create_items(bad, vec![item("x", json!({}), &[])]).unwrap_err();
            assert!(matches!(err, DseditError::InvalidDatasetId(_)), "{bad:?}");
        }
        assert!(!tmp.path().join("escaped.json").exists());
        assert!(store.list_datasets().is_empty());
    }

    #[test]
    fn failed_write_rolls_back() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = DatasetStore::open(tmp.path()).unwrap();
        store.create_items("ds", vec![item("a", json!({"q": 1}), &[])]).unwrap();

        // A directory where the dataset file should be makes the write fail.
        std::fs::remove_file(tmp.path().join("ds.json")).unwrap();
        std::fs::create_dir(tmp.path().join("ds.json")).unwrap();

        assert!(store.create_items("ds", vec![item("b", json!({}), &[])]).is_err());
        assert!(store.update_item("a", &ItemPatch::tags(["t"])).is_err());
        let page = store.list_items("ds", &ListQuery::default()).unwrap();
        assert_eq!(ids(&page), vec!["a"]);
        assert!(page.content[0].tags.is_empty());

        std::fs::create_dir(tmp.path().join("fresh.json")).unwrap();
        assert!(store.create_items("fresh", vec![item("c", json!({}), &[])]).is_err());
        assert!(store.list_items("fresh", &ListQuery::default()).is_err());
    }
}
