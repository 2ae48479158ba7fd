//! Remote dataset-items collaborator.
//!
//! [`DatasetItemsApi`] is the seam between the state layer and whatever
//! holds the items. [`HttpItemsApi`] talks to a dsedit-compatible HTTP
//! service; [`LocalItemsApi`] serves straight from a [`DatasetStore`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DseditError, Result};
use crate::models::{
    BatchDeleteRequest, BatchUpdateRequest, DatasetInfo, DatasetItem, ItemPatch, ListQuery, Page,
};
use crate::storage::DatasetStore;

/// Shared, type-erased API handle.
pub type ApiHandle = Arc<dyn DatasetItemsApi>;

#[async_trait]
pub trait DatasetItemsApi: Send + Sync {
    async fn list_items(&self, dataset_id: &str, query: &ListQuery) -> Result<Page<DatasetItem>>;

    async fn create_items(&self, dataset_id: &str, items: Vec<DatasetItem>) -> Result<()>;

    async fn update_item(&self, item_id: &str, patch: &ItemPatch) -> Result<()>;

    async fn batch_update(&self, dataset_id: &str, request: &BatchUpdateRequest) -> Result<()>;

    async fn delete_items(&self, dataset_id: &str, request: &BatchDeleteRequest) -> Result<()>;
}

// ─── HTTP ────────────────────────────────────────────────────────────────────

/// Body of `PUT /api/datasets/{dataset}/items`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateItemsBody {
    pub items: Vec<DatasetItem>,
}

/// Query string of `GET /api/datasets/{dataset}/items`; filters travel JSON-encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListItemsParams {
    pub page: Option<usize>,
    pub size: Option<usize>,
    pub search: Option<String>,
    pub filters: Option<String>,
}

impl ListItemsParams {
    pub fn from_query(query: &ListQuery) -> Result<Self> {
        let filters = if query.filters.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&query.filters)?)
        };
        Ok(Self {
            page: Some(query.page),
            size: Some(query.size),
            search: query.search.clone(),
            filters,
        })
    }

    pub fn into_query(self) -> Result<ListQuery> {
        let defaults = ListQuery::default();
        let filters = match self.filters.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => vec![],
        };
        Ok(ListQuery {
            page: self.page.unwrap_or(defaults.page),
            size: self.size.unwrap_or(defaults.size),
            search: self.search.filter(|s| !s.is_empty()),
            filters,
        })
    }
}

/// Client for a dsedit-compatible item service.
#[derive(Debug, Clone)]
pub struct HttpItemsApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpItemsApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetInfo>> {
        let resp = self.client.get(self.url("/datasets")).send().await?;
        Ok(check(resp).await?.json().await?)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(DseditError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl DatasetItemsApi for HttpItemsApi {
    async fn list_items(&self, dataset_id: &str, query: &ListQuery) -> Result<Page<DatasetItem>> {
        let params = ListItemsParams::from_query(query)?;
        let resp = self
            .client
            .get(self.url(&format!("/datasets/{dataset_id}/items")))
            .query(&params)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn create_items(&self, dataset_id: &str, items: Vec<DatasetItem>) -> Result<()> {
        debug!(dataset = %dataset_id, count = items.len(), "PUT items");
        let resp = self
            .client
            .put(self.url(&format!("/datasets/{dataset_id}/items")))
            .json(&CreateItemsBody { items })
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn update_item(&self, item_id: &str, patch: &ItemPatch) -> Result<()> {
        let resp = self
            .client
            .patch(self.url(&format!("/items/{item_id}")))
            .json(patch)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn batch_update(&self, dataset_id: &str, request: &BatchUpdateRequest) -> Result<()> {
        let resp = self
            .client
            .patch(self.url(&format!("/datasets/{dataset_id}/items/batch")))
            .json(request)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn delete_items(&self, dataset_id: &str, request: &BatchDeleteRequest) -> Result<()> {
        let resp = self
            .client
            .post(self.url(&format!("/datasets/{dataset_id}/items/delete")))
            .json(request)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

// ─── Local ───────────────────────────────────────────────────────────────────

/// In-process API backed by a [`DatasetStore`].
#[derive(Debug, Clone, Default)]
pub struct LocalItemsApi {
    store: Arc<DatasetStore>,
}

impl LocalItemsApi {
    pub fn new(store: Arc<DatasetStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DatasetStore> {
        &self.store
    }
}

#[async_trait]
impl DatasetItemsApi for LocalItemsApi {
    async fn list_items(&self, dataset_id: &str, query: &ListQuery) -> Result<Page<DatasetItem>> {
        self.store.list_items(dataset_id, query)
    }

    async fn create_items(&self, dataset_id: &str, items: Vec<DatasetItem>) -> Result<()> {
        self.store.create_items(dataset_id, items).map(|_| ())
    }

    async fn update_item(&self, item_id: &str, patch: &ItemPatch) -> Result<()> {
        self.store.update_item(item_id, patch)
    }

    async fn batch_update(&self, dataset_id: &str, request: &BatchUpdateRequest) -> Result<()> {
        self.store.batch_update(dataset_id, request).map(|_| ())
    }

    async fn delete_items(&self, dataset_id: &str, request: &BatchDeleteRequest) -> Result<()> {
        self.store.delete_items(dataset_id, request).map(|_| ())
    }
}
