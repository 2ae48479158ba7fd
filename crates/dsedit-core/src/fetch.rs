//! Paged fetch adapter: the remote list call with the draft overlaid.
//!
//! Server pages are cached per query and reused until they go stale. The
//! merged view is memoized on `(query, fetch generation, draft revision)`, so
//! it is recomputed exactly when either the page or the draft changed. The
//! cached server page itself is never modified.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api::ApiHandle;
use crate::draft::SharedDraftStore;
use crate::error::Result;
use crate::merge::{merge_items, passthrough};
use crate::models::{DatasetItem, DisplayItem, ListQuery, Page};

struct CachedPage {
    page: Page<DatasetItem>,
    fetched_at: Instant,
    generation: u64,
}

struct Memo {
    query: ListQuery,
    generation: u64,
    draft_revision: u64,
    view: Page<DisplayItem>,
}

#[derive(Default)]
struct FetchCache {
    pages: HashMap<ListQuery, CachedPage>,
    next_generation: u64,
    /// Bumped by `invalidate`; a fetch started under an older epoch is not cached.
    epoch: u64,
    memo: Option<Memo>,
}

pub struct PagedItems {
    api: ApiHandle,
    draft: SharedDraftStore,
    dataset_id: String,
    stale_time: Duration,
    cache: Mutex<FetchCache>,
}

impl PagedItems {
    pub fn new(
        api: ApiHandle,
        draft: SharedDraftStore,
        dataset_id: impl Into<String>,
        stale_time: Duration,
    ) -> Self {
        Self {
            api,
            draft,
            dataset_id: dataset_id.into(),
            stale_time,
            cache: Mutex::new(FetchCache::default()),
        }
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    /// The server page for `query`, from cache while fresh.
    pub async fn fetch(&self, query: &ListQuery) -> Result<Page<DatasetItem>> {
        self.load(query, false).await.map(|(_, page)| page)
    }

    /// Fetch `query` from the server regardless of cache freshness.
    pub async fn refetch(&self, query: &ListQuery) -> Result<Page<DatasetItem>> {
        self.load(query, true).await.map(|(_, page)| page)
    }

    /// The merged page for `query`. Fetch errors are returned as-is.
    pub async fn view(&self, query: &ListQuery) -> Result<Page<DisplayItem>> {
        let (generation, page) = self.load(query, false).await?;
        Ok(self.derive(query, generation, page))
    }

    /// Re-derive the view from the cached page without touching the network.
    /// Returns `None` when `query` has never been fetched.
    pub fn current_view(&self, query: &ListQuery) -> Option<Page<DisplayItem>> {
        let (generation, page) = {
            let cache = self.cache();
            let cached = cache.pages.get(query)?;
            (cached.generation, cached.page.clone())
        };
        Some(self.derive(query, generation, page))
    }

    /// Drop every cached page; the next `view`/`fetch` hits the server.
    pub fn invalidate(&self) {
        let mut cache = self.cache();
        cache.pages.clear();
        cache.memo = None;
        cache.epoch += 1;
        debug!(dataset = %self.dataset_id, "Page cache invalidated");
    }

    async fn load(&self, query: &ListQuery, force: bool) -> Result<(u64, Page<DatasetItem>)> {
        let epoch = {
            let cache = self.cache();
            if !force {
                if let Some(cached) = cache.pages.get(query) {
                    if cached.fetched_at.elapsed() < self.stale_time {
                        return Ok((cached.generation, cached.page.clone()));
                    }
                }
            }
            cache.epoch
        };

        let page = match self.api.list_items(&self.dataset_id, query).await {
            Ok(page) => page,
            Err(e) => {
                warn!(dataset = %self.dataset_id, page = query.page, "Item fetch failed: {}", e);
                return Err(e);
            }
        };

        let mut cache = self.cache();
        cache.next_generation += 1;
        let generation = cache.next_generation;
        if cache.epoch != epoch {
            debug!(dataset = %self.dataset_id, page = query.page, "Page invalidated mid-fetch, not cached");
            return Ok((generation, page));
        }
        cache.pages.insert(
            query.clone(),
            CachedPage {
                page: page.clone(),
                fetched_at: Instant::now(),
                generation,
            },
        );
        debug!(dataset = %self.dataset_id, page = query.page, total = page.total, "Page fetched");
        Ok((generation, page))
    }

    fn derive(&self, query: &ListQuery, generation: u64, page: Page<DatasetItem>) -> Page<DisplayItem> {
        // Read the draft now, not when the fetch started.
        let (draft_revision, draft) = {
            let store = self.draft.lock();
            (store.revision(), store.snapshot())
        };

        let mut cache = self.cache();
        if let Some(memo) = &cache.memo {
            if memo.query == *query && memo.generation == generation && memo.draft_revision == draft_revision {
                return memo.view.clone();
            }
        }

        let view = if draft.is_draft_mode {
            let merged = merge_items(&page.content, &draft);
            page.map_content(|_| merged)
        } else {
            page.map_content(passthrough)
        };

        cache.memo = Some(Memo {
            query: query.clone(),
            generation,
            draft_revision,
            view: view.clone(),
        });
        view
    }

    fn cache(&self) -> MutexGuard<'_, FetchCache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }
}
