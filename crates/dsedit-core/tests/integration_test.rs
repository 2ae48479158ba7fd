//! Integration tests for dsedit-core.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::{advance, sleep, Instant};

use dsedit_core::api::{ApiHandle, DatasetItemsApi, LocalItemsApi};
use dsedit_core::error::Result;
use dsedit_core::models::{BatchDeleteRequest, BatchUpdateRequest, ItemSelection};
use dsedit_core::{
    AutosaveController, DatasetItem, DatasetSession, DraftStatus, DseditError, EditMode, ItemData,
    ItemPatch, ListQuery, Page, SavePhase, SessionConfig,
};

const DEBOUNCE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq)]
enum Call {
    List,
    Create(usize),
    Update(String, ItemPatch),
    BatchUpdate(BatchUpdateRequest),
    Delete(BatchDeleteRequest),
}

/// Local store wrapped with a call log, failure switch and update latency.
#[derive(Default)]
struct RecordingApi {
    inner: LocalItemsApi,
    calls: Mutex<Vec<Call>>,
    fail: AtomicBool,
    update_latency: Mutex<Option<Duration>>,
    list_latency: Mutex<Option<Duration>>,
    updates_in_flight: AtomicUsize,
    max_updates_in_flight: AtomicUsize,
}

impl RecordingApi {
    fn record(&self, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(DseditError::Api {
                status: 500,
                message: "boom".into(),
            });
        }
        Ok(())
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn updates(&self) -> Vec<(String, ItemPatch)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(id, patch) => Some((id, patch)),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn item(&self, id: &str) -> Option<DatasetItem> {
        self.inner.store().get_item("ds", id).ok()
    }
}

#[async_trait]
impl DatasetItemsApi for RecordingApi {
    async fn list_items(&self, dataset_id: &str, query: &ListQuery) -> Result<Page<DatasetItem>> {
        self.record(Call::List)?;
        let page = self.inner.list_items(dataset_id, query).await;
        // The page is read before the delay, so it can be outdated on arrival.
        let latency = *self.list_latency.lock().unwrap();
        if let Some(latency) = latency {
            sleep(latency).await;
        }
        page
    }

    async fn create_items(&self, dataset_id: &str, items: Vec<DatasetItem>) -> Result<()> {
        self.record(Call::Create(items.len()))?;
        self.inner.create_items(dataset_id, items).await
    }

    async fn update_item(&self, item_id: &str, patch: &ItemPatch) -> Result<()> {
        let now = self.updates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_updates_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.update_latency.lock().unwrap();
        if let Some(latency) = latency {
            sleep(latency).await;
        }
        self.updates_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record(Call::Update(item_id.to_string(), patch.clone()))?;
        self.inner.update_item(item_id, patch).await
    }

    async fn batch_update(&self, dataset_id: &str, request: &BatchUpdateRequest) -> Result<()> {
        self.record(Call::BatchUpdate(request.clone()))?;
        self.inner.batch_update(dataset_id, request).await
    }

    async fn delete_items(&self, dataset_id: &str, request: &BatchDeleteRequest) -> Result<()> {
        self.record(Call::Delete(request.clone()))?;
        self.inner.delete_items(dataset_id, request).await
    }
}

fn data(v: Value) -> ItemData {
    v.as_object().cloned().unwrap_or_default()
}

fn item(id: &str, v: Value, tags: &[&str]) -> DatasetItem {
    DatasetItem::new(id, data(v)).with_tags(tags.iter().copied())
}

/// Dataset "ds" listed as [a, b, c].
fn seeded_api() -> Arc<RecordingApi> {
    let api = RecordingApi::default();
    api.inner
        .store()
        .create_items(
            "ds",
            vec![
                item("c", json!({"q": "gamma"}), &[]),
                item("b", json!({"q": "beta"}), &["gold"]),
                item("a", json!({"q": "alpha"}), &[]),
            ],
        )
        .unwrap();
    Arc::new(api)
}

fn controller(api: &Arc<RecordingApi>) -> AutosaveController {
    let handle: ApiHandle = api.clone();
    AutosaveController::new(handle, "ds", "a", DEBOUNCE)
}

fn session(api: &Arc<RecordingApi>, config: SessionConfig) -> DatasetSession {
    let handle: ApiHandle = api.clone();
    DatasetSession::new(handle, "ds", config)
}

fn ids<T>(page: &Page<T>, id: impl Fn(&T) -> &str) -> Vec<String> {
    page.content.iter().map(|r| id(r).to_string()).collect()
}

// ─── Autosave ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_autosave_collapses_rapid_changes() {
    let api = seeded_api();
    let ctl = controller(&api);

    for i in 0..5 {
        ctl.on_field_change(data(json!({ "q": format!("v{i}") })));
        advance(Duration::from_millis(40)).await;
    }
    assert_eq!(ctl.status().phase, SavePhase::Pending);
    assert!(api.updates().is_empty(), "nothing is sent while edits keep coming");

    sleep(Duration::from_millis(1100)).await;

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "a");
    assert_eq!(updates[0].1.data.as_ref().unwrap()["q"], "v4");

    let status = ctl.status();
    assert_eq!(status.phase, SavePhase::Idle);
    assert!(status.last_saved_at.is_some());
    assert!(!status.has_error);
    assert_eq!(api.item("a").unwrap().data["q"], "v4");
}

#[tokio::test(start_paused = true)]
async fn test_autosave_flush_skips_the_delay() {
    let api = seeded_api();
    let ctl = controller(&api);
    let started = Instant::now();

    ctl.on_field_change(data(json!({"q": "flushed"})));
    let handle = ctl.flush_pending_save().expect("a save was pending");
    assert_eq!(ctl.status().phase, SavePhase::Saving);

    handle.await.unwrap();
    assert!(started.elapsed() < DEBOUNCE);
    assert_eq!(api.updates().len(), 1);
    assert_eq!(ctl.status().phase, SavePhase::Idle);

    // The aborted timer must not fire a second save.
    sleep(Duration::from_secs(3)).await;
    assert_eq!(api.updates().len(), 1);
    assert!(ctl.flush_pending_save().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_delete() {
    let api = seeded_api();
    let ctl = controller(&api);

    ctl.on_field_change(data(json!({"q": "doomed"})));
    ctl.delete_item().await.unwrap();
    sleep(Duration::from_secs(3)).await;

    assert_eq!(api.updates().len(), 0);
    assert_eq!(api.count(|c| matches!(c, Call::Delete(_))), 1);
    assert!(api.item("a").is_none());
    assert_eq!(ctl.status().phase, SavePhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_autosave_error_is_sticky_until_success() {
    let api = seeded_api();
    let ctl = controller(&api);

    api.fail.store(true, Ordering::SeqCst);
    ctl.on_field_change(data(json!({"q": "x"})));
    sleep(Duration::from_millis(1500)).await;
    assert!(ctl.status().has_error);
    assert!(ctl.status().last_error.is_some());

    // No automatic retry.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(api.updates().len(), 1);
    assert!(ctl.status().has_error);

    api.fail.store(false, Ordering::SeqCst);
    ctl.on_field_change(data(json!({"q": "y"})));
    sleep(Duration::from_millis(1500)).await;
    assert!(!ctl.status().has_error);

    ctl.reset_save_state();
    assert_eq!(ctl.status().last_saved_at, None);
}

#[tokio::test(start_paused = true)]
async fn test_autosave_one_update_in_flight() {
    let api = seeded_api();
    *api.update_latency.lock().unwrap() = Some(Duration::from_millis(2000));
    let ctl = controller(&api);

    ctl.on_field_change(data(json!({"q": "first"})));
    sleep(Duration::from_millis(1100)).await;
    assert_eq!(ctl.status().phase, SavePhase::Saving);

    ctl.on_field_change(data(json!({"q": "second"})));
    sleep(Duration::from_secs(6)).await;

    let updates = api.updates();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[1].1.data.as_ref().unwrap()["q"], "second");
    assert_eq!(api.max_updates_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(api.item("a").unwrap().data["q"], "second");
}

// ─── Paged fetch adapter ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_view_merges_draft_and_caches_pages() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default().with_draft_mode(true));
    let q = session.query(1);

    let view = session.view(&q).await.unwrap();
    assert_eq!(ids(&view, |r| r.id()), vec!["a", "b", "c"]);

    let draft = session.draft();
    let new_id = draft.add_item(item("", json!({"q": "new"}), &[]));
    draft.edit_item("b", ItemPatch::tags(["edited"]));
    draft.delete_item("c");

    // Draft changes re-derive the view without another fetch.
    let view = session.items().current_view(&q).unwrap();
    assert_eq!(ids(&view, |r| r.id()), vec![new_id.as_str(), "a", "b"]);
    assert_eq!(view.content[0].draft_status, DraftStatus::Added);
    assert_eq!(view.content[2].draft_status, DraftStatus::Edited);
    assert_eq!(view.content[2].item.tags, vec!["edited"]);
    assert_eq!(view.total, 3, "server total is passed through");

    let again = session.view(&q).await.unwrap();
    assert_eq!(again, view);
    assert_eq!(api.count(|c| *c == Call::List), 1);

    // The cached server page is untouched by the overlay.
    let server = session.items().fetch(&q).await.unwrap();
    assert_eq!(server.content[1].tags, vec!["gold"]);

    advance(Duration::from_secs(31)).await;
    session.view(&q).await.unwrap();
    assert_eq!(api.count(|c| *c == Call::List), 2, "stale page is refetched");
}

#[tokio::test]
async fn test_view_passthrough_outside_draft_mode() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default());
    let q = session.query(1);

    // Left over from an earlier draft; ignored while draft mode is off.
    session.draft().edit_item("a", ItemPatch::tags(["ignored"]));

    let view = session.view(&q).await.unwrap();
    assert!(view.content.iter().all(|r| r.draft_status == DraftStatus::Unchanged));
    assert!(view.content[0].item.tags.is_empty());
}

#[tokio::test]
async fn test_fetch_error_passthrough() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default().with_draft_mode(true));
    let q = session.query(1);
    session.view(&q).await.unwrap();

    api.fail.store(true, Ordering::SeqCst);
    let err = session.items().refetch(&q).await.unwrap_err();
    assert!(matches!(err, DseditError::Api { status: 500, .. }));

    // Previously fetched page is still there.
    assert_eq!(session.items().current_view(&q).unwrap().content.len(), 3);

    session.items().invalidate();
    assert!(session.view(&q).await.is_err());
    assert!(session.items().current_view(&q).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_overtaken_by_invalidate_is_not_cached() {
    let api = seeded_api();
    *api.list_latency.lock().unwrap() = Some(Duration::from_millis(500));
    let session = session(&api, SessionConfig::default());
    let q = session.query(1);

    let (page, ()) = tokio::join!(session.items().fetch(&q), async {
        sleep(Duration::from_millis(100)).await;
        let request = BatchDeleteRequest {
            selection: ItemSelection::Ids(vec!["a".into()]),
        };
        api.inner.store().delete_items("ds", &request).unwrap();
        session.items().invalidate();
    });

    // The caller still gets what it asked for, but it is not kept.
    assert_eq!(page.unwrap().content.len(), 3);
    assert!(session.items().current_view(&q).is_none());

    let fresh = session.view(&q).await.unwrap();
    assert_eq!(ids(&fresh, |r| r.id()), vec!["b", "c"]);
    assert_eq!(api.count(|c| *c == Call::List), 2);
}

// ─── Session ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_commit_sends_draft_and_resets() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default().with_draft_mode(true));

    let draft = session.draft();
    let new_id = draft.add_item(item("", json!({"q": "new"}), &["fresh"]));
    draft.edit_item("b", ItemPatch::data(data(json!({"q": "BETA"}))));
    draft.delete_item("c");

    let summary = session.commit().await.unwrap();
    assert_eq!((summary.created, summary.updated, summary.deleted), (1, 1, 1));

    assert_eq!(api.item(&new_id).unwrap().tags, vec!["fresh"]);
    assert_eq!(api.item("b").unwrap().data["q"], "BETA");
    assert!(api.item("c").is_none());
    assert!(!session.draft().snapshot().has_changes());

    let view = session.view(&session.query(1)).await.unwrap();
    assert_eq!(ids(&view, |r| r.id()), vec![new_id.as_str(), "a", "b"]);
    assert!(view.content.iter().all(|r| r.draft_status == DraftStatus::Unchanged));
}

#[tokio::test]
async fn test_failed_commit_keeps_draft() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default().with_draft_mode(true));
    session.draft().delete_item("a");

    api.fail.store(true, Ordering::SeqCst);
    assert!(session.commit().await.is_err());
    assert!(session.draft().snapshot().is_deleted("a"));

    api.fail.store(false, Ordering::SeqCst);
    assert_eq!(session.commit().await.unwrap().deleted, 1);
    assert!(session.commit().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_changes_staged_during_commit_survive() {
    let api = seeded_api();
    *api.update_latency.lock().unwrap() = Some(Duration::from_millis(500));
    let session = session(&api, SessionConfig::default().with_draft_mode(true));
    session.draft().edit_item("b", ItemPatch::tags(["first"]));

    let (committed, ()) = tokio::join!(session.commit(), async {
        sleep(Duration::from_millis(100)).await;
        session.draft().edit_item("b", ItemPatch::tags(["second"]));
        session.draft().delete_item("c");
    });
    assert_eq!(committed.unwrap().updated, 1);
    assert_eq!(api.item("b").unwrap().tags, vec!["first"]);

    let state = session.draft().snapshot();
    assert!(state.is_draft_mode);
    assert_eq!(state.edited_items["b"], ItemPatch::tags(["second"]));
    assert!(state.is_deleted("c"));

    let summary = session.commit().await.unwrap();
    assert_eq!((summary.updated, summary.deleted), (1, 1));
    assert_eq!(api.item("b").unwrap().tags, vec!["second"]);
    assert!(api.item("c").is_none());
    assert!(!session.draft().snapshot().has_changes());
}

#[tokio::test]
async fn test_toggling_draft_mode_discards() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default());
    session.set_draft_mode(true);
    session.draft().delete_item("a");
    session.set_draft_mode(false);
    session.set_draft_mode(true);
    assert!(!session.draft().snapshot().has_changes());
}

#[tokio::test]
async fn test_bulk_tags_all_selected_uses_filters() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default());
    let q = session
        .query(1)
        .with_filter(dsedit_core::Filter::new(
            dsedit_core::FilterField::Tags,
            dsedit_core::FilterOperator::Contains,
            "gold",
        ));

    session.draft().set_all_items_selected(true);
    session.bulk_add_tags(&q, &[], &["reviewed".to_string()]).await.unwrap();

    let calls = api.calls();
    let Some(Call::BatchUpdate(request)) = calls.last() else {
        panic!("expected a batch update, got {calls:?}");
    };
    assert!(matches!(request.selection, ItemSelection::All { .. }));
    assert!(request.merge_tags);
    assert_eq!(api.item("b").unwrap().tags, vec!["gold", "reviewed"]);
    assert!(api.item("a").unwrap().tags.is_empty());
}

#[tokio::test]
async fn test_bulk_actions_in_draft_mode_are_staged() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default().with_draft_mode(true));
    let q = session.query(1);

    session
        .bulk_add_tags(&q, &["b".to_string()], &["x".to_string()])
        .await
        .unwrap();
    session.bulk_delete(&q, &["a".to_string()]).await.unwrap();

    assert_eq!(api.count(|c| matches!(c, Call::BatchUpdate(_) | Call::Delete(_))), 0);
    let view = session.items().current_view(&q).unwrap();
    assert_eq!(ids(&view, |r| r.id()), vec!["b", "c"]);
    assert_eq!(view.content[0].item.tags, vec!["gold", "x"]);
}

// ─── Editor ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_manual_editor_guards_navigation() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default().with_autosave(false));
    let a = api.item("a").unwrap();
    let b = api.item("b").unwrap();

    let mut editor = session.open_editor(&a);
    assert_eq!(editor.mode(), EditMode::Manual);
    editor.set_value("q", "changed").unwrap();

    assert!(matches!(editor.navigate(&b, false).await, Err(DseditError::UnsavedChanges)));
    editor.save().await.unwrap();
    assert!(!editor.is_dirty());
    assert_eq!(api.item("a").unwrap().data["q"], "changed");

    editor.navigate(&b, false).await.unwrap();
    assert_eq!(editor.item_id(), "b");
}

#[tokio::test(start_paused = true)]
async fn test_autosave_editor_flushes_on_navigate() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default());
    let a = api.item("a").unwrap();
    let b = api.item("b").unwrap();
    let started = Instant::now();

    let mut editor = session.open_editor(&a);
    assert_eq!(editor.mode(), EditMode::Autosave);
    editor.set_value("q", "typed").unwrap();
    assert_eq!(editor.save_status().unwrap().phase, SavePhase::Pending);

    editor.navigate(&b, false).await.unwrap();
    assert!(started.elapsed() < DEBOUNCE);
    assert_eq!(api.item("a").unwrap().data["q"], "typed");
    assert_eq!(editor.item_id(), "b");
    assert_eq!(editor.save_status().unwrap().phase, SavePhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_autosave_editor_delete_cancels_pending_save() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default());
    let a = api.item("a").unwrap();

    let mut editor = session.open_editor(&a);
    editor.set_value("q", "never sent").unwrap();
    assert_eq!(editor.save_status().unwrap().phase, SavePhase::Pending);

    editor.delete().await.unwrap();
    sleep(DEBOUNCE * 3).await;

    assert!(api.updates().is_empty());
    assert_eq!(api.count(|c| matches!(c, Call::Delete(_))), 1);
    assert!(api.item("a").is_none());
    assert_eq!(editor.save_status().unwrap().phase, SavePhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_navigate_waits_for_save_started_by_timer() {
    let api = seeded_api();
    *api.update_latency.lock().unwrap() = Some(Duration::from_millis(500));
    let session = session(&api, SessionConfig::default());
    let a = api.item("a").unwrap();
    let b = api.item("b").unwrap();
    let started = Instant::now();

    let mut editor = session.open_editor(&a);
    editor.set_value("q", "typed").unwrap();
    sleep(DEBOUNCE + Duration::from_millis(10)).await;
    assert_eq!(editor.save_status().unwrap().phase, SavePhase::Saving);

    editor.navigate(&b, false).await.unwrap();

    assert!(started.elapsed() >= DEBOUNCE + Duration::from_millis(500));
    assert_eq!(api.item("a").unwrap().data["q"], "typed");
    assert_eq!(api.updates().len(), 1);
    assert_eq!(editor.item_id(), "b");
}

#[tokio::test]
async fn test_draft_editor_stages_changes() {
    let api = seeded_api();
    let session = session(&api, SessionConfig::default().with_draft_mode(true));
    let q = session.query(1);
    let view = session.view(&q).await.unwrap();

    let mut editor = session.open_editor(&view.content[0].item);
    assert_eq!(editor.mode(), EditMode::Draft);
    editor.set_value("q", "staged").unwrap();
    editor.delete().await.unwrap();

    // Deleting in draft mode drops the staged edit too.
    let state = session.draft().snapshot();
    assert!(state.is_deleted("a"));
    assert!(state.edited_items.is_empty());
    assert!(api.updates().is_empty());
}

#[tokio::test]
async fn test_editor_rejects_invalid_json() {
    let api = seeded_api();
    api.inner
        .store()
        .create_items("ds", vec![item("j", json!({"payload": {"a": 1, "b": [2, 3]}}), &[])])
        .unwrap();
    let session = session(&api, SessionConfig::default().with_autosave(false));
    let mut editor = session.open_editor(&api.item("j").unwrap());

    editor.set_value("payload", "{oops").unwrap();
    assert!(matches!(editor.save().await, Err(DseditError::Validation(_))));
    assert!(api.updates().is_empty());

    editor.set_value("payload", "{\"a\": 2}").unwrap();
    editor.save().await.unwrap();
    assert_eq!(api.item("j").unwrap().data["payload"], json!({"a": 2}));
}
