#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use folio_core::{pages_for, Filter, Order, PagedResponse, Pagination, PAGE_SIZES};
use folio_pager::{PageFetcher, Pager, PagerConfig, RequestOutcome};
use serde_json::json;

type Call = (Pagination, Filter);

/// Serves the integers `0..total`, recording every call.
struct Recorder {
    total: Mutex<u64>,
    calls: Mutex<Vec<Call>>,
    fail: AtomicBool,
}

impl Recorder {
    fn new(total: u64) -> Arc<Self> {
        Arc::new(Self { total: Mutex::new(total), calls: Mutex::new(Vec::new()), fail: AtomicBool::new(false) })
    }

    fn calls(&self) -> Vec<Call> { self.calls.lock().unwrap().clone() }
    fn set_total(&self, n: u64) { *self.total.lock().unwrap() = n; }
}

#[async_trait::async_trait]
impl PageFetcher<(), u64> for Recorder {
    async fn fetch(&self, _ctx: &(), p: Pagination, filter: Filter) -> anyhow::Result<PagedResponse<u64>> {
        self.calls.lock().unwrap().push((p, filter));
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("503 service unavailable");
        }
        let total = *self.total.lock().unwrap();
        let size = u64::from(p.page_size);
        let start = u64::from(p.page.saturating_sub(1)) * size;
        let end = (start + size).min(total);
        Ok(PagedResponse {
            page: p.page,
            pages: pages_for(total, p.page_size),
            results: total,
            data: (start.min(end)..end).collect(),
        })
    }
}

fn pager(rec: &Arc<Recorder>) -> Pager<u64> {
    Pager::with_config((), rec.clone(), PagerConfig::default())
}

fn obj(v: serde_json::Value) -> Filter {
    v.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn first_request_fills_state_from_response() {
    let rec = Recorder::new(30);
    let p = pager(&rec);
    assert_eq!(p.request().await, RequestOutcome::Applied);
    let s = p.current();
    assert_eq!(s.count, 30);
    assert_eq!(s.pages, Some(2));
    assert_eq!(s.items().len(), 25);
    assert!(!s.loading);
    assert!(s.error.is_none());
}

#[tokio::test]
async fn page_size_change_returns_to_first_page() {
    for start in [2, 5, 9, 40] {
        for size in PAGE_SIZES {
            let rec = Recorder::new(1000);
            let p = pager(&rec);
            p.handle_page_change(start, false).await;
            assert_eq!(p.current().page, start);
            let before = rec.calls().len();

            p.handle_page_size_change(size).await;
            let s = p.current();
            assert_eq!((s.page, s.page_size), (1, size), "from page {} to size {}", start, size);
            let calls = rec.calls();
            assert_eq!(calls.len(), before + 1);
            assert_eq!(calls[before].0, Pagination { page: 1, page_size: size });
        }
    }
}

#[tokio::test]
async fn order_change_returns_to_first_page() {
    for start in [2, 4, 8] {
        for (key, order) in [("created", Order::Desc), ("label", Order::Asc), ("id", Order::Desc)] {
            let rec = Recorder::new(200);
            let p = pager(&rec);
            p.handle_page_change(start, false).await;
            let before = rec.calls().len();

            p.handle_order_change(key, order).await;
            let s = p.current();
            assert_eq!(s.page, 1, "from page {} sorting by {}", start, key);
            assert_eq!(s.order_by.as_deref(), Some(key));
            assert_eq!(s.order, order);
            let calls = rec.calls();
            assert_eq!(calls.len(), before + 1);
            assert_eq!(calls[before].0, Pagination { page: 1, page_size: 25 });
        }
    }
}

#[tokio::test]
async fn sort_filter_carries_field_and_direction() {
    let rec = Recorder::new(10);
    let p = pager(&rec);
    p.handle_order_change("label", Order::Asc).await;
    p.handle_order_change("label", Order::Desc).await;
    let calls = rec.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, obj(json!({ "+order_by": "label", "+order": "asc" })));
    assert_eq!(calls[1].1, obj(json!({ "+order_by": "label", "+order": "desc" })));
}

#[tokio::test]
async fn repeated_requests_send_identical_arguments() {
    let rec = Recorder::new(80);
    let p = pager(&rec);
    p.handle_search(obj(json!({ "label": { "+contains": "web" } }))).await;
    p.handle_order_change("region", Order::Asc).await;
    p.request().await;
    p.request().await;
    let calls = rec.calls();
    let (a, b) = (&calls[calls.len() - 2], &calls[calls.len() - 1]);
    assert_eq!(a.0, b.0);
    assert_eq!(serde_json::to_string(&a.1).unwrap(), serde_json::to_string(&b.1).unwrap());
    assert_eq!(a.1.get("label"), Some(&json!({ "+contains": "web" })));
}

#[tokio::test]
async fn failure_keeps_previous_data_and_sets_error() {
    let rec = Recorder::new(3);
    let p = pager(&rec);
    p.request().await;
    assert_eq!(p.current().items(), &[0, 1, 2]);

    rec.fail.store(true, Ordering::SeqCst);
    assert_eq!(p.request().await, RequestOutcome::Failed);
    let s = p.current();
    assert_eq!(s.items(), &[0, 1, 2]);
    assert!(s.error.as_ref().map(|e| e.to_string().contains("503")).unwrap_or(false));
    assert!(!s.loading);

    rec.fail.store(false, Ordering::SeqCst);
    assert_eq!(p.request().await, RequestOutcome::Applied);
    assert!(p.current().error.is_none());
}

#[tokio::test]
async fn failure_before_any_data_leaves_data_empty() {
    let rec = Recorder::new(3);
    rec.fail.store(true, Ordering::SeqCst);
    let p = pager(&rec);
    p.request().await;
    let s = p.current();
    assert!(s.data.is_none());
    assert!(s.error.is_some());
    assert!(!s.loading);
}

#[tokio::test]
async fn deleting_only_item_on_later_page_steps_back() {
    // 51 items at 25 per page leaves one item on page 3
    let rec = Recorder::new(51);
    let p = pager(&rec);
    p.handle_page_change(3, false).await;
    assert_eq!(p.current().items().len(), 1);
    let before = rec.calls().len();

    rec.set_total(50);
    p.on_delete().await;
    let calls = rec.calls();
    assert_eq!(calls.len(), before + 1);
    assert_eq!(calls[before].0.page, 2);
    assert_eq!(p.current().page, 2);
}

#[tokio::test]
async fn deleting_with_rows_left_refreshes_in_place() {
    let rec = Recorder::new(54);
    let p = pager(&rec);
    p.handle_page_change(3, false).await;
    assert_eq!(p.current().items().len(), 4);
    let before = rec.calls().len();

    rec.set_total(53);
    p.on_delete().await;
    let calls = rec.calls();
    assert_eq!(calls.len(), before + 1);
    assert_eq!(calls[before].0.page, 3);
    assert_eq!(p.current().items().len(), 3);
}

#[tokio::test]
async fn deleting_only_item_on_first_page_refreshes_in_place() {
    let rec = Recorder::new(1);
    let p = pager(&rec);
    p.request().await;
    rec.set_total(0);
    p.on_delete().await;
    let calls = rec.calls();
    assert_eq!(calls.last().map(|c| c.0.page), Some(1));
    assert!(p.current().items().is_empty());
}

#[tokio::test]
async fn bulk_delete_emptying_page_steps_back_once() {
    let rec = Recorder::new(53);
    let p = pager(&rec);
    p.handle_page_change(3, false).await;
    assert_eq!(p.current().items().len(), 3);
    let before = rec.calls().len();

    rec.set_total(50);
    p.on_bulk_delete(3).await;
    let calls = rec.calls();
    assert_eq!(calls.len(), before + 1);
    assert_eq!(calls[before].0.page, 2);
}

#[tokio::test]
async fn bulk_delete_leaving_rows_refreshes_in_place() {
    let rec = Recorder::new(53);
    let p = pager(&rec);
    p.handle_page_change(3, false).await;
    rec.set_total(51);
    p.on_bulk_delete(2).await;
    assert_eq!(rec.calls().last().map(|c| c.0.page), Some(3));
    assert_eq!(p.current().items().len(), 1);
}

#[tokio::test]
async fn search_resets_page_and_clears_searching_flag() {
    let rec = Recorder::new(300);
    let p = pager(&rec);
    p.handle_page_change(5, false).await;
    p.handle_search(obj(json!({ "region": "us-east" }))).await;
    let s = p.current();
    assert_eq!(s.page, 1);
    assert!(!s.searching);
    assert_eq!(s.filter.get("region"), Some(&json!("us-east")));
    assert_eq!(rec.calls().last().map(|c| c.0.page), Some(1));
}

#[tokio::test]
async fn search_flag_cleared_after_failure() {
    let rec = Recorder::new(300);
    rec.fail.store(true, Ordering::SeqCst);
    let p = pager(&rec);
    assert_eq!(p.handle_search(obj(json!({ "label": "db" }))).await, RequestOutcome::Failed);
    assert!(!p.current().searching);
}

#[tokio::test]
async fn spinner_page_change_ends_not_loading_even_on_failure() {
    let rec = Recorder::new(300);
    let p = pager(&rec);
    p.request().await;
    rec.fail.store(true, Ordering::SeqCst);
    p.handle_page_change(2, true).await;
    let s = p.current();
    assert!(!s.loading);
    assert!(s.error.is_some());
    assert_eq!(s.page, 2);
}

#[tokio::test]
async fn request_map_transforms_items_before_storing() {
    let rec = Recorder::new(5);
    let p = pager(&rec);
    p.request_map(|items| items.into_iter().map(|n| n * 100).collect()).await;
    assert_eq!(p.current().items(), &[0, 100, 200, 300, 400]);
}

#[tokio::test]
async fn stop_drops_results_and_blocks_further_fetches() {
    let rec = Recorder::new(5);
    let p = pager(&rec);
    p.start().await;
    p.stop();
    let before = rec.calls().len();
    assert_eq!(p.handle_page_size_change(50).await, RequestOutcome::Detached);
    assert_eq!(rec.calls().len(), before);
}

#[tokio::test]
async fn config_page_size_seeds_initial_state() {
    let rec = Recorder::new(500);
    let p = Pager::with_config((), rec.clone(), PagerConfig { page_size: 75, ..PagerConfig::default() });
    p.start().await;
    assert_eq!(rec.calls()[0].0, Pagination { page: 1, page_size: 75 });
    assert_eq!(p.current().items().len(), 75);
}
