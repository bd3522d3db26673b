//! Folio pager: page/size/sort/filter state for one collection, re-fetched through an
//! injected [`PageFetcher`] whenever any of those change.
//!
//! Readers take cheap snapshots via [`Pager::current`] and can wait for changes on the
//! epoch channel returned by [`Pager::subscribe`]. Fetch failures never escape the pager;
//! they land in [`PagerState::error`] next to the last good data.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use arc_swap::ArcSwap;
use folio_core::{build_filter, Filter, Order, Pagination, DEFAULT_PAGE_SIZE};
use metrics::{counter, histogram};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub mod config;
pub mod fetch;

pub use config::{PagerConfig, StalePolicy};
pub use fetch::{fetch_all, fetch_fn, FnFetcher, PageFetcher};

/// Observable state of one paged collection.
#[derive(Debug)]
pub struct PagerState<T> {
    /// Total items as last reported by the server.
    pub count: u64,
    pub page: u32,
    pub pages: Option<u32>,
    pub page_size: u32,
    /// `None` until the first successful fetch.
    pub data: Option<Arc<[T]>>,
    pub loading: bool,
    /// True only while a search-triggered fetch is in flight.
    pub searching: bool,
    pub error: Option<Arc<anyhow::Error>>,
    pub order_by: Option<String>,
    pub order: Order,
    pub filter: Filter,
}

impl<T> Clone for PagerState<T> {
    fn clone(&self) -> Self {
        Self {
            count: self.count,
            page: self.page,
            pages: self.pages,
            page_size: self.page_size,
            data: self.data.clone(),
            loading: self.loading,
            searching: self.searching,
            error: self.error.clone(),
            order_by: self.order_by.clone(),
            order: self.order,
            filter: self.filter.clone(),
        }
    }
}

impl<T> Default for PagerState<T> {
    fn default() -> Self { Self::with_page_size(DEFAULT_PAGE_SIZE) }
}

impl<T> PagerState<T> {
    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            count: 0,
            page: 1,
            pages: None,
            page_size: page_size.max(1),
            data: None,
            loading: true,
            searching: false,
            error: None,
            order_by: None,
            order: Order::Asc,
            filter: Filter::new(),
        }
    }

    /// Items on the current page (empty before the first successful fetch).
    pub fn items(&self) -> &[T] { self.data.as_deref().unwrap_or(&[]) }

    pub fn pagination(&self) -> Pagination { Pagination { page: self.page, page_size: self.page_size } }

    /// Filter sent with the next request: caller criteria plus the active sort keys.
    pub fn outgoing_filter(&self) -> Filter { build_filter(&self.filter, self.order_by.as_deref(), self.order) }
}

/// How a request settled, from the pager's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Response stored as the current page.
    Applied,
    /// Fetch failed; error stored, previous data kept.
    Failed,
    /// A newer request was issued before this one settled; result dropped.
    Stale,
    /// The pager was stopped; nothing fetched or applied.
    Detached,
}

type MapFn<T> = Box<dyn FnOnce(Vec<T>) -> Vec<T> + Send>;

/// Paginated query orchestrator for one collection.
pub struct Pager<T, C = ()> {
    ctx: C,
    fetcher: Arc<dyn PageFetcher<C, T>>,
    config: PagerConfig,
    state: Mutex<PagerState<T>>,
    snap: ArcSwap<PagerState<T>>,
    epoch_tx: watch::Sender<u64>,
    seq: AtomicU64,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<T, C> Pager<T, C>
where
    T: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    pub fn new(ctx: C, fetcher: impl PageFetcher<C, T> + 'static) -> Self {
        Self::with_config(ctx, Arc::new(fetcher), PagerConfig::default())
    }

    pub fn with_config(ctx: C, fetcher: Arc<dyn PageFetcher<C, T>>, config: PagerConfig) -> Self {
        let initial = PagerState::with_page_size(config.page_size);
        let (epoch_tx, _) = watch::channel(0u64);
        Self {
            ctx,
            fetcher,
            config,
            snap: ArcSwap::from_pointee(initial.clone()),
            state: Mutex::new(initial),
            epoch_tx,
            seq: AtomicU64::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PagerConfig { &self.config }
    pub fn context(&self) -> &C { &self.ctx }

    /// Latest published state.
    pub fn current(&self) -> Arc<PagerState<T>> { self.snap.load_full() }

    /// Epoch bumped on every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }

    pub fn is_stopped(&self) -> bool { self.stopped.load(AtomicOrdering::Acquire) }

    /// Issue the initial load. Only the first call fetches; later calls return `None`.
    pub async fn start(&self) -> Option<RequestOutcome> {
        if self.started.swap(true, AtomicOrdering::AcqRel) {
            debug!("pager: start ignored; already started");
            return None;
        }
        info!(page_size = self.config.page_size, "pager: start");
        Some(self.request().await)
    }

    /// Detach the pager. Results that settle afterwards are dropped and no further fetches are issued.
    pub fn stop(&self) {
        if !self.stopped.swap(true, AtomicOrdering::AcqRel) {
            info!("pager: stop");
        }
    }

    /// Re-fetch the current page with the current size, sort and filter.
    pub async fn request(&self) -> RequestOutcome { self.run_request(None).await }

    /// Like [`Pager::request`], transforming the fetched items before they are stored.
    pub async fn request_map(&self, map: impl FnOnce(Vec<T>) -> Vec<T> + Send + 'static) -> RequestOutcome {
        self.run_request(Some(Box::new(map))).await
    }

    /// Jump to `page`. No bounds check; callers pick a page in `1..=pages`.
    pub async fn handle_page_change(&self, page: u32, show_spinner: bool) -> RequestOutcome {
        if self.is_stopped() {
            debug!("pager: page change ignored; stopped");
            return RequestOutcome::Detached;
        }
        self.mutate(|s| {
            if show_spinner {
                s.loading = true;
            }
            s.page = page;
        });
        let outcome = self.run_request(None).await;
        if show_spinner && outcome != RequestOutcome::Detached {
            self.mutate(|s| s.loading = false);
        }
        outcome
    }

    /// Change page size; always returns to page 1.
    pub async fn handle_page_size_change(&self, page_size: u32) -> RequestOutcome {
        if self.is_stopped() {
            debug!("pager: page size change ignored; stopped");
            return RequestOutcome::Detached;
        }
        if page_size == 0 {
            warn!("pager: page size 0 requested; using 1");
        }
        self.mutate(|s| {
            s.page = 1;
            s.page_size = page_size.max(1);
        });
        self.run_request(None).await
    }

    /// Sort by `order_by` in `order`; always returns to page 1.
    pub async fn handle_order_change(&self, order_by: impl Into<String>, order: Order) -> RequestOutcome {
        if self.is_stopped() {
            debug!("pager: order change ignored; stopped");
            return RequestOutcome::Detached;
        }
        let order_by = order_by.into();
        self.mutate(|s| {
            s.order_by = Some(order_by);
            s.order = order;
            s.page = 1;
        });
        self.run_request(None).await
    }

    /// Replace the caller filter and return to page 1; `searching` is set while the fetch runs.
    pub async fn handle_search(&self, filter: Filter) -> RequestOutcome {
        if self.is_stopped() {
            debug!("pager: search ignored; stopped");
            return RequestOutcome::Detached;
        }
        self.mutate(|s| {
            s.filter = filter;
            s.page = 1;
            s.searching = true;
        });
        let outcome = self.run_request(None).await;
        if outcome != RequestOutcome::Detached {
            self.mutate(|s| s.searching = false);
        }
        outcome
    }

    /// Call after a single item was removed from the current page.
    ///
    /// When that item was the only one on a page other than the first, step back one
    /// page instead of re-fetching a page that is now empty.
    pub async fn on_delete(&self) -> RequestOutcome {
        let (page, len) = {
            let s = self.lock_state();
            let len = s.items().len();
            (s.page, len)
        };
        if len == 1 && page > 1 {
            debug!(from = page, to = page - 1, "pager: last item on page deleted; stepping back");
            return self.handle_page_change(page - 1, false).await;
        }
        self.request().await
    }

    /// Call after `removed` items were deleted from the current page in one go.
    ///
    /// One check against the post-delete count: if nothing is left on a page other than
    /// the first, step back one page; otherwise refresh in place.
    pub async fn on_bulk_delete(&self, removed: usize) -> RequestOutcome {
        let (page, len) = {
            let s = self.lock_state();
            let len = s.items().len();
            (s.page, len)
        };
        if removed > 0 && removed >= len && page > 1 {
            debug!(removed, from = page, to = page - 1, "pager: page emptied by bulk delete; stepping back");
            return self.handle_page_change(page - 1, false).await;
        }
        self.request().await
    }

    async fn run_request(&self, map: Option<MapFn<T>>) -> RequestOutcome {
        if self.is_stopped() {
            debug!("pager: request skipped; stopped");
            return RequestOutcome::Detached;
        }
        let (pagination, filter, seq) = self.issue();
        counter!("pager_requests_total", 1);
        debug!(seq, page = pagination.page, page_size = pagination.page_size, "pager: request start");
        let t0 = Instant::now();
        let res = self.fetcher.fetch(&self.ctx, pagination, filter).await;
        histogram!("pager_fetch_ms", t0.elapsed().as_secs_f64() * 1000.0);

        if self.is_stopped() {
            debug!(seq, "pager: result dropped; stopped");
            return RequestOutcome::Detached;
        }
        if self.config.stale_policy == StalePolicy::DiscardStale && self.seq.load(AtomicOrdering::Acquire) != seq {
            counter!("pager_stale_discarded_total", 1);
            debug!(seq, "pager: stale result dropped");
            return RequestOutcome::Stale;
        }

        match res {
            Ok(resp) => {
                let data = match map {
                    Some(f) => f(resp.data),
                    None => resp.data,
                };
                debug!(seq, page = resp.page, pages = resp.pages, results = resp.results, rows = data.len(), "pager: request ok");
                self.mutate(|s| {
                    s.count = resp.results;
                    s.page = resp.page;
                    s.pages = Some(resp.pages);
                    s.data = Some(Arc::from(data));
                    s.error = None;
                    s.loading = false;
                });
                RequestOutcome::Applied
            }
            Err(e) => {
                counter!("pager_fetch_errors_total", 1);
                warn!(seq, error = %e, page = pagination.page, "pager: request failed");
                self.mutate(|s| {
                    s.error = Some(Arc::new(e));
                    s.loading = false;
                });
                RequestOutcome::Failed
            }
        }
    }

    /// Snapshot the outgoing request and number it under one lock, so sequence
    /// order always matches the order in which state was read.
    fn issue(&self) -> (Pagination, Filter, u64) {
        let s = self.lock_state();
        let seq = self.seq.fetch_add(1, AtomicOrdering::AcqRel) + 1;
        (s.pagination(), s.outgoing_filter(), seq)
    }

    fn lock_state(&self) -> MutexGuard<'_, PagerState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a change, publish the new snapshot and bump the epoch.
    fn mutate<R>(&self, f: impl FnOnce(&mut PagerState<T>) -> R) -> R {
        let mut s = self.lock_state();
        let out = f(&mut s);
        self.snap.store(Arc::new(s.clone()));
        self.epoch_tx.send_modify(|e| *e = e.wrapping_add(1));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::PagedResponse;

    fn empty_pager() -> Pager<u32> {
        Pager::new((), fetch_fn(|_: (), p: Pagination, _f: Filter| async move {
            Ok::<_, anyhow::Error>(PagedResponse { page: p.page, pages: 1, results: 0, data: Vec::new() })
        }))
    }

    #[test]
    fn fresh_state_matches_defaults() {
        let pager = empty_pager();
        let s = pager.current();
        assert_eq!(s.page, 1);
        assert_eq!(s.page_size, 25);
        assert_eq!(s.count, 0);
        assert!(s.loading);
        assert!(!s.searching);
        assert_eq!(s.order, Order::Asc);
        assert!(s.order_by.is_none());
        assert!(s.filter.is_empty());
        assert!(s.data.is_none());
        assert!(s.error.is_none());
    }

    #[tokio::test]
    async fn mutations_bump_epoch() {
        let pager = empty_pager();
        let rx = pager.subscribe();
        let before = *rx.borrow();
        pager.request().await;
        assert!(*rx.borrow() > before);
        assert!(!pager.current().loading);
    }

    #[tokio::test]
    async fn start_fetches_once() {
        let pager = empty_pager();
        assert_eq!(pager.start().await, Some(RequestOutcome::Applied));
        assert_eq!(pager.start().await, None);
    }

    #[tokio::test]
    async fn stopped_pager_does_not_fetch() {
        let pager = empty_pager();
        pager.stop();
        assert_eq!(pager.request().await, RequestOutcome::Detached);
        assert!(pager.current().loading);
    }

    #[tokio::test]
    async fn stopped_pager_ignores_state_changes() {
        let pager = empty_pager();
        pager.request().await;
        pager.stop();
        let rx = pager.subscribe();
        let epoch = *rx.borrow();
        let before = pager.current();

        assert_eq!(pager.handle_page_change(4, true).await, RequestOutcome::Detached);
        assert_eq!(pager.handle_page_size_change(50).await, RequestOutcome::Detached);
        assert_eq!(pager.handle_order_change("label", Order::Desc).await, RequestOutcome::Detached);
        let mut filter = Filter::new();
        filter.insert("region".into(), "us-east".into());
        assert_eq!(pager.handle_search(filter).await, RequestOutcome::Detached);

        let s = pager.current();
        assert_eq!(*rx.borrow(), epoch);
        assert!(Arc::ptr_eq(&before, &s));
        assert_eq!((s.page, s.page_size), (1, 25));
        assert!(s.order_by.is_none());
        assert!(s.filter.is_empty());
        assert!(!s.loading);
        assert!(!s.searching);
    }

    #[test]
    fn sequence_follows_state_read_order() {
        let pager = empty_pager();
        let mut issued: Vec<(u64, u32)> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        (0..500)
                            .map(|_| {
                                pager.mutate(|s| s.page += 1);
                                let (p, _, seq) = pager.issue();
                                (seq, p.page)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().expect("worker")).collect()
        });
        issued.sort_unstable();
        assert_eq!(issued.len(), 2000);
        assert!(issued.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 <= w[1].1));
    }
}
