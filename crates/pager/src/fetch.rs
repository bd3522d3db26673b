//! The fetch-function boundary and helpers built on it.

#![forbid(unsafe_code)]

use std::future::Future;

use anyhow::{Context, Result};
use folio_core::{Filter, PagedResponse, Pagination, MAX_PAGE_SIZE};
use futures::future::try_join_all;
use tracing::debug;

/// Fetches one page of a collection.
///
/// `ctx` is opaque caller data (ids needed to build a URL and so on); the pager never
/// inspects it. Any error is captured by the pager and exposed as state.
#[async_trait::async_trait]
pub trait PageFetcher<C, T>: Send + Sync {
    async fn fetch(&self, ctx: &C, pagination: Pagination, filter: Filter) -> Result<PagedResponse<T>>;
}

/// Adapter turning a closure into a [`PageFetcher`]. The context is cloned per call.
pub struct FnFetcher<F>(F);

pub fn fetch_fn<F>(f: F) -> FnFetcher<F> { FnFetcher(f) }

#[async_trait::async_trait]
impl<C, T, F, Fut> PageFetcher<C, T> for FnFetcher<F>
where
    C: Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(C, Pagination, Filter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PagedResponse<T>>> + Send,
{
    async fn fetch(&self, ctx: &C, pagination: Pagination, filter: Filter) -> Result<PagedResponse<T>> {
        (self.0)(ctx.clone(), pagination, filter).await
    }
}

/// Fetch every page of a collection and concatenate the items in page order.
///
/// The first page is fetched at [`MAX_PAGE_SIZE`]; remaining pages are requested
/// concurrently. A failure on any page fails the whole call.
pub async fn fetch_all<C, T, F>(fetcher: &F, ctx: &C, filter: &Filter) -> Result<Vec<T>>
where
    C: Sync,
    T: Send,
    F: PageFetcher<C, T> + ?Sized,
{
    let first = fetcher
        .fetch(ctx, Pagination { page: 1, page_size: MAX_PAGE_SIZE }, filter.clone())
        .await
        .context("fetching first page")?;
    if first.page >= first.pages {
        return Ok(first.data);
    }
    debug!(pages = first.pages, results = first.results, "fetch_all: fetching remaining pages");
    let rest = (first.page + 1..=first.pages).map(|page| async move {
        fetcher
            .fetch(ctx, Pagination { page, page_size: MAX_PAGE_SIZE }, filter.clone())
            .await
            .with_context(|| format!("fetching page {}", page))
    });
    let pages = try_join_all(rest).await?;
    let mut out = first.data;
    for p in pages {
        out.extend(p.data);
    }
    Ok(out)
}
