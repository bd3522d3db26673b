//! Page-serving backend over an in-memory JSON collection.
//!
//! Understands the same filter keys as the REST API it stands in for:
//! - `field: value` exact match
//! - `field: {"+contains": "text"}` case-insensitive substring match
//! - `"+or": [filter, ...]` any sub-filter matches
//! - `"+order_by"` / `"+order"` sort field and direction

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use folio_core::{pages_for, Filter, Order, PagedResponse, Pagination, ORDER_BY_KEY, ORDER_KEY};
use folio_pager::PageFetcher;
use metrics::counter;
use serde_json::Value;
use tracing::debug;

const CONTAINS_KEY: &str = "+contains";
const OR_KEY: &str = "+or";

#[derive(Default)]
struct Inner {
    items: Vec<Value>,
    fail_next: Option<String>,
}

#[derive(Default)]
pub struct MemoryFetcher {
    inner: Mutex<Inner>,
}

impl MemoryFetcher {
    pub fn new(items: Vec<Value>) -> Self { Self { inner: Mutex::new(Inner { items, fail_next: None }) } }

    /// Load a JSON array of objects.
    pub fn from_json(raw: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Array(items) => Ok(Self::new(items)),
            _ => Err(anyhow!("expected a JSON array of objects")),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> { self.inner.lock().unwrap_or_else(|p| p.into_inner()) }

    pub fn len(&self) -> usize { self.lock().items.len() }
    pub fn is_empty(&self) -> bool { self.lock().items.is_empty() }

    pub fn push(&self, item: Value) { self.lock().items.push(item); }

    /// Remove items whose `field` equals `value`; returns how many were removed.
    pub fn remove_where(&self, field: &str, value: &Value) -> usize {
        let mut inner = self.lock();
        let before = inner.items.len();
        inner.items.retain(|it| it.get(field) != Some(value));
        before - inner.items.len()
    }

    /// Make the next fetch fail with `msg`.
    pub fn fail_next(&self, msg: impl Into<String>) { self.lock().fail_next = Some(msg.into()); }

    /// Run a query synchronously; this is what `fetch` serves.
    pub fn query(&self, pagination: Pagination, filter: &Filter) -> Result<PagedResponse<Value>> {
        let mut inner = self.lock();
        if let Some(msg) = inner.fail_next.take() {
            return Err(anyhow!(msg));
        }
        let mut hits: Vec<&Value> = inner.items.iter().filter(|it| matches(it, filter)).collect();
        sort_hits(&mut hits, filter);

        let size = pagination.page_size.max(1);
        let results = hits.len() as u64;
        let pages = pages_for(results, size);
        let page = pagination.page.clamp(1, pages);
        let start = (page as usize - 1) * size as usize;
        let data: Vec<Value> = hits.into_iter().skip(start).take(size as usize).cloned().collect();
        debug!(requested = pagination.page, page, pages, results, rows = data.len(), "memory: query");
        Ok(PagedResponse { page, pages, results, data })
    }
}

#[async_trait::async_trait]
impl PageFetcher<(), Value> for MemoryFetcher {
    async fn fetch(&self, _ctx: &(), pagination: Pagination, filter: Filter) -> Result<PagedResponse<Value>> {
        counter!("memory_fetch_total", 1);
        self.query(pagination, &filter)
    }
}

fn sort_hits(hits: &mut [&Value], filter: &Filter) {
    let Some(field) = filter.get(ORDER_BY_KEY).and_then(Value::as_str) else { return };
    let order = filter
        .get(ORDER_KEY)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Order>().ok())
        .unwrap_or_default();
    hits.sort_by(|a, b| {
        let ord = compare(a.get(field), b.get(field));
        match order {
            Order::Asc => ord,
            Order::Desc => ord.reverse(),
        }
    });
}

/// Missing values sort after present ones; numbers before strings before anything else.
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                x.as_f64().unwrap_or(0.0).partial_cmp(&y.as_f64().unwrap_or(0.0)).unwrap_or(Ordering::Equal)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Bool(_) => 2,
        _ => 3,
    }
}

fn matches(item: &Value, filter: &Filter) -> bool {
    filter.iter().all(|(key, want)| match key.as_str() {
        ORDER_BY_KEY | ORDER_KEY => true,
        OR_KEY => match want {
            Value::Array(alts) => alts.iter().any(|alt| alt.as_object().map(|f| matches(item, f)).unwrap_or(false)),
            _ => false,
        },
        field => field_matches(item.get(field), want),
    })
}

fn field_matches(have: Option<&Value>, want: &Value) -> bool {
    if let Some(needle) = want.get(CONTAINS_KEY).and_then(Value::as_str) {
        let needle = needle.to_lowercase();
        return match have {
            Some(Value::String(s)) => s.to_lowercase().contains(&needle),
            Some(Value::Array(tags)) => tags.iter().filter_map(Value::as_str).any(|t| t.to_lowercase().contains(&needle)),
            _ => false,
        };
    }
    match have {
        Some(Value::Array(tags)) if !want.is_array() => tags.contains(want),
        Some(v) => v == want,
        None => false,
    }
}
