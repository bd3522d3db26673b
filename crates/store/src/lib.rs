//! Folio in-RAM stores: a keyed entity store fed by fetched pages, and
//! [`MemoryFetcher`], a backend that serves pages out of a JSON collection.

#![forbid(unsafe_code)]

use std::hash::Hash;
use std::sync::Arc;

use folio_core::PagedResponse;
use metrics::gauge;
use rustc_hash::FxHashMap;
use tracing::debug;

pub mod memory;

pub use memory::MemoryFetcher;

/// Entities addressable by a stable key.
pub trait Keyed {
    type Key: Eq + Hash + Clone;
    fn key(&self) -> Self::Key;
}

/// Keyed collection with insertion order, updated only through upsert/remove/error.
pub struct EntityStore<T: Keyed> {
    map: FxHashMap<T::Key, T>,
    order: Vec<T::Key>,
    error: Option<Arc<anyhow::Error>>,
}

impl<T: Keyed> Default for EntityStore<T> {
    fn default() -> Self { Self { map: FxHashMap::default(), order: Vec::new(), error: None } }
}

impl<T: Keyed> EntityStore<T> {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn get(&self, key: &T::Key) -> Option<&T> { self.map.get(key) }
    pub fn contains(&self, key: &T::Key) -> bool { self.map.contains_key(key) }
    pub fn error(&self) -> Option<&anyhow::Error> { self.error.as_deref() }

    /// Items in first-insertion order.
    pub fn items(&self) -> impl Iterator<Item = &T> + '_ { self.order.iter().filter_map(|k| self.map.get(k)) }

    /// Insert or replace by key. Replacing keeps the original position. Returns true if new.
    pub fn upsert(&mut self, item: T) -> bool {
        let key = item.key();
        let is_new = self.map.insert(key.clone(), item).is_none();
        if is_new {
            self.order.push(key);
        }
        is_new
    }

    pub fn upsert_many(&mut self, items: impl IntoIterator<Item = T>) -> usize {
        let mut added = 0;
        for it in items {
            if self.upsert(it) {
                added += 1;
            }
        }
        added
    }

    pub fn remove(&mut self, key: &T::Key) -> Option<T> {
        let removed = self.map.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    pub fn set_error(&mut self, e: anyhow::Error) { self.error = Some(Arc::new(e)); }
    pub fn clear_error(&mut self) { self.error = None; }

    /// Upsert every item of a fetched page and clear any recorded error.
    pub fn ingest_page(&mut self, page: PagedResponse<T>) -> usize {
        let page_no = page.page;
        let added = self.upsert_many(page.data);
        self.error = None;
        gauge!("store_entities", self.map.len() as f64);
        debug!(page = page_no, added, total = self.map.len(), "store: page ingested");
        added
    }
}
