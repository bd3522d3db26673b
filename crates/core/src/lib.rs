//! Folio core types: paged responses, pagination params, sort order and errors.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod filter;

pub use filter::{build_filter, SortToggle};

/// Page size used until the consumer picks another one.
pub const DEFAULT_PAGE_SIZE: u32 = 25;
/// Page sizes offered by list footers.
pub const PAGE_SIZES: [u32; 4] = [25, 50, 75, 100];
/// Largest page size the API serves; used when walking every page.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Wire key carrying the active sort field.
pub const ORDER_BY_KEY: &str = "+order_by";
/// Wire key carrying the active sort direction.
pub const ORDER_KEY: &str = "+order";

/// Free-form filter criteria, passed through to the fetch function untouched.
pub type Filter = serde_json::Map<String, serde_json::Value>;

/// One page of a collection as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PagedResponse<T> {
    /// 1-based page the server actually returned.
    pub page: u32,
    /// Total pages at the requested page size.
    pub pages: u32,
    /// Total items across all pages.
    pub results: u64,
    pub data: Vec<T>,
}

impl<T> PagedResponse<T> {
    pub fn is_last_page(&self) -> bool { self.page >= self.pages }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResponse<U> {
        PagedResponse { page: self.page, pages: self.pages, results: self.results, data: self.data.into_iter().map(f).collect() }
    }
}

/// Number of pages needed for `results` items; an empty collection still has one page.
pub fn pages_for(results: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    let pages = results.div_ceil(size).max(1);
    pages.min(u64::from(u32::MAX)) as u32
}

/// Pagination params sent with every request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self { Self { page: 1, page_size: DEFAULT_PAGE_SIZE } }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Order::Asc => Order::Desc,
            Order::Desc => Order::Asc,
        }
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for Order {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Order::Asc),
            "desc" => Ok(Order::Desc),
            other => Err(FolioError::Validation(format!("invalid order: {} (expect asc or desc)", other))),
        }
    }
}

/// Errors surfaced by folio crates.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum FolioError {
    #[error("config: {0}")]
    Config(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("fetch: {0}")]
    Fetch(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for FolioError {
    fn from(e: anyhow::Error) -> Self { FolioError::Internal(e.to_string()) }
}

pub type FolioResult<T> = Result<T, FolioError>;

pub mod prelude {
    pub use super::{
        build_filter, Filter, FolioError, FolioResult, Order, PagedResponse, Pagination, SortToggle, DEFAULT_PAGE_SIZE,
        MAX_PAGE_SIZE, PAGE_SIZES,
    };
}
