#![forbid(unsafe_code)]

use folio_core::{FolioError, FolioResult, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What to do with a response that settles after a newer request was issued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StalePolicy {
    /// Only the most recently issued request may update state.
    #[default]
    DiscardStale,
    /// Whichever response settles last wins, even if it answers an older request.
    LastSettledWins,
}

impl std::str::FromStr for StalePolicy {
    type Err = FolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discard" | "discard-stale" => Ok(StalePolicy::DiscardStale),
            "last-wins" | "last-settled-wins" => Ok(StalePolicy::LastSettledWins),
            other => Err(FolioError::Config(format!("invalid stale policy: {} (expect discard or last-wins)", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PagerConfig {
    /// Initial page size.
    pub page_size: u32,
    pub stale_policy: StalePolicy,
}

impl Default for PagerConfig {
    fn default() -> Self { Self { page_size: DEFAULT_PAGE_SIZE, stale_policy: StalePolicy::default() } }
}

impl PagerConfig {
    /// Read `FOLIO_PAGE_SIZE` and `FOLIO_STALE_POLICY`; unset or invalid values keep defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(raw) = get("FOLIO_PAGE_SIZE") {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => cfg.page_size = n,
                _ => warn!(value = %raw, "invalid FOLIO_PAGE_SIZE; using default"),
            }
        }
        if let Some(raw) = get("FOLIO_STALE_POLICY") {
            match raw.parse::<StalePolicy>() {
                Ok(p) => cfg.stale_policy = p,
                Err(e) => warn!(error = %e, "invalid FOLIO_STALE_POLICY; using default"),
            }
        }
        cfg
    }

    pub fn validate(&self) -> FolioResult<()> {
        if self.page_size == 0 {
            return Err(FolioError::Config("page_size must be at least 1".into()));
        }
        Ok(())
    }
}
