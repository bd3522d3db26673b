//! Outgoing filter assembly and the table-header sort toggle.

#![forbid(unsafe_code)]

use serde_json::Value;

use crate::{Filter, Order, ORDER_BY_KEY, ORDER_KEY};

/// Build the filter sent with a request.
///
/// Starts from a copy of the caller's criteria. When a sort key is active the result
/// carries both `+order_by` and `+order`; those two keys take precedence over any
/// caller entry of the same name, every other caller key passes through unchanged.
pub fn build_filter(base: &Filter, order_by: Option<&str>, order: Order) -> Filter {
    let mut out = base.clone();
    if let Some(key) = order_by {
        out.insert(ORDER_BY_KEY.to_string(), Value::String(key.to_string()));
        out.insert(ORDER_KEY.to_string(), Value::String(order.as_str().to_string()));
    }
    out
}

/// Tracks the active column for sortable table headers.
///
/// Clicking a new column sorts it ascending; clicking the active column flips direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortToggle {
    active: Option<String>,
    order: Order,
}

impl SortToggle {
    pub fn new() -> Self { Self::default() }

    pub fn with_active(column: impl Into<String>, order: Order) -> Self {
        Self { active: Some(column.into()), order }
    }

    pub fn active(&self) -> Option<&str> { self.active.as_deref() }
    pub fn order(&self) -> Order { self.order }

    /// Register a header click and return the `(order_by, order)` pair to request.
    pub fn click(&mut self, column: &str) -> (String, Order) {
        if self.active.as_deref() == Some(column) {
            self.order = self.order.toggled();
        } else {
            self.active = Some(column.to_string());
            self.order = Order::Asc;
        }
        (column.to_string(), self.order)
    }
}
