//! Query requests and result pages.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use super::filter::RowFilter;
use crate::catalog::{EntityDef, SortSpec};
use crate::storage::Row;

/// `page_size` sentinel: every row on a single page.
pub const ALL_ROWS: i64 = -1;

pub const DEFAULT_PAGE_SIZE: i64 = 25;

/// A declarative filter/sort/page request against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryRequest {
    pub filters: Vec<RowFilter>,
    pub sort: Vec<SortSpec>,
    /// 1-based.
    pub page: i64,
    pub page_size: i64,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: Vec::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn with_page(mut self, page: i64) -> Self {
        self.page = page;
        self
    }

    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Request every row on one page.
    pub fn all(self) -> Self {
        self.with_page(1).with_page_size(ALL_ROWS)
    }
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct RowPage {
    pub items: Vec<Arc<Row>>,
    pub total_items: usize,
    pub total_pages: usize,
    pub page: i64,
    pub page_size: i64,
}

impl RowPage {
    pub fn ids(&self) -> Vec<crate::ids::RowId> {
        self.items.iter().map(|r| r.id).collect()
    }

    pub fn to_json(&self, entity: &EntityDef) -> JsonValue {
        json!({
            "items": self.items.iter().map(|r| r.to_json(entity)).collect::<Vec<_>>(),
            "totalItems": self.total_items,
            "totalPages": self.total_pages,
            "page": self.page,
            "pageSize": self.page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_defaults() {
        let request: QueryRequest = serde_json::from_value(json!({
            "filters": [{"property": "status", "op": "eq", "value": "draft"}],
            "sort": [{"property": "amount", "direction": "desc"}]
        }))
        .unwrap();
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(request.sort[0], SortSpec::desc("amount"));
        assert_eq!(QueryRequest::new().all().page_size, ALL_ROWS);
    }
}
