use serde::{Deserialize, Serialize};

use super::{Filter, FilterSpec, SortKey, SortSpec};

/// Row limit for a query. `All` is the export sentinel and goes on the wire
/// as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<usize>", into = "Option<usize>")]
pub enum Limit {
    Count(usize),
    All,
}

impl From<Option<usize>> for Limit {
    fn from(value: Option<usize>) -> Self {
        match value {
            Some(n) => Limit::Count(n),
            None => Limit::All,
        }
    }
}

impl From<Limit> for Option<usize> {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Count(n) => Some(n),
            Limit::All => None,
        }
    }
}

/// A page-sized slice of the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    /// The full page for a 0-based page number.
    pub fn for_page(page: usize, page_size: usize) -> Self {
        Self {
            offset: page.saturating_mul(page_size),
            limit: page_size,
        }
    }

    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.limit)
    }
}

/// Everything the data source needs to answer one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct QueryRequest {
    pub offset: usize,
    #[cfg_attr(feature = "ts", ts(type = "number | null"))]
    pub limit: Limit,
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
}

impl QueryRequest {
    pub fn page(page: PageRequest, filters: &FilterSpec, sort: &SortSpec) -> Self {
        Self {
            offset: page.offset,
            limit: Limit::Count(page.limit),
            filters: filters.to_query(),
            sort: sort.to_query(),
        }
    }

    /// Query for the whole filtered set starting at row 0.
    pub fn all(limit: Limit, filters: &FilterSpec, sort: &SortSpec) -> Self {
        Self {
            offset: 0,
            limit,
            filters: filters.to_query(),
            sort: sort.to_query(),
        }
    }
}

/// A data-source answer: `total` is the full filtered count, not the number
/// of rows in `results`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PageResponse<T> {
    pub offset: usize,
    pub total: usize,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}
