//! Query parameter normalization.
//!
//! Raw UI edits (a filter typed into a column header, a click on a sortable
//! column) are folded into canonical `FilterSpec` / `SortSpec` values so that
//! equal view states always produce identical data-source queries.

pub mod filter;
pub mod request;
pub mod sort;

pub use filter::{Filter, FilterEdit, FilterOperator, FilterSpec};
pub use request::{Limit, PageRequest, PageResponse, QueryRequest};
pub use sort::{SortDirection, SortKey, SortSpec, SortToggle};
