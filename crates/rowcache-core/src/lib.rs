//! rowcache core - windowed row caching for server-paged tables.
//!
//! A view keeps a sparse `WindowedCache` of rows fetched page by page from a
//! `DataSource`. The `TableController` ties the pieces together: it maps
//! pagination onto row ranges, debounces fetches through a
//! `FetchCoordinator`, discards responses from outdated filter/sort
//! generations, and runs full-set exports without touching the cache.

pub mod cache;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod query;
pub mod resolver;
pub mod source;
pub mod utils;

pub use cache::WindowedCache;
pub use config::{Config, ViewSettings};
pub use controller::TableController;
pub use coordinator::{FetchCoordinator, FetchOutcome, FetchParams, FetchState, Generation};
pub use error::{CacheError, ExportError, SourceError};
pub use export::ExportFetcher;
pub use query::{
    Filter, FilterEdit, FilterOperator, FilterSpec, Limit, PageRequest, PageResponse, QueryRequest,
    SortDirection, SortKey, SortSpec, SortToggle,
};
pub use resolver::PageWindowResolver;
pub use source::{DataSource, HttpDataSource, MemorySource};
