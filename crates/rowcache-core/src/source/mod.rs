//! Data-source adapters.
//!
//! A `DataSource` answers `query(offset, limit, filters, sort)` with
//! `{offset, total, results}`. The cache never talks to a backend any other
//! way; business logic behind the endpoint is opaque to it.
//!
//! - `HttpDataSource`: posts the query as JSON to a remote endpoint
//! - `MemorySource`: answers from an in-process `Vec`, for tests and demos

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::query::{PageResponse, QueryRequest};

pub use http::HttpDataSource;
pub use memory::MemorySource;

/// Backend query boundary for one kind of record.
///
/// `total` in the response must be the full filtered count. Two responses
/// under the same filter/sort may disagree on `total` if the data changed in
/// between; callers trust the most recent one.
#[async_trait]
pub trait DataSource<T>: Send + Sync {
    async fn query(&self, request: QueryRequest) -> Result<PageResponse<T>, SourceError>;
}
