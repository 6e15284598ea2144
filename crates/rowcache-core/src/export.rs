//! "Download all" path.
//!
//! `ExportFetcher` queries the full filtered result set directly from the
//! data source at the moment of the click. It never reads or writes a
//! `WindowedCache`, so a large export cannot evict the visible page and always
//! reflects the filters in effect when it was requested.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::ExportError;
use crate::query::{FilterSpec, Limit, QueryRequest, SortSpec};
use crate::source::DataSource;

pub struct ExportFetcher<T, S: ?Sized> {
    source: Arc<S>,
    limit: Limit,
    _record: std::marker::PhantomData<fn() -> T>,
}

impl<T, S: ?Sized> Clone for ExportFetcher<T, S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            limit: self.limit,
            _record: std::marker::PhantomData,
        }
    }
}

impl<T, S> ExportFetcher<T, S>
where
    T: Send + 'static,
    S: DataSource<T> + ?Sized,
{
    /// Export everything, sending the `ALL` sentinel as the limit.
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            limit: Limit::All,
            _record: std::marker::PhantomData,
        }
    }

    /// Ask for exactly `total` rows, for backends that reject an unbounded
    /// limit. The most recently reported total is the usual choice.
    pub fn with_known_total(mut self, total: usize) -> Self {
        self.limit = Limit::Count(total);
        self
    }

    /// Fetch the full result set for `filters` and `sort`.
    ///
    /// Either every row is returned or the call fails; a response that
    /// disagrees with its own `total` is treated as a failure.
    pub async fn download(&self, filters: &FilterSpec, sort: &SortSpec) -> Result<Vec<T>, ExportError> {
        let request = QueryRequest::all(self.limit, filters, sort);
        info!(limit = ?self.limit, filters = filters.len(), sort = sort.keys().len(), "Starting export");

        let response = self.source.query(request).await.map_err(|e| {
            warn!(error = %e, "Export query failed");
            ExportError::Source(e)
        })?;

        if response.offset != 0 {
            return Err(ExportError::UnexpectedOffset(response.offset));
        }

        let expected = match self.limit {
            Limit::All => response.total,
            Limit::Count(n) => n.min(response.total),
        };
        if response.results.len() != expected {
            warn!(expected, received = response.results.len(), "Export incomplete");
            return Err(ExportError::Incomplete {
                expected,
                received: response.results.len(),
            });
        }

        debug!(rows = response.results.len(), "Export complete");
        Ok(response.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::query::{FilterEdit, FilterOperator, PageResponse, SortToggle};
    use crate::source::MemorySource;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    fn rows() -> Vec<Value> {
        (0..40)
            .map(|i| json!({"id": i, "kind": if i % 2 == 0 { "even" } else { "odd" }}))
            .collect()
    }

    #[tokio::test]
    async fn test_download_returns_full_filtered_set() {
        let source = Arc::new(MemorySource::json(rows()));
        let exporter = ExportFetcher::<Value, _>::new(Arc::clone(&source));

        let filters: FilterSpec = vec![FilterEdit::set("kind", FilterOperator::Equals, "odd")]
            .into_iter()
            .collect();
        let mut sort = SortSpec::new();
        sort.toggle(&SortToggle::single("id"));
        sort.toggle(&SortToggle::single("id"));

        let all = exporter.download(&filters, &sort).await.expect("export");
        assert_eq!(all.len(), 20);
        assert_eq!(all[0]["id"], 39);

        let requests = source.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].offset, 0);
        assert_eq!(requests[0].limit, Limit::All);
    }

    #[tokio::test]
    async fn test_known_total_limit() {
        let source = Arc::new(MemorySource::json(rows()));
        let exporter = ExportFetcher::<Value, _>::new(Arc::clone(&source)).with_known_total(40);

        let all = exporter
            .download(&FilterSpec::new(), &SortSpec::new())
            .await
            .expect("export");
        assert_eq!(all.len(), 40);
        assert_eq!(source.requests()[0].limit, Limit::Count(40));
    }

    #[tokio::test]
    async fn test_failure_is_returned_to_caller() {
        let source = Arc::new(MemorySource::json(rows()));
        source.fail_next(1);
        let exporter = ExportFetcher::<Value, _>::new(source);

        let err = exporter
            .download(&FilterSpec::new(), &SortSpec::new())
            .await
            .expect_err("should fail");
        assert!(matches!(err, ExportError::Source(SourceError::ServerError(_))));
    }

    struct CappedSource;

    #[async_trait]
    impl DataSource<u32> for CappedSource {
        async fn query(&self, _request: QueryRequest) -> Result<PageResponse<u32>, SourceError> {
            // Server silently caps the page size
            Ok(PageResponse {
                offset: 0,
                total: 500,
                results: (0..100).collect(),
            })
        }
    }

    #[tokio::test]
    async fn test_capped_response_is_incomplete() {
        let exporter = ExportFetcher::<u32, _>::new(Arc::new(CappedSource));
        let err = exporter
            .download(&FilterSpec::new(), &SortSpec::new())
            .await
            .expect_err("partial export");
        assert!(matches!(
            err,
            ExportError::Incomplete {
                expected: 500,
                received: 100
            }
        ));
    }
}
