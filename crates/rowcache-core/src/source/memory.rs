//! In-process data source over a fixed set of rows.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use super::DataSource;
use crate::error::SourceError;
use crate::query::{Filter, FilterOperator, Limit, PageResponse, QueryRequest, SortDirection, SortKey};
use crate::utils::{cmp_ignore_case, contains_ignore_case};

type Matcher<T> = Arc<dyn Fn(&T, &Filter) -> bool + Send + Sync>;
type Comparator<T> = Arc<dyn Fn(&T, &T, &SortKey) -> Ordering + Send + Sync>;

/// Answers queries from a `Vec` held in memory.
///
/// Filtering and ordering are delegated to caller-supplied closures;
/// [`MemorySource::json`] provides field-based ones for JSON rows. Every
/// request is recorded so callers can inspect what was asked.
pub struct MemorySource<T> {
    rows: Mutex<Vec<T>>,
    matcher: Matcher<T>,
    comparator: Comparator<T>,
    latency: Duration,
    failures_pending: AtomicUsize,
    requests: Mutex<Vec<QueryRequest>>,
}

impl<T: Clone + Send + 'static> MemorySource<T> {
    pub fn new<M, C>(rows: Vec<T>, matcher: M, comparator: C) -> Self
    where
        M: Fn(&T, &Filter) -> bool + Send + Sync + 'static,
        C: Fn(&T, &T, &SortKey) -> Ordering + Send + Sync + 'static,
    {
        Self {
            rows: Mutex::new(rows),
            matcher: Arc::new(matcher),
            comparator: Arc::new(comparator),
            latency: Duration::ZERO,
            failures_pending: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Delay every answer, simulating a slow backend.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next `count` queries fail with a server error.
    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, AtomicOrdering::SeqCst);
    }

    /// Replace the backing rows, as if the data changed underneath the view.
    pub fn replace_rows(&self, rows: Vec<T>) {
        if let Ok(mut guard) = self.rows.lock() {
            *guard = rows;
        }
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn answer(&self, request: &QueryRequest) -> Result<PageResponse<T>, SourceError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| SourceError::Other("memory source poisoned".to_string()))?;

        let mut matched: Vec<&T> = rows
            .iter()
            .filter(|row| request.filters.iter().all(|f| (self.matcher)(row, f)))
            .collect();

        matched.sort_by(|a, b| {
            request
                .sort
                .iter()
                .map(|key| (self.comparator)(a, b, key))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        let total = matched.len();
        let start = request.offset.min(total);
        let end = match request.limit {
            Limit::Count(n) => start.saturating_add(n).min(total),
            Limit::All => total,
        };

        Ok(PageResponse {
            offset: request.offset,
            total,
            results: matched[start..end].iter().map(|r| (*r).clone()).collect(),
        })
    }
}

impl MemorySource<Value> {
    /// Source over JSON objects, filtering and sorting by top-level fields.
    ///
    /// Numbers compare numerically; everything else compares as
    /// case-insensitive text.
    pub fn json(rows: Vec<Value>) -> Self {
        Self::new(rows, json_matches, json_compare)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> DataSource<T> for MemorySource<T> {
    async fn query(&self, request: QueryRequest) -> Result<PageResponse<T>, SourceError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        trace!(offset = request.offset, limit = ?request.limit, "Memory query");

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failing = self
            .failures_pending
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::ServerError("injected failure".to_string()));
        }

        self.answer(&request)
    }
}

fn field_text(row: &Value, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => cmp_ignore_case(a, b),
    }
}

fn json_matches(row: &Value, filter: &Filter) -> bool {
    let value = field_text(row, &filter.field).unwrap_or_default();
    let target = filter.value.as_str();
    match filter.operator {
        FilterOperator::Equals => compare_text(&value, target) == Ordering::Equal,
        FilterOperator::NotEquals => compare_text(&value, target) != Ordering::Equal,
        FilterOperator::Contains => contains_ignore_case(&value, target),
        FilterOperator::StartsWith => value.to_lowercase().starts_with(&target.to_lowercase()),
        FilterOperator::EndsWith => value.to_lowercase().ends_with(&target.to_lowercase()),
        FilterOperator::GreaterThan => compare_text(&value, target) == Ordering::Greater,
        FilterOperator::GreaterThanOrEqual => compare_text(&value, target) != Ordering::Less,
        FilterOperator::LessThan => compare_text(&value, target) == Ordering::Less,
        FilterOperator::LessThanOrEqual => compare_text(&value, target) != Ordering::Greater,
        FilterOperator::IsEmpty => value.is_empty(),
        FilterOperator::IsNotEmpty => !value.is_empty(),
    }
}

fn json_compare(a: &Value, b: &Value, key: &SortKey) -> Ordering {
    let ordering = match (field_text(a, &key.field), field_text(b, &key.field)) {
        (Some(x), Some(y)) => compare_text(&x, &y),
        // Missing values sort last in ascending order
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    match key.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}
