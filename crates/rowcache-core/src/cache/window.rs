use std::collections::BTreeMap;
use std::ops::Range;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::CacheError;
use crate::query::PageResponse;

/// Sparse, position-keyed cache of one view's result set.
///
/// Entries are keyed by absolute row index under the current filter/sort,
/// never by record identity, and no entry ever sits at an index `>= total`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedCache<T> {
    total: usize,
    entries: BTreeMap<usize, T>,
    last_merged_at: Option<DateTime<Utc>>,
}

impl<T> Default for WindowedCache<T> {
    fn default() -> Self {
        Self {
            total: 0,
            entries: BTreeMap::new(),
            last_merged_at: None,
        }
    }
}

impl<T: Clone> WindowedCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record at `index`, or `None` when that row has not been fetched.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of cached rows (not the result set size).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record the authoritative result-set size, dropping any rows that no
    /// longer exist.
    pub fn set_total(&mut self, total: usize) {
        if total < self.total {
            let dropped = self.entries.split_off(&total).len();
            if dropped > 0 {
                debug!(old_total = self.total, new_total = total, dropped, "Total shrank, dropping rows");
            }
        }
        self.total = total;
    }

    /// Overwrite rows `[offset, offset + records.len())`.
    ///
    /// The whole slice lands or nothing does.
    pub fn merge(&mut self, offset: usize, records: &[T]) -> Result<(), CacheError> {
        let end = offset.saturating_add(records.len());
        if !records.is_empty() && end > self.total {
            return Err(CacheError::BeyondTotal {
                offset,
                end,
                total: self.total,
            });
        }

        for (i, record) in records.iter().enumerate() {
            self.entries.insert(offset + i, record.clone());
        }
        self.last_merged_at = Some(Utc::now());
        trace!(offset, count = records.len(), cached = self.entries.len(), "Merged rows");
        Ok(())
    }

    /// Apply a full data-source response: adopt its total, then merge its rows.
    ///
    /// The response is validated before anything changes, so a malformed
    /// response leaves the cache exactly as it was. An empty page past the
    /// end is valid and only updates the total.
    pub fn apply_page(&mut self, response: &PageResponse<T>) -> Result<Range<usize>, CacheError> {
        let end = response.offset.saturating_add(response.results.len());
        if !response.results.is_empty() && end > response.total {
            return Err(CacheError::BeyondTotal {
                offset: response.offset,
                end,
                total: response.total,
            });
        }

        self.set_total(response.total);
        self.merge(response.offset, &response.results)?;
        Ok(response.offset..end)
    }

    /// Drop every row and forget the total.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.total = 0;
        self.last_merged_at = None;
    }

    /// True when every index in `range` is cached.
    pub fn covers(&self, range: &Range<usize>) -> bool {
        range.clone().all(|i| self.entries.contains_key(&i))
    }

    /// Cached rows within `range`, `None` for gaps.
    pub fn slice(&self, range: Range<usize>) -> Vec<Option<&T>> {
        range.map(|i| self.entries.get(&i)).collect()
    }

    pub fn last_merged_at(&self) -> Option<DateTime<Utc>> {
        self.last_merged_at
    }

    pub fn age_minutes(&self) -> Option<i64> {
        self.last_merged_at
            .map(|at| (Utc::now() - at).num_minutes())
    }

    /// Human-readable age of the freshest merge, for a status bar.
    pub fn age_display(&self) -> String {
        let minutes = match self.age_minutes() {
            Some(m) => m,
            None => return "never".to_string(),
        };
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
