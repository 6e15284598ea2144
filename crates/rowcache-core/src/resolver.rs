//! Maps a (page, page size) pair onto absolute row ranges and decides when
//! the cache needs a fetch.

use std::ops::Range;

use crate::cache::WindowedCache;
use crate::query::PageRequest;

/// Stateless helpers for turning a table page into row ranges.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageWindowResolver;

impl PageWindowResolver {
    /// Rows displayed for a 0-based `page`, clipped to `[0, total)`.
    pub fn visible_range(page: usize, page_size: usize, total: usize) -> Range<usize> {
        let start = page.saturating_mul(page_size).min(total);
        let end = start.saturating_add(page_size).min(total);
        start..end
    }

    /// True if any index in `range` is missing from the cache.
    pub fn has_gap<T: Clone>(range: &Range<usize>, cache: &WindowedCache<T>) -> bool {
        !cache.covers(range)
    }

    /// The fetch needed to show `page`, if any.
    ///
    /// Any gap requests the entire page in one call, even when a single row
    /// is missing. An unknown total (fresh or reset cache) always fetches so
    /// the response can establish it.
    pub fn fetch_request<T: Clone>(
        page: usize,
        page_size: usize,
        cache: &WindowedCache<T>,
    ) -> Option<PageRequest> {
        if page_size == 0 {
            return None;
        }
        if cache.total() == 0 && cache.last_merged_at().is_none() {
            return Some(PageRequest::for_page(page, page_size));
        }

        let range = Self::visible_range(page, page_size, cache.total());
        if Self::has_gap(&range, cache) {
            Some(PageRequest::for_page(page, page_size))
        } else {
            None
        }
    }

    /// Number of pages needed to show `total` rows (at least one).
    pub fn page_count(total: usize, page_size: usize) -> usize {
        if page_size == 0 {
            return 1;
        }
        total.div_ceil(page_size).max(1)
    }

    /// Pull `page` back into range after the total shrank.
    pub fn clamp_page(page: usize, page_size: usize, total: usize) -> usize {
        page.min(Self::page_count(total, page_size) - 1)
    }
}
