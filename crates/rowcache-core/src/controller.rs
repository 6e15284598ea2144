//! Per-view controller exposing the table contract.
//!
//! A `TableController` owns one view's `WindowedCache`, filter/sort state,
//! generation counter and `FetchCoordinator`. The surrounding UI calls the
//! `on_*` methods as the user pages, filters, sorts or downloads, polls for
//! fetch outcomes from its event loop, and renders `visible_rows()`.
//!
//! Controllers are never shared: each view instance creates its own.

use std::future::Future;
use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::WindowedCache;
use crate::config::ViewSettings;
use crate::coordinator::{FetchCoordinator, FetchOutcome, FetchParams, FetchState, Generation};
use crate::error::ExportError;
use crate::export::ExportFetcher;
use crate::query::{FilterEdit, FilterSpec, PageRequest, SortSpec, SortToggle};
use crate::resolver::PageWindowResolver;
use crate::source::DataSource;

pub struct TableController<T, S: ?Sized> {
    source: Arc<S>,
    cache: WindowedCache<T>,
    coordinator: FetchCoordinator<T>,
    generation: Generation,
    filters: FilterSpec,
    sort: SortSpec,
    /// 0-based
    page: usize,
    page_size: usize,
    notice: Option<String>,
}

impl<T, S> TableController<T, S>
where
    T: Clone + Send + 'static,
    S: DataSource<T> + ?Sized + 'static,
{
    /// Create a controller with an empty cache. Nothing is fetched until the
    /// view reports its first pagination state.
    pub fn new(source: Arc<S>, settings: ViewSettings) -> Self {
        Self {
            source,
            cache: WindowedCache::new(),
            coordinator: FetchCoordinator::new(settings.debounce),
            generation: Generation::default(),
            filters: FilterSpec::new(),
            sort: SortSpec::new(),
            page: 0,
            page_size: settings.page_size.max(1),
            notice: None,
        }
    }

    // =========================================================================
    // View contract
    // =========================================================================

    /// The table moved to `page` (1-based) or changed its page size.
    ///
    /// Once a total is known, a page past the end is pulled back to the last
    /// page before deciding whether to fetch.
    pub fn on_pagination_change(&mut self, page: usize, page_size: usize) {
        self.page = page.saturating_sub(1);
        self.page_size = page_size.max(1);
        if self.cache.last_merged_at().is_some() {
            self.page = PageWindowResolver::clamp_page(self.page, self.page_size, self.cache.total());
        }
        debug!(page = self.page, page_size = self.page_size, "Pagination changed");
        self.ensure_window();
    }

    /// A filter was edited. Returns true when the effective filters changed,
    /// in which case the cache is invalidated and the first page refetched.
    pub fn on_filter_change(&mut self, edit: FilterEdit) -> bool {
        if !self.filters.apply(edit) {
            return false;
        }
        self.invalidate();
        self.page = 0;
        self.ensure_window();
        true
    }

    /// A sortable column header was clicked.
    pub fn on_sort_change(&mut self, toggle: SortToggle) -> bool {
        if !self.sort.toggle(&toggle) {
            return false;
        }
        self.invalidate();
        self.page = 0;
        self.ensure_window();
        true
    }

    /// Download the full filtered result set as of now.
    ///
    /// The returned future owns everything it needs, so the view may keep
    /// paging while it runs; it never touches this controller's cache.
    pub fn on_download(&self) -> impl Future<Output = Result<Vec<T>, ExportError>> + Send + 'static {
        let exporter = ExportFetcher::<T, S>::new(Arc::clone(&self.source));
        let filters = self.filters.clone();
        let sort = self.sort.clone();
        async move { exporter.download(&filters, &sort).await }
    }

    /// Re-fetch the current page even if it is fully cached. This is the
    /// retry path after a failure.
    pub fn refresh(&mut self) {
        self.notice = None;
        let page = PageRequest::for_page(self.page, self.page_size);
        self.schedule(page);
    }

    /// Drop all cached rows (tab or view switch). Filters and sort are kept;
    /// the next pagination change fetches afresh.
    pub fn reset(&mut self) {
        self.invalidate();
    }

    // =========================================================================
    // Event loop integration
    // =========================================================================

    /// Apply completed fetches without blocking. Call from the UI loop.
    pub fn poll(&mut self) -> Vec<FetchOutcome> {
        let outcomes = self.coordinator.poll(self.generation, &mut self.cache);
        for outcome in &outcomes {
            self.after_outcome(outcome);
        }
        outcomes
    }

    /// Wait for the next fetch outcome, or `None` if nothing is pending.
    pub async fn next_outcome(&mut self) -> Option<FetchOutcome> {
        let outcome = self
            .coordinator
            .next_outcome(self.generation, &mut self.cache)
            .await?;
        self.after_outcome(&outcome);
        Some(outcome)
    }

    /// Wait until every scheduled and in-flight fetch has reported back.
    pub async fn settle(&mut self) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next_outcome().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    // =========================================================================
    // Rendering accessors
    // =========================================================================

    pub fn visible_range(&self) -> Range<usize> {
        PageWindowResolver::visible_range(self.page, self.page_size, self.cache.total())
    }

    /// Rows for the current page; `None` marks a row still loading.
    pub fn visible_rows(&self) -> Vec<Option<&T>> {
        self.cache.slice(self.visible_range())
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.cache.get(index)
    }

    pub fn cache(&self) -> &WindowedCache<T> {
        &self.cache
    }

    /// Current page, 1-based.
    pub fn page(&self) -> usize {
        self.page + 1
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        PageWindowResolver::page_count(self.cache.total(), self.page_size)
    }

    pub fn total(&self) -> usize {
        self.cache.total()
    }

    pub fn filters(&self) -> &FilterSpec {
        &self.filters
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn fetch_state(&self) -> FetchState {
        self.coordinator.state()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.coordinator.state(), FetchState::Scheduled | FetchState::Fetching)
    }

    /// Transient message for the user, e.g. a failed fetch.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Clear the cache, cancel any pending timer and start a new generation,
    /// all before anything else can observe the old rows.
    fn invalidate(&mut self) {
        self.generation = self.generation.next();
        self.cache.reset();
        self.coordinator.reset();
        info!(generation = %self.generation, "View invalidated");
    }

    /// Schedule a fetch if the current page has a gap. Otherwise cancel any
    /// pending timer, so a burst that ends on a cached page fetches nothing.
    fn ensure_window(&mut self) {
        match PageWindowResolver::fetch_request(self.page, self.page_size, &self.cache) {
            Some(page) => self.schedule(page),
            None => self.coordinator.cancel_pending(),
        }
    }

    fn schedule(&mut self, page: PageRequest) {
        let params = FetchParams {
            page,
            filters: self.filters.clone(),
            sort: self.sort.clone(),
        };
        let source = Arc::clone(&self.source);
        self.coordinator.schedule(params, self.generation, move |request| async move {
            source.query(request).await
        });
    }

    fn after_outcome(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Merged { total, .. } => {
                let clamped = PageWindowResolver::clamp_page(self.page, self.page_size, *total);
                if clamped != self.page {
                    info!(from = self.page, to = clamped, total, "Total shrank, moving to last page");
                    self.page = clamped;
                    self.ensure_window();
                }
            }
            FetchOutcome::Failed { error, .. } => {
                self.notice = Some(format!("Failed to load rows: {}", error));
            }
            FetchOutcome::Rejected { error, .. } => {
                self.notice = Some(format!("Ignored inconsistent response: {}", error));
            }
            FetchOutcome::Dispatched { .. } | FetchOutcome::Discarded { .. } => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
