//! Debounced fetch scheduling for one view.
//!
//! `FetchCoordinator` turns bursts of view changes into a single data-source
//! call and merges completed responses into the view's `WindowedCache`.
//!
//! Each `schedule` call spawns a Tokio task that sleeps for the quiet period
//! and then checks whether it is still the latest ticket; superseded tasks
//! bail out before dispatch. Dispatched requests always run to completion.
//! Their results come back over an MPSC channel and are applied by the owner
//! in completion order, where the generation tag decides whether they may
//! touch the cache at all.
//!
//! State machine: `Idle -> Scheduled -> Fetching -> Merged -> Idle`.
//! `reset()` returns to `Idle` from any state.

use std::fmt;
use std::future::Future;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::cache::WindowedCache;
use crate::error::{CacheError, SourceError};
use crate::query::{FilterSpec, PageRequest, PageResponse, QueryRequest, SortSpec};

// ============================================================================
// Constants
// ============================================================================

/// Quiet period before a scheduled fetch is dispatched.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Buffer size for the completion channel.
/// Only the latest schedule dispatches, so a handful of in-flight
/// completions is the realistic maximum.
const CHANNEL_BUFFER_SIZE: usize = 32;

// ============================================================================
// Types
// ============================================================================

/// Filter/sort epoch of a view. Bumped on every filter or sort change; a
/// response tagged with an older generation is never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Scheduled,
    Fetching,
    /// A response was merged; lasts until the owner next polls.
    Merged,
}

/// Parameters of one page fetch, captured at schedule time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchParams {
    pub page: PageRequest,
    pub filters: FilterSpec,
    pub sort: SortSpec,
}

impl FetchParams {
    pub fn to_request(&self) -> QueryRequest {
        QueryRequest::page(self.page, &self.filters, &self.sort)
    }
}

/// Messages sent from fetch tasks back to the coordinator.
enum FetchEvent<T> {
    /// The debounce timer was cancelled by a newer schedule or a reset
    Superseded { ticket: u64 },
    /// The quiet period elapsed and the request was sent
    Dispatched { ticket: u64, page: PageRequest },
    /// The request finished, successfully or not
    Completed {
        ticket: u64,
        generation: Generation,
        result: Result<PageResponse<T>, SourceError>,
    },
}

/// What happened when a fetch event was applied.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The request left the debounce window and was sent.
    Dispatched { page: PageRequest },
    /// Rows landed in the cache.
    Merged {
        generation: Generation,
        rows: Range<usize>,
        total: usize,
    },
    /// A late response for an outdated generation was dropped unmerged.
    Discarded { generation: Generation },
    /// The query failed; the cache keeps its last known-good rows.
    Failed { generation: Generation, error: SourceError },
    /// The response was inconsistent and nothing was merged.
    Rejected { generation: Generation, error: CacheError },
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct FetchCoordinator<T> {
    debounce: Duration,
    state: FetchState,
    latest_ticket: Arc<AtomicU64>,
    scheduled_ticket: Option<u64>,
    fetching_ticket: Option<u64>,
    /// Spawned tasks that have not yet reported a terminal event
    outstanding: usize,
    tx: mpsc::Sender<FetchEvent<T>>,
    rx: mpsc::Receiver<FetchEvent<T>>,
}

impl<T> fmt::Debug for FetchCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("debounce", &self.debounce)
            .field("state", &self.state)
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

impl<T: Clone + Send + 'static> FetchCoordinator<T> {
    pub fn new(debounce: Duration) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        Self {
            debounce,
            state: FetchState::Idle,
            latest_ticket: Arc::new(AtomicU64::new(0)),
            scheduled_ticket: None,
            fetching_ticket: None,
            outstanding: 0,
            tx,
            rx,
        }
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// True while any spawned fetch task has yet to report back.
    pub fn has_pending(&self) -> bool {
        self.outstanding > 0
    }

    /// Schedule a debounced fetch.
    ///
    /// A call arriving inside the quiet period replaces the pending one, so a
    /// burst of calls produces exactly one `fetch_fn` invocation carrying the
    /// last call's parameters. Must be called from within a Tokio runtime.
    pub fn schedule<F, Fut>(&mut self, params: FetchParams, generation: Generation, fetch_fn: F)
    where
        F: FnOnce(QueryRequest) -> Fut + Send + 'static,
        Fut: Future<Output = Result<PageResponse<T>, SourceError>> + Send + 'static,
    {
        let ticket = self.latest_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        self.scheduled_ticket = Some(ticket);
        self.outstanding += 1;
        self.state = FetchState::Scheduled;
        debug!(
            ticket,
            %generation,
            offset = params.page.offset,
            limit = params.page.limit,
            "Fetch scheduled"
        );

        let latest = Arc::clone(&self.latest_ticket);
        let tx = self.tx.clone();
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            if latest.load(Ordering::SeqCst) != ticket {
                Self::send_event(&tx, FetchEvent::Superseded { ticket }).await;
                return;
            }

            let page = params.page;
            Self::send_event(&tx, FetchEvent::Dispatched { ticket, page }).await;
            let result = fetch_fn(params.to_request()).await;
            Self::send_event(
                &tx,
                FetchEvent::Completed {
                    ticket,
                    generation,
                    result,
                },
            )
            .await;
        });
    }

    /// Cancel any pending debounce timer and return to `Idle`.
    ///
    /// Requests already in flight are left to finish; their responses are
    /// dropped by the generation check when they arrive.
    pub fn reset(&mut self) {
        // Bumping the ticket makes a sleeping timer task bail out on wake
        self.latest_ticket.fetch_add(1, Ordering::SeqCst);
        self.scheduled_ticket = None;
        self.fetching_ticket = None;
        self.state = FetchState::Idle;
        trace!(outstanding = self.outstanding, "Coordinator reset");
    }

    /// Cancel a pending debounce timer without touching an in-flight request.
    ///
    /// Used when the final call of a burst needs no fetch at all.
    pub fn cancel_pending(&mut self) {
        if self.scheduled_ticket.take().is_none() {
            return;
        }
        self.latest_ticket.fetch_add(1, Ordering::SeqCst);
        if self.state == FetchState::Scheduled {
            self.state = if self.fetching_ticket.is_some() {
                FetchState::Fetching
            } else {
                FetchState::Idle
            };
        }
        trace!(outstanding = self.outstanding, "Pending fetch cancelled");
    }

    /// Apply every event that has already arrived, without waiting.
    pub fn poll(&mut self, current: Generation, cache: &mut WindowedCache<T>) -> Vec<FetchOutcome> {
        self.acknowledge_merge();

        // Collect all pending events first, then process them
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }

        events
            .into_iter()
            .filter_map(|event| self.apply(event, current, cache))
            .collect()
    }

    /// Wait for the next visible outcome. Returns `None` when nothing is
    /// scheduled or in flight.
    pub async fn next_outcome(
        &mut self,
        current: Generation,
        cache: &mut WindowedCache<T>,
    ) -> Option<FetchOutcome> {
        while self.outstanding > 0 {
            let event = self.rx.recv().await?;
            if let Some(outcome) = self.apply(event, current, cache) {
                return Some(outcome);
            }
        }
        None
    }

    /// Wait until every scheduled or in-flight fetch has reported back.
    pub async fn settle(&mut self, current: Generation, cache: &mut WindowedCache<T>) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next_outcome(current, cache).await {
            outcomes.push(outcome);
        }
        outcomes
    }

    fn acknowledge_merge(&mut self) {
        if self.state == FetchState::Merged {
            self.state = FetchState::Idle;
        }
    }

    /// Helper to send fetch events, logging any channel errors
    async fn send_event(tx: &mpsc::Sender<FetchEvent<T>>, event: FetchEvent<T>) {
        if tx.send(event).await.is_err() {
            error!("Failed to send fetch event - coordinator dropped");
        }
    }

    fn apply(
        &mut self,
        event: FetchEvent<T>,
        current: Generation,
        cache: &mut WindowedCache<T>,
    ) -> Option<FetchOutcome> {
        match event {
            FetchEvent::Superseded { ticket } => {
                self.outstanding = self.outstanding.saturating_sub(1);
                trace!(ticket, "Debounced fetch superseded");
                None
            }
            FetchEvent::Dispatched { ticket, page } => {
                if self.scheduled_ticket == Some(ticket) {
                    self.scheduled_ticket = None;
                    self.fetching_ticket = Some(ticket);
                    self.state = FetchState::Fetching;
                }
                debug!(ticket, offset = page.offset, limit = page.limit, "Fetch dispatched");
                Some(FetchOutcome::Dispatched { page })
            }
            FetchEvent::Completed {
                ticket,
                generation,
                result,
            } => {
                self.outstanding = self.outstanding.saturating_sub(1);
                let was_current_fetch = self.fetching_ticket == Some(ticket);
                if was_current_fetch {
                    self.fetching_ticket = None;
                }

                if generation != current {
                    // Expected under rapid interaction, not a failure
                    trace!(ticket, %generation, %current, "Discarding stale response");
                    return Some(FetchOutcome::Discarded { generation });
                }

                let outcome = match result {
                    Ok(response) => match cache.apply_page(&response) {
                        Ok(rows) => {
                            debug!(
                                ticket,
                                %generation,
                                offset = rows.start,
                                count = rows.len(),
                                total = response.total,
                                "Merged response"
                            );
                            FetchOutcome::Merged {
                                generation,
                                rows,
                                total: response.total,
                            }
                        }
                        Err(error) => {
                            warn!(ticket, error = %error, "Rejected inconsistent response");
                            FetchOutcome::Rejected { generation, error }
                        }
                    },
                    Err(error) => {
                        warn!(ticket, error = %error, "Fetch failed, keeping cached rows");
                        FetchOutcome::Failed { generation, error }
                    }
                };

                if was_current_fetch && self.scheduled_ticket.is_none() {
                    self.state = match outcome {
                        FetchOutcome::Merged { .. } => FetchState::Merged,
                        _ => FetchState::Idle,
                    };
                } else if matches!(outcome, FetchOutcome::Merged { .. }) && self.state == FetchState::Idle {
                    self.state = FetchState::Merged;
                }
                Some(outcome)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{SortDirection, SortToggle};
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<QueryRequest>>>;
    type BoxedFetch = std::pin::Pin<Box<dyn Future<Output = Result<PageResponse<String>, SourceError>> + Send>>;

    fn params(page: usize, sort: &SortSpec) -> FetchParams {
        FetchParams {
            page: PageRequest::for_page(page, 10),
            filters: FilterSpec::new(),
            sort: sort.clone(),
        }
    }

    /// A fetch function answering with `tag`-prefixed rows after `latency`.
    fn responder(
        calls: Calls,
        total: usize,
        tag: &'static str,
        latency: Duration,
    ) -> impl FnOnce(QueryRequest) -> BoxedFetch + Send + 'static {
        move |request: QueryRequest| -> BoxedFetch {
            Box::pin(async move {
                if let Ok(mut log) = calls.lock() {
                    log.push(request.clone());
                }
                tokio::time::sleep(latency).await;
                let end = (request.offset + 10).min(total);
                Ok(PageResponse {
                    offset: request.offset,
                    total,
                    results: (request.offset..end).map(|i| format!("{}{}", tag, i)).collect(),
                })
            })
        }
    }

    fn failing() -> impl FnOnce(QueryRequest) -> std::future::Ready<Result<PageResponse<String>, SourceError>>
           + Send
           + 'static {
        |_request: QueryRequest| std::future::ready(Err(SourceError::ServerError("boom".to_string())))
    }

    fn call_log(calls: &Calls) -> Vec<QueryRequest> {
        calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_schedule_fetches_and_merges() {
        let calls = Calls::default();
        let mut coordinator = FetchCoordinator::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        let mut cache = WindowedCache::new();
        let generation = Generation::default();

        coordinator.schedule(
            params(0, &SortSpec::new()),
            generation,
            responder(calls.clone(), 25, "r", Duration::ZERO),
        );
        assert_eq!(coordinator.state(), FetchState::Scheduled);

        let outcomes = coordinator.settle(generation, &mut cache).await;
        assert!(matches!(outcomes[0], FetchOutcome::Dispatched { .. }));
        assert!(matches!(
            outcomes[1],
            FetchOutcome::Merged { ref rows, total: 25, .. } if *rows == (0..10)
        ));
        assert_eq!(coordinator.state(), FetchState::Merged);
        assert_eq!(call_log(&calls).len(), 1);
        assert_eq!(cache.get(9).map(String::as_str), Some("r9"));

        // Next poll acknowledges the merge
        assert!(coordinator.poll(generation, &mut cache).is_empty());
        assert_eq!(coordinator.state(), FetchState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sort_burst_collapses_to_last_call() {
        let calls = Calls::default();
        let mut coordinator = FetchCoordinator::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        let mut cache = WindowedCache::new();
        let generation = Generation::default();

        let mut sort = SortSpec::new();
        let fields = ["name", "name", "amount", "date", "name"];
        for field in fields {
            sort.toggle(&SortToggle::multi(field));
            coordinator.schedule(
                params(0, &sort),
                generation,
                responder(calls.clone(), 25, "r", Duration::ZERO),
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        coordinator.settle(generation, &mut cache).await;

        let log = call_log(&calls);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].sort, sort.to_query());
        assert_eq!(log[0].sort.len(), 2);
        assert_eq!(log[0].sort[0].field, "amount");
        assert_eq!(log[0].sort[1].direction, SortDirection::Asc);
        assert!(!coordinator.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_outside_window_each_fetch() {
        let calls = Calls::default();
        let mut coordinator = FetchCoordinator::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        let mut cache = WindowedCache::new();
        let generation = Generation::default();

        coordinator.schedule(params(0, &SortSpec::new()), generation, responder(calls.clone(), 25, "r", Duration::ZERO));
        coordinator.settle(generation, &mut cache).await;
        coordinator.schedule(params(1, &SortSpec::new()), generation, responder(calls.clone(), 25, "r", Duration::ZERO));
        coordinator.settle(generation, &mut cache).await;

        assert_eq!(call_log(&calls).len(), 2);
        assert!(cache.covers(&(0..20)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_is_discarded() {
        let calls = Calls::default();
        let mut coordinator = FetchCoordinator::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        let mut cache = WindowedCache::new();
        let old = Generation::default();

        coordinator.schedule(
            params(0, &SortSpec::new()),
            old,
            responder(calls.clone(), 25, "old", Duration::from_secs(2)),
        );
        // Let the slow request dispatch
        let dispatched = coordinator.next_outcome(old, &mut cache).await;
        assert!(matches!(dispatched, Some(FetchOutcome::Dispatched { .. })));
        assert_eq!(coordinator.state(), FetchState::Fetching);

        // Filter change: new generation, coordinator forced idle
        let current = old.next();
        cache.reset();
        coordinator.reset();
        assert_eq!(coordinator.state(), FetchState::Idle);
        coordinator.schedule(
            params(0, &SortSpec::new()),
            current,
            responder(calls.clone(), 12, "new", Duration::ZERO),
        );

        let outcomes = coordinator.settle(current, &mut cache).await;
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, FetchOutcome::Discarded { generation } if *generation == old)));
        assert_eq!(cache.total(), 12);
        assert_eq!(cache.get(0).map(String::as_str), Some("new0"));
        assert!(cache.slice(0..10).into_iter().flatten().all(|r| r.starts_with("new")));
        // Both requests were sent; neither was aborted
        assert_eq!(call_log(&calls).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_arriving_after_new_merge() {
        let calls = Calls::default();
        let mut coordinator = FetchCoordinator::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        let mut cache = WindowedCache::new();
        let old = Generation::default();

        coordinator.schedule(params(0, &SortSpec::new()), old, responder(calls.clone(), 25, "old", Duration::from_secs(5)));
        coordinator.next_outcome(old, &mut cache).await;

        let current = old.next();
        cache.reset();
        coordinator.reset();
        coordinator.schedule(params(0, &SortSpec::new()), current, responder(calls.clone(), 30, "new", Duration::ZERO));

        // Wait for the new generation's rows to land
        loop {
            match coordinator.next_outcome(current, &mut cache).await {
                Some(FetchOutcome::Merged { .. }) => break,
                Some(_) => continue,
                None => panic!("new fetch never merged"),
            }
        }
        let snapshot = cache.clone();
        assert_eq!(snapshot.get(3).map(String::as_str), Some("new3"));

        // The slow old-generation response arrives afterwards and changes nothing
        let late = coordinator.settle(current, &mut cache).await;
        assert!(matches!(late.as_slice(), [FetchOutcome::Discarded { .. }]));
        assert_eq!(cache, snapshot);
        assert_eq!(cache.total(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_cached_rows() {
        let calls = Calls::default();
        let mut coordinator = FetchCoordinator::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        let mut cache = WindowedCache::new();
        let generation = Generation::default();

        coordinator.schedule(params(0, &SortSpec::new()), generation, responder(calls.clone(), 25, "r", Duration::ZERO));
        coordinator.settle(generation, &mut cache).await;
        let before = cache.clone();

        coordinator.schedule(params(1, &SortSpec::new()), generation, failing());
        let outcomes = coordinator.settle(generation, &mut cache).await;

        assert!(outcomes
            .iter()
            .any(|o| matches!(o, FetchOutcome::Failed { error: SourceError::ServerError(_), .. })));
        assert_eq!(cache, before);
        assert_eq!(coordinator.state(), FetchState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_pending_timer() {
        let calls = Calls::default();
        let mut coordinator = FetchCoordinator::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        let mut cache = WindowedCache::new();
        let generation = Generation::default();

        coordinator.schedule(params(0, &SortSpec::new()), generation, responder(calls.clone(), 25, "r", Duration::ZERO));
        coordinator.reset();

        let outcomes = coordinator.settle(generation, &mut cache).await;
        assert!(outcomes.is_empty());
        assert!(call_log(&calls).is_empty());
        assert!(cache.is_empty());
        assert_eq!(coordinator.state(), FetchState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_keeps_in_flight_request() {
        let calls = Calls::default();
        let mut coordinator = FetchCoordinator::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        let mut cache = WindowedCache::new();
        let generation = Generation::default();

        coordinator.schedule(params(0, &SortSpec::new()), generation, responder(calls.clone(), 25, "r", Duration::from_secs(1)));
        let dispatched = coordinator.next_outcome(generation, &mut cache).await;
        assert!(matches!(dispatched, Some(FetchOutcome::Dispatched { .. })));

        coordinator.schedule(params(1, &SortSpec::new()), generation, responder(calls.clone(), 25, "r", Duration::ZERO));
        coordinator.cancel_pending();
        assert_eq!(coordinator.state(), FetchState::Fetching);

        coordinator.settle(generation, &mut cache).await;
        let log = call_log(&calls);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].offset, 0);
        assert!(cache.covers(&(0..10)));
        assert!(!cache.contains(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_outcome_with_nothing_pending() {
        let mut coordinator: FetchCoordinator<String> = FetchCoordinator::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        let mut cache = WindowedCache::new();
        assert!(coordinator
            .next_outcome(Generation::default(), &mut cache)
            .await
            .is_none());
    }

    #[test]
    fn test_generation_ordering() {
        let g = Generation::default();
        assert_eq!(g.value(), 0);
        assert!(g.next() > g);
        assert_eq!(g.next().next().value(), 2);
    }
}
