// Query cache
// Async results keyed by string, with one fetch in flight per key

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::RequestError;

/// Base delay for exponential backoff between retries (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Per-query fetch behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Extra attempts after a retryable failure
    pub retry: u32,

    /// Mark the entry stale when the application regains focus
    pub refetch_on_window_focus: bool,

    /// Mark the entry stale when the network comes back
    pub refetch_on_reconnect: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            retry: 3,
            refetch_on_window_focus: true,
            refetch_on_reconnect: true,
        }
    }
}

/// Resolution status of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No fetch has settled yet
    Pending,
    /// The last fetch produced data
    Success,
    /// The last fetch failed
    Error,
}

/// Point-in-time view of a cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<T> {
    /// Data from the most recent successful fetch
    pub data: Option<T>,
    pub status: QueryStatus,
    /// A fetch is currently in flight
    pub is_fetching: bool,
    /// The entry was invalidated since it last settled
    pub is_stale: bool,
    /// Error from the most recent fetch, if it failed
    pub error: Option<RequestError>,
    pub data_updated_at: Option<DateTime<Utc>>,
}

impl<T> QuerySnapshot<T> {
    /// Snapshot of a key that has never been queried
    pub fn pending() -> Self {
        Self {
            data: None,
            status: QueryStatus::Pending,
            is_fetching: false,
            is_stale: false,
            error: None,
            data_updated_at: None,
        }
    }

    /// First fetch still running
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Pending && self.is_fetching
    }

    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }
}

type InFlight = Shared<BoxFuture<'static, ()>>;

struct QueryEntry<T> {
    /// Unique per entry, so a fetch never settles into a replacement entry
    id: u64,
    data: Option<T>,
    error: Option<RequestError>,
    status: QueryStatus,
    data_updated_at: Option<DateTime<Utc>>,
    options: QueryOptions,
    stale: bool,
    /// Bumped on every invalidation
    generation: u64,
    in_flight: Option<InFlight>,
}

impl<T: Clone> QueryEntry<T> {
    fn new(id: u64, options: QueryOptions) -> Self {
        Self {
            id,
            data: None,
            error: None,
            status: QueryStatus::Pending,
            data_updated_at: None,
            options,
            stale: false,
            generation: 0,
            in_flight: None,
        }
    }

    fn snapshot(&self) -> QuerySnapshot<T> {
        QuerySnapshot {
            data: self.data.clone(),
            status: self.status,
            is_fetching: self.in_flight.is_some(),
            is_stale: self.stale,
            error: self.error.clone(),
            data_updated_at: self.data_updated_at,
        }
    }

    fn settle(&mut self, fetch_generation: u64, result: Result<T, RequestError>) {
        self.in_flight = None;
        match result {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
                self.status = QueryStatus::Success;
                self.data_updated_at = Some(Utc::now());
            }
            Err(e) => {
                self.error = Some(e);
                self.status = QueryStatus::Error;
            }
        }
        // Invalidated while the fetch was running
        self.stale = self.generation != fetch_generation;
    }

    fn mark_stale(&mut self) {
        self.stale = true;
        self.generation += 1;
    }
}

/// Thread-safe cache of async query results
///
/// Clones share the same entries.
pub struct QueryCache<T> {
    entries: Arc<DashMap<String, QueryEntry<T>>>,

    /// Source of entry ids
    next_id: Arc<AtomicU64>,
}

impl<T> QueryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current state of a key without triggering a fetch
    pub fn snapshot(&self, key: &str) -> QuerySnapshot<T> {
        self.entries
            .get(key)
            .map(|entry| entry.snapshot())
            .unwrap_or_else(QuerySnapshot::pending)
    }

    /// Resolve a key through the cache.
    ///
    /// Joins the fetch already in flight for the key if there is one. A
    /// settled entry that is not stale is returned as is; anything else starts
    /// a new fetch with `fetcher`.
    pub async fn query<F, Fut>(&self, key: &str, options: QueryOptions, fetcher: F) -> QuerySnapshot<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        let in_flight = {
            let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
                QueryEntry::new(self.next_id.fetch_add(1, Ordering::Relaxed), options)
            });
            entry.options = options;

            if let Some(in_flight) = entry.in_flight.clone() {
                tracing::debug!(key = key, "Joining in-flight query");
                in_flight
            } else {
                if entry.status != QueryStatus::Pending && !entry.stale {
                    return entry.snapshot();
                }

                tracing::debug!(key = key, "Starting query fetch");
                let in_flight =
                    self.start_fetch(key.to_string(), entry.id, entry.generation, options.retry, fetcher);
                entry.in_flight = Some(in_flight.clone());
                in_flight
            }
        };

        in_flight.await;
        self.snapshot(key)
    }

    /// Mark a key stale so the next query refetches it
    pub fn invalidate(&self, key: &str) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.mark_stale();
                tracing::debug!(key = key, "Query invalidated");
                true
            }
            None => false,
        }
    }

    /// Drop a key entirely; it reads as pending again
    pub fn reset(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            tracing::debug!(key = key, "Query reset");
        }
        removed
    }

    /// Mark stale every settled entry that refetches on window focus
    pub fn notify_window_focus(&self) -> Vec<String> {
        self.mark_stale_where(|options| options.refetch_on_window_focus)
    }

    /// Mark stale every settled entry that refetches on reconnect
    pub fn notify_reconnect(&self) -> Vec<String> {
        self.mark_stale_where(|options| options.refetch_on_reconnect)
    }

    fn mark_stale_where(&self, enabled: impl Fn(&QueryOptions) -> bool) -> Vec<String> {
        let mut keys = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.status != QueryStatus::Pending && enabled(&entry.options) {
                entry.mark_stale();
                keys.push(entry.key().clone());
            }
        }
        keys
    }

    /// Build the shared fetch future; it writes its own result back
    fn start_fetch<F, Fut>(
        &self,
        key: String,
        entry_id: u64,
        generation: u64,
        retry: u32,
        fetcher: F,
    ) -> InFlight
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);

        async move {
            let result = fetch_with_retry(&key, retry, fetcher).await;

            match entries.get_mut(&key) {
                Some(mut entry) if entry.id == entry_id => entry.settle(generation, result),
                _ => tracing::debug!(key = %key, "Discarding result for reset query"),
            }
        }
        .boxed()
        .shared()
    }
}

impl<T> Default for QueryCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

/// Run a fetcher, retrying retryable failures with exponential backoff
async fn fetch_with_retry<T, F, Fut>(key: &str, retry: u32, fetcher: F) -> Result<T, RequestError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 0;
    loop {
        let attempt_fut = fetcher();
        match attempt_fut.await {
            Ok(data) => return Ok(data),
            Err(e) if attempt < retry && e.is_retryable() => {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    key = key,
                    error = %e,
                    "Query failed, retrying after {}ms (attempt {}/{})",
                    delay,
                    attempt + 1,
                    retry
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Exponential backoff with up to 10% jitter
fn backoff_delay(attempt: u32) -> u64 {
    let delay = RETRY_BASE_DELAY_MS * 2_u64.pow(attempt);
    let jitter = (delay as f64 * 0.1 * rand::random::<f64>()) as u64;
    delay + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const KEY: &str = "sprint";

    fn no_retry() -> QueryOptions {
        QueryOptions {
            retry: 0,
            refetch_on_window_focus: false,
            refetch_on_reconnect: false,
        }
    }

    /// Fetcher returning its call number after a short delay
    fn counting_fetcher(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, Result<usize, RequestError>> + Send + Sync + 'static {
        move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(n)
            }
            .boxed()
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let delay0 = backoff_delay(0);
        let delay1 = backoff_delay(1);
        let delay2 = backoff_delay(2);

        assert!((1000..=1100).contains(&delay0));
        assert!((2000..=2200).contains(&delay1));
        assert!((4000..=4400).contains(&delay2));
    }

    #[test]
    fn test_unknown_key_is_pending() {
        let cache: QueryCache<usize> = QueryCache::new();
        let snapshot = cache.snapshot(KEY);
        assert_eq!(snapshot, QuerySnapshot::pending());
        assert!(!snapshot.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_fetches_once_then_serves_cache() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache.query(KEY, no_retry(), counting_fetcher(calls.clone())).await;
        let second = cache.query(KEY, no_retry(), counting_fetcher(calls.clone())).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(first.is_success());
        assert_eq!(first.data, Some(1));
        assert_eq!(second.data, Some(1));
        assert!(first.data_updated_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_queries_share_one_fetch() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            cache.query(KEY, no_retry(), counting_fetcher(calls.clone())),
            cache.query(KEY, no_retry(), counting_fetcher(calls.clone())),
            cache.query(KEY, no_retry(), counting_fetcher(calls.clone())),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.data, Some(1));
        assert_eq!(b.data, Some(1));
        assert_eq!(c.data, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_in_flight_fetch() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let background = cache.clone();
        let fetcher = counting_fetcher(calls.clone());
        let handle = tokio::spawn(async move { background.query(KEY, no_retry(), fetcher).await });
        tokio::task::yield_now().await;

        let during = cache.snapshot(KEY);
        assert!(during.is_loading());
        assert_eq!(during.data, None);

        handle.await.unwrap();
        let after = cache.snapshot(KEY);
        assert!(!after.is_fetching);
        assert!(after.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_refetches_on_next_query() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.query(KEY, no_retry(), counting_fetcher(calls.clone())).await;
        assert!(cache.invalidate(KEY));
        assert!(cache.snapshot(KEY).is_stale);
        // Stale data stays readable until the refetch lands
        assert_eq!(cache.snapshot(KEY).data, Some(1));

        let refreshed = cache.query(KEY, no_retry(), counting_fetcher(calls.clone())).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshed.data, Some(2));
        assert!(!refreshed.is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_during_fetch_settles_stale() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let background = cache.clone();
        let fetcher = counting_fetcher(calls.clone());
        let handle = tokio::spawn(async move { background.query(KEY, no_retry(), fetcher).await });
        tokio::task::yield_now().await;

        cache.invalidate(KEY);
        let settled = handle.await.unwrap();

        assert!(settled.is_success());
        assert!(settled.is_stale);
    }

    #[test]
    fn test_invalidate_unknown_key() {
        let cache: QueryCache<usize> = QueryCache::new();
        assert!(!cache.invalidate(KEY));
        assert!(!cache.reset(KEY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_returns_to_pending() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.query(KEY, no_retry(), counting_fetcher(calls.clone())).await;
        assert!(cache.reset(KEY));
        assert_eq!(cache.snapshot(KEY).status, QueryStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_fetch_discards_result() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let background = cache.clone();
        let fetcher = counting_fetcher(calls.clone());
        let handle = tokio::spawn(async move { background.query(KEY, no_retry(), fetcher).await });
        tokio::task::yield_now().await;

        cache.reset(KEY);
        let settled = handle.await.unwrap();

        assert_eq!(settled.status, QueryStatus::Pending);
        assert_eq!(cache.snapshot(KEY).status, QueryStatus::Pending);
    }

    #[tokio::test]
    async fn test_error_is_cached_without_refetch() {
        let cache: QueryCache<usize> = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            cache
                .query(KEY, no_retry(), move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(RequestError::transport("timeout", "deadline elapsed")) }
                })
                .await;
        }

        let snapshot = cache.snapshot(KEY);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(snapshot.is_error());
        assert!(snapshot.error.unwrap().is_transport());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_are_retried() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions {
            retry: 3,
            ..no_retry()
        };

        let counter = Arc::clone(&calls);
        let snapshot = cache
            .query(KEY, options, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RequestError::from_response(503, "busy".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(snapshot.data, Some(2));
    }

    #[tokio::test]
    async fn test_auth_errors_are_never_retried() {
        let cache: QueryCache<usize> = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = QueryOptions {
            retry: 3,
            ..no_retry()
        };

        let counter = Arc::clone(&calls);
        let snapshot = cache
            .query(KEY, options, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RequestError::AuthRequired) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.error, Some(RequestError::AuthRequired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_and_reconnect_respect_options() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.query("quiet", no_retry(), counting_fetcher(calls.clone())).await;
        cache
            .query("eager", QueryOptions::default(), counting_fetcher(calls.clone()))
            .await;

        assert_eq!(cache.notify_window_focus(), vec!["eager".to_string()]);
        assert!(!cache.snapshot("quiet").is_stale);
        assert!(cache.snapshot("eager").is_stale);

        assert_eq!(cache.notify_reconnect(), vec!["eager".to_string()]);
        assert!(!cache.snapshot("quiet").is_stale);
    }
}
