//! Bulk fetch coordinator.
//!
//! Turns an id list into ordered snapshot data under partial failure:
//! splits the ids into pages of at most 200, dispatches one concurrent
//! request per page, retries transient failures with per-status
//! cooldowns, and reassembles the results in the original id order.
//!
//! A page that exhausts its retry budget degrades to one `None` per id
//! (never an error), so a single bad page can never abort a refresh
//! cycle or desynchronise the output from the input id list.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Result};
use futures::future;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{PageTransport, ITEMS_ENDPOINT, LISTINGS_ENDPOINT, PRICES_ENDPOINT};
use crate::types::{ItemId, ItemKeyed, ItemMeta, OrderBookSnapshot, PriceSnapshot, BOOK_DEPTH};

/// Upstream API cap on ids per bulk request.
pub const MAX_PAGE_SIZE: usize = 200;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded retry with per-status cooldowns. The retry count is the only
/// timeout mechanism: a page either resolves or exhausts this budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Cooldown after a 429 (rate limited).
    pub rate_limit_cooldown: Duration,
    /// Cooldown after a 5xx or any other unexpected reply.
    pub transient_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            rate_limit_cooldown: Duration::from_secs(30),
            transient_cooldown: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Fetch outcome
// ---------------------------------------------------------------------------

/// Result of one bulk fetch: one slot per input id, in input order.
///
/// `None` marks an id that could not be resolved — rejected by the
/// server, absent from the reply, or lost to an exhausted retry budget.
/// Downstream update paths treat `None` as a no-op.
#[derive(Debug)]
pub struct FetchOutcome<S> {
    pub results: Vec<Option<S>>,
    /// Ids the server explicitly rejected in a 206 partial-success
    /// reply. Non-fatal; surfaced so callers can drop them from the
    /// tracked set.
    pub rejected: Vec<ItemId>,
}

impl<S> FetchOutcome<S> {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Number of ids that actually resolved.
    pub fn resolved(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Concurrent, paginated, retrying bulk fetcher over a `PageTransport`.
pub struct BulkFetcher<T> {
    transport: T,
    policy: RetryPolicy,
    page_size: usize,
}

impl<T: PageTransport> BulkFetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy, page_size: usize) -> Self {
        Self {
            transport,
            policy,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Fetch current prices for the given ids, in order.
    pub async fn fetch_prices(&self, ids: &[ItemId]) -> FetchOutcome<PriceSnapshot> {
        self.fetch_by_ids(PRICES_ENDPOINT, ids).await
    }

    /// Fetch order books for the given ids, in order, truncated to the
    /// top `BOOK_DEPTH` levels per side.
    pub async fn fetch_listings(&self, ids: &[ItemId]) -> FetchOutcome<OrderBookSnapshot> {
        let mut outcome = self
            .fetch_by_ids::<OrderBookSnapshot>(LISTINGS_ENDPOINT, ids)
            .await;
        for slot in &mut outcome.results {
            if let Some(book) = slot.take() {
                *slot = Some(book.truncated(BOOK_DEPTH));
            }
        }
        outcome
    }

    /// Fetch static item metadata for the given ids, in order.
    pub async fn fetch_item_metas(&self, ids: &[ItemId]) -> FetchOutcome<ItemMeta> {
        self.fetch_by_ids(ITEMS_ENDPOINT, ids).await
    }

    /// The full tradeable id list: `commerce/prices` with no ids returns
    /// every id the trading post knows about. Startup-only, so an
    /// exhausted retry budget here is an error rather than a degrade.
    pub async fn discover_tradeable_ids(&self) -> Result<Vec<ItemId>> {
        for attempt in 1..=self.policy.max_attempts {
            let cooldown = match self.transport.get_page(PRICES_ENDPOINT, &[]).await {
                Ok(reply) if reply.status == 200 => {
                    match serde_json::from_str::<Vec<ItemId>>(&reply.body) {
                        Ok(ids) => {
                            debug!(count = ids.len(), "Tradeable ids discovered");
                            return Ok(ids);
                        }
                        Err(e) => {
                            warn!(attempt, error = %e, "Unparseable id list; retrying");
                            self.policy.transient_cooldown
                        }
                    }
                }
                Ok(reply) if reply.status == 429 => {
                    warn!(attempt, "Rate limited during id discovery; backing off");
                    self.policy.rate_limit_cooldown
                }
                Ok(reply) => {
                    warn!(attempt, status = reply.status, "Id discovery failed; retrying");
                    self.policy.transient_cooldown
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Id discovery transport error; retrying");
                    self.policy.transient_cooldown
                }
            };
            if attempt < self.policy.max_attempts {
                sleep(cooldown).await;
            }
        }
        bail!("tradeable id discovery exhausted its retry budget")
    }

    /// Fetch any bulk endpoint for the given ids.
    ///
    /// The output always has exactly one slot per input id, in input
    /// order, regardless of page completion order: pages are dispatched
    /// concurrently but collected strictly in page order.
    pub async fn fetch_by_ids<S>(&self, endpoint: &str, ids: &[ItemId]) -> FetchOutcome<S>
    where
        S: DeserializeOwned + ItemKeyed,
    {
        if ids.is_empty() {
            return FetchOutcome::empty();
        }

        let pages: Vec<&[ItemId]> = ids.chunks(self.page_size).collect();
        debug!(
            endpoint,
            ids = ids.len(),
            pages = pages.len(),
            "Dispatching bulk fetch"
        );

        let tasks = pages
            .iter()
            .enumerate()
            .map(|(index, page)| self.fetch_page::<S>(endpoint, index, page));
        let page_outcomes = future::join_all(tasks).await;

        let mut results = Vec::with_capacity(ids.len());
        let mut rejected = Vec::new();
        for (page_results, page_rejected) in page_outcomes {
            results.extend(page_results);
            rejected.extend(page_rejected);
        }
        debug_assert_eq!(results.len(), ids.len());

        FetchOutcome { results, rejected }
    }

    /// One page with its retry loop. Always returns exactly
    /// `ids.len()` slots; exhaustion yields all-`None`.
    async fn fetch_page<S>(
        &self,
        endpoint: &str,
        page_index: usize,
        ids: &[ItemId],
    ) -> (Vec<Option<S>>, Vec<ItemId>)
    where
        S: DeserializeOwned + ItemKeyed,
    {
        for attempt in 1..=self.policy.max_attempts {
            let cooldown = match self.transport.get_page(endpoint, ids).await {
                Ok(reply) => match reply.status {
                    status @ (200 | 206) => {
                        match serde_json::from_str::<Vec<S>>(&reply.body) {
                            Ok(records) => {
                                let rejected = if status == 206 {
                                    let rejected =
                                        rejected_ids(reply.warning.as_deref(), ids);
                                    warn!(
                                        endpoint,
                                        page = page_index,
                                        rejected = ?rejected,
                                        "Partial success; server rejected some ids"
                                    );
                                    rejected
                                } else {
                                    Vec::new()
                                };
                                return (zip_by_id(ids, records), rejected);
                            }
                            Err(e) => {
                                warn!(
                                    endpoint,
                                    page = page_index,
                                    attempt,
                                    error = %e,
                                    "Unparseable reply body; retrying"
                                );
                                self.policy.transient_cooldown
                            }
                        }
                    }
                    429 => {
                        warn!(
                            endpoint,
                            page = page_index,
                            attempt,
                            "Rate limited; backing off"
                        );
                        self.policy.rate_limit_cooldown
                    }
                    status => {
                        warn!(
                            endpoint,
                            page = page_index,
                            attempt,
                            status,
                            "Unexpected status; retrying"
                        );
                        self.policy.transient_cooldown
                    }
                },
                Err(e) => {
                    warn!(
                        endpoint,
                        page = page_index,
                        attempt,
                        error = %e,
                        "Transport error; retrying"
                    );
                    self.policy.transient_cooldown
                }
            };

            if attempt < self.policy.max_attempts {
                sleep(cooldown).await;
            }
        }

        warn!(
            endpoint,
            page = page_index,
            ids = ids.len(),
            "Retry budget exhausted; marking whole page unresolved"
        );
        (ids.iter().map(|_| None).collect(), Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Reassembly helpers
// ---------------------------------------------------------------------------

/// Map parsed records back onto the requested ids, one slot per id.
///
/// Zipping by id rather than by position keeps the output aligned even
/// when the server silently drops unknown ids from the reply.
fn zip_by_id<S: ItemKeyed>(ids: &[ItemId], records: Vec<S>) -> Vec<Option<S>> {
    let mut by_id: HashMap<ItemId, S> =
        records.into_iter().map(|r| (r.item_id(), r)).collect();
    ids.iter().map(|id| by_id.remove(id)).collect()
}

/// Recover rejected ids from a 206 warning annotation.
///
/// The annotation is free text (e.g. `299 - "ids 123, 456 not found"`),
/// so this pulls out every decimal run and keeps the ones that were
/// actually part of the requested page.
fn rejected_ids(warning: Option<&str>, page_ids: &[ItemId]) -> Vec<ItemId> {
    let Some(text) = warning else {
        return Vec::new();
    };
    let page: HashSet<ItemId> = page_ids.iter().copied().collect();

    let mut out = Vec::new();
    let mut digits = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !digits.is_empty() {
            if let Ok(id) = digits.parse::<ItemId>() {
                if page.contains(&id) && !out.contains(&id) {
                    out.push(id);
                }
            }
            digits.clear();
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PageReply;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// One scripted transport step for a page (keyed by its first id).
    enum Step {
        /// Reply after an optional simulated network delay.
        Reply { delay_ms: u64, reply: PageReply },
        /// Transport-level failure (connect error, timeout).
        Fail,
    }

    /// Deterministic in-memory transport. Each page (identified by its
    /// first id) pops scripted steps in order; running out of script is
    /// a test bug and panics.
    struct ScriptedTransport {
        scripts: Mutex<HashMap<ItemId, VecDeque<Step>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn script(self, first_id: ItemId, steps: Vec<Step>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(first_id, steps.into());
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageTransport for ScriptedTransport {
        async fn get_page(&self, _endpoint: &str, ids: &[ItemId]) -> Result<PageReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = ids.first().copied().unwrap_or(0);
            let step = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| panic!("no scripted step left for page starting at {key}"));

            match step {
                Step::Reply { delay_ms, reply } => {
                    if delay_ms > 0 {
                        sleep(Duration::from_millis(delay_ms)).await;
                    }
                    Ok(reply)
                }
                Step::Fail => bail!("simulated connect error"),
            }
        }
    }

    fn ok(body: String) -> Step {
        Step::Reply {
            delay_ms: 0,
            reply: PageReply {
                status: 200,
                body,
                warning: None,
            },
        }
    }

    fn status(code: u16) -> Step {
        Step::Reply {
            delay_ms: 0,
            reply: PageReply {
                status: code,
                body: String::new(),
                warning: None,
            },
        }
    }

    /// Minimal prices body for the given ids, buy price = 10*id.
    fn prices_body(ids: &[ItemId]) -> String {
        let records: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "whitelisted": false,
                    "buys": { "quantity": 100, "unit_price": 10 * id },
                    "sells": { "quantity": 50, "unit_price": 12 * id },
                })
            })
            .collect();
        serde_json::to_string(&records).unwrap()
    }

    /// Fast policy for tests that don't measure timing.
    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 10,
            rate_limit_cooldown: Duration::from_millis(10),
            transient_cooldown: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_empty_input_returns_empty_output() {
        let fetcher = BulkFetcher::new(ScriptedTransport::new(), RetryPolicy::default(), 200);
        let outcome = fetcher.fetch_prices(&[]).await;
        assert!(outcome.results.is_empty());
        assert!(outcome.rejected.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_preserved_when_first_page_finishes_last() {
        // Pages of 2: [1,2] [3,4] [5]. The first page resolves long
        // after the others; output order must still follow input order.
        let transport = ScriptedTransport::new()
            .script(
                1,
                vec![Step::Reply {
                    delay_ms: 60_000,
                    reply: PageReply {
                        status: 200,
                        body: prices_body(&[1, 2]),
                        warning: None,
                    },
                }],
            )
            .script(3, vec![ok(prices_body(&[3, 4]))])
            .script(5, vec![ok(prices_body(&[5]))]);

        let fetcher = BulkFetcher::new(transport, quick_policy(), 2);
        let outcome = fetcher.fetch_prices(&[1, 2, 3, 4, 5]).await;

        assert_eq!(outcome.results.len(), 5);
        for (i, expected_id) in [1, 2, 3, 4, 5].iter().enumerate() {
            assert_eq!(outcome.results[i].as_ref().unwrap().id, *expected_id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backoff_then_success() {
        // Three 429s, then a 200. Each retry must wait the full
        // rate-limit cooldown; the payload must come through, not a
        // placeholder.
        let transport = ScriptedTransport::new().script(
            7,
            vec![status(429), status(429), status(429), ok(prices_body(&[7]))],
        );

        let fetcher = BulkFetcher::new(transport, RetryPolicy::default(), 200);
        let started = Instant::now();
        let outcome = fetcher.fetch_prices(&[7]).await;
        let elapsed = started.elapsed();

        assert_eq!(outcome.results[0].as_ref().unwrap().id, 7);
        // 3 cooldowns of 30s each under the paused clock.
        assert!(elapsed >= Duration::from_secs(90), "elapsed = {elapsed:?}");
        assert!(elapsed < Duration::from_secs(91), "elapsed = {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_uses_short_cooldown() {
        let transport = ScriptedTransport::new()
            .script(7, vec![status(500), status(502), status(504), ok(prices_body(&[7]))]);

        let fetcher = BulkFetcher::new(transport, RetryPolicy::default(), 200);
        let started = Instant::now();
        let outcome = fetcher.fetch_prices(&[7]).await;
        let elapsed = started.elapsed();

        assert_eq!(outcome.resolved(), 1);
        assert!(elapsed >= Duration::from_secs(15), "elapsed = {elapsed:?}");
        assert!(elapsed < Duration::from_secs(16), "elapsed = {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_page_degrades_to_placeholders() {
        // One page fails all 10 attempts; the other page succeeds.
        let dead: Vec<Step> = (0..10).map(|_| status(500)).collect();
        let transport = ScriptedTransport::new()
            .script(1, dead)
            .script(3, vec![ok(prices_body(&[3, 4]))]);

        let fetcher = BulkFetcher::new(transport, quick_policy(), 2);
        let outcome = fetcher.fetch_prices(&[1, 2, 3, 4]).await;

        // Exactly page-length placeholders, output length unchanged.
        assert_eq!(outcome.results.len(), 4);
        assert!(outcome.results[0].is_none());
        assert!(outcome.results[1].is_none());
        assert_eq!(outcome.results[2].as_ref().unwrap().id, 3);
        assert_eq!(outcome.results[3].as_ref().unwrap().id, 4);
        // All 10 attempts spent on the dead page, 1 on the good one.
        assert_eq!(fetcher.transport.call_count(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_retried() {
        let transport = ScriptedTransport::new()
            .script(7, vec![Step::Fail, Step::Fail, ok(prices_body(&[7]))]);

        let fetcher = BulkFetcher::new(transport, quick_policy(), 200);
        let outcome = fetcher.fetch_prices(&[7]).await;
        assert_eq!(outcome.resolved(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_is_retried_as_transient() {
        let transport = ScriptedTransport::new()
            .script(7, vec![status(403), ok(prices_body(&[7]))]);

        let fetcher = BulkFetcher::new(transport, RetryPolicy::default(), 200);
        let started = Instant::now();
        let outcome = fetcher.fetch_prices(&[7]).await;

        assert_eq!(outcome.resolved(), 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_partial_success_surfaces_rejected_ids() {
        let transport = ScriptedTransport::new().script(
            1,
            vec![Step::Reply {
                delay_ms: 0,
                reply: PageReply {
                    status: 206,
                    body: prices_body(&[1, 2]),
                    warning: Some(r#"299 - "ids 3, 4 not found""#.to_string()),
                },
            }],
        );

        let fetcher = BulkFetcher::new(transport, quick_policy(), 200);
        let outcome = fetcher.fetch_prices(&[1, 2, 3, 4]).await;

        assert_eq!(outcome.rejected, vec![3, 4]);
        assert!(outcome.results[0].is_some());
        assert!(outcome.results[1].is_some());
        assert!(outcome.results[2].is_none());
        assert!(outcome.results[3].is_none());
    }

    #[tokio::test]
    async fn test_zip_tolerates_missing_and_reordered_records() {
        // Server replies out of order and silently drops id 2.
        let body = prices_body(&[3, 1]);
        let transport = ScriptedTransport::new().script(1, vec![ok(body)]);

        let fetcher = BulkFetcher::new(transport, quick_policy(), 200);
        let outcome = fetcher.fetch_prices(&[1, 2, 3]).await;

        assert_eq!(outcome.results[0].as_ref().unwrap().id, 1);
        assert!(outcome.results[1].is_none());
        assert_eq!(outcome.results[2].as_ref().unwrap().id, 3);
    }

    #[tokio::test]
    async fn test_listings_are_truncated_to_book_depth() {
        let levels: Vec<_> = (0..15)
            .map(|i| json!({ "listings": 1, "unit_price": 200 - i, "quantity": 10 }))
            .collect();
        let body = serde_json::to_string(&[json!({
            "id": 19700,
            "buys": levels,
            "sells": [],
        })])
        .unwrap();
        let transport = ScriptedTransport::new().script(19700, vec![ok(body)]);

        let fetcher = BulkFetcher::new(transport, quick_policy(), 200);
        let outcome = fetcher.fetch_listings(&[19700]).await;

        let book = outcome.results[0].as_ref().unwrap();
        assert_eq!(book.buys.len(), BOOK_DEPTH);
        assert_eq!(book.buys[0].unit_price, 200);
    }

    #[tokio::test]
    async fn test_discovery_parses_id_list() {
        let transport =
            ScriptedTransport::new().script(0, vec![ok("[24, 68, 19700]".to_string())]);

        let fetcher = BulkFetcher::new(transport, quick_policy(), 200);
        let ids = fetcher.discover_tradeable_ids().await.unwrap();
        assert_eq!(ids, vec![24, 68, 19700]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_exhaustion_is_an_error() {
        let dead: Vec<Step> = (0..10).map(|_| status(500)).collect();
        let transport = ScriptedTransport::new().script(0, dead);

        let fetcher = BulkFetcher::new(transport, quick_policy(), 200);
        assert!(fetcher.discover_tradeable_ids().await.is_err());
    }

    #[tokio::test]
    async fn test_page_split_respects_page_size() {
        let transport = ScriptedTransport::new()
            .script(1, vec![ok(prices_body(&[1, 2]))])
            .script(3, vec![ok(prices_body(&[3, 4]))])
            .script(5, vec![ok(prices_body(&[5]))]);

        let fetcher = BulkFetcher::new(transport, quick_policy(), 2);
        let outcome = fetcher.fetch_prices(&[1, 2, 3, 4, 5]).await;

        assert_eq!(outcome.results.len(), 5);
        assert_eq!(outcome.resolved(), 5);
        assert_eq!(fetcher.transport.call_count(), 3);
    }

    #[test]
    fn test_rejected_ids_parser() {
        let page = [10, 20, 30];
        assert_eq!(
            rejected_ids(Some(r#"299 - "ids 20,30 not found""#), &page),
            vec![20, 30]
        );
        // Numbers outside the page (like the warn-code 299) are ignored.
        assert_eq!(
            rejected_ids(Some(r#"299 - "id 999 not found""#), &page),
            Vec::<ItemId>::new()
        );
        assert_eq!(rejected_ids(None, &page), Vec::<ItemId>::new());
    }
}
