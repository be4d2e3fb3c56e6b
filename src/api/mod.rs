//! GW2 commerce API access.
//!
//! Defines the `PageTransport` trait — one bulk page request against a
//! `/v2` endpoint — and provides:
//! - `client`: the real `reqwest`-backed transport
//! - `fetch`: the bulk fetch coordinator (paging, concurrency, retry)

pub mod client;
pub mod fetch;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::ItemId;

/// Bulk price endpoint: best buy/sell price and totals per item.
pub const PRICES_ENDPOINT: &str = "commerce/prices";

/// Bulk order book endpoint: per-level listings per item.
pub const LISTINGS_ENDPOINT: &str = "commerce/listings";

/// Static item metadata endpoint (name, vendor value, flags).
pub const ITEMS_ENDPOINT: &str = "items";

/// Wire-level reply to one page request, before any JSON parsing.
///
/// Carrying the raw status and body (rather than a parsed result) keeps
/// the retry decision — which depends on the status code — inside the
/// fetch coordinator, and keeps transports trivial to mock.
#[derive(Debug, Clone)]
pub struct PageReply {
    pub status: u16,
    pub body: String,
    /// Server warning annotation, present on 206 partial-success replies.
    pub warning: Option<String>,
}

/// One bulk page request against a `/v2` endpoint.
///
/// Implementors must be cheap to call concurrently: the coordinator
/// dispatches one in-flight request per page. An empty `ids` slice means
/// "no ids parameter" — used for the tradeable-id discovery request.
///
/// Errors from this trait are transport-level (connect/timeout); HTTP
/// status handling is the coordinator's job and must be reported through
/// `PageReply.status`, not as an `Err`.
#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn get_page(&self, endpoint: &str, ids: &[ItemId]) -> Result<PageReply>;
}
