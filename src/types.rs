//! Shared types for the TPFLIP scanner.
//!
//! These types form the data model used across all modules: the wire
//! shapes returned by the GW2 commerce API, the per-item tracking state
//! they feed, and the `Flip` proposals the strategy layer produces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// GW2 item id, as used by every `/v2` endpoint.
pub type ItemId = u32;

/// Order books are cut to this many levels per side before they reach the
/// engine. Levels beyond this rank are mostly relist churn and would show
/// up as false fills in the book diff.
pub const BOOK_DEPTH: usize = 10;

/// Anything fetched in bulk by id. Lets the fetch coordinator zip a page
/// of parsed records back onto the ids that were requested.
pub trait ItemKeyed {
    fn item_id(&self) -> ItemId;
}

// ---------------------------------------------------------------------------
// Price snapshots (commerce/prices)
// ---------------------------------------------------------------------------

/// One side of a price snapshot: the best price and the total quantity
/// resting on that side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub quantity: u32,
    pub unit_price: u32,
}

/// Point-in-time market price for one item, as returned by
/// `commerce/prices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub id: ItemId,
    /// Free-to-play restriction flag. Parsed, not used.
    #[serde(default)]
    pub whitelisted: bool,
    /// Buy orders: `unit_price` is the highest standing buy offer,
    /// `quantity` the total demand across all buy orders.
    pub buys: PriceQuote,
    /// Sell listings: `unit_price` is the cheapest listing,
    /// `quantity` the total supply across all listings.
    pub sells: PriceQuote,
}

impl PriceSnapshot {
    /// Highest standing buy offer, in copper.
    pub fn buy_price(&self) -> u32 {
        self.buys.unit_price
    }

    /// Cheapest sell listing, in copper.
    pub fn sell_price(&self) -> u32 {
        self.sells.unit_price
    }

    /// Total units wanted across all buy orders.
    pub fn demand(&self) -> u32 {
        self.buys.quantity
    }

    /// Total units offered across all sell listings.
    pub fn supply(&self) -> u32 {
        self.sells.quantity
    }
}

impl ItemKeyed for PriceSnapshot {
    fn item_id(&self) -> ItemId {
        self.id
    }
}

impl fmt::Display for PriceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{}: buy {}c x{} | sell {}c x{}",
            self.id,
            self.buys.unit_price,
            self.buys.quantity,
            self.sells.unit_price,
            self.sells.quantity,
        )
    }
}

// ---------------------------------------------------------------------------
// Order book snapshots (commerce/listings)
// ---------------------------------------------------------------------------

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Number of individual orders resting at this price.
    pub listings: u32,
    pub unit_price: u32,
    /// Total units across those orders.
    pub quantity: u32,
}

/// Truncated order book for one item, as returned by `commerce/listings`.
///
/// `buys` is sorted descending by `unit_price` (best offer first),
/// `sells` ascending (cheapest listing first). Both sides keep that
/// ordering for the item's whole tracking lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub id: ItemId,
    pub buys: Vec<BookLevel>,
    pub sells: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    /// Cut both sides to the top `depth` levels. Applied once, right
    /// after parsing, before the snapshot reaches the engine.
    pub fn truncated(mut self, depth: usize) -> Self {
        self.buys.truncate(depth);
        self.sells.truncate(depth);
        self
    }
}

impl ItemKeyed for OrderBookSnapshot {
    fn item_id(&self) -> ItemId {
        self.id
    }
}

/// Which side of the order book a diff walks over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    /// Buy orders, sorted descending by price.
    Buys,
    /// Sell listings, sorted ascending by price.
    Sells,
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookSide::Buys => write!(f, "buys"),
            BookSide::Sells => write!(f, "sells"),
        }
    }
}

// ---------------------------------------------------------------------------
// Item metadata (items)
// ---------------------------------------------------------------------------

/// Static item metadata from the `items` endpoint. Fetched once when an
/// item enters tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMeta {
    pub id: ItemId,
    pub name: String,
    /// Copper value when sold to an NPC vendor. The scorer's floor price.
    #[serde(default)]
    pub vendor_value: u32,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl ItemMeta {
    /// Bound items never reach the trading post.
    pub fn is_tradeable(&self) -> bool {
        !self
            .flags
            .iter()
            .any(|f| f == "AccountBound" || f == "SoulbindOnAcquire")
    }
}

impl ItemKeyed for ItemMeta {
    fn item_id(&self) -> ItemId {
        self.id
    }
}

// ---------------------------------------------------------------------------
// Flips
// ---------------------------------------------------------------------------

/// A proposed buy-then-resell action with estimated prices, quantity,
/// duration and profit. Produced fresh per scoring call, never mutated.
///
/// Times are in refresh-cycle units, prices in copper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flip {
    pub item_id: ItemId,
    /// Trust window: how far the horizon's trend was extrapolated,
    /// in refresh cycles.
    pub target_duration: f64,
    pub quantity: i64,
    pub buy_price: i64,
    pub expected_sell_price: i64,
    pub expected_profit: i64,
    pub expected_profit_per_hour: f64,
    pub buy_time: f64,
    pub sell_time: f64,
}

impl fmt::Display for Flip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{}: {} @ {}c -> {}c | profit {}c ({:.0}c/h) | {:.1}+{:.1} cycles",
            self.item_id,
            self.quantity,
            self.buy_price,
            self.expected_sell_price,
            self.expected_profit,
            self.expected_profit_per_hour,
            self.buy_time,
            self.sell_time,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for TPFLIP.
#[derive(Debug, thiserror::Error)]
pub enum TpflipError {
    /// A snapshot was applied to the wrong item. This is a caller bug,
    /// not a data problem, and must never silently update state.
    #[error("snapshot id {snapshot} does not match tracked item {item}")]
    ItemMismatch { item: ItemId, snapshot: ItemId },

    #[error("api error: {0}")]
    Api(String),

    #[error("storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
