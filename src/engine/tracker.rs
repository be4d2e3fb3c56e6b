//! Per-item tracking state.
//!
//! Each tracked item owns one shared state record — always reflecting
//! the most recent observation — plus one exponentially-weighted trend
//! tracker per configured horizon. The trackers are created together
//! with the item and live for its whole tracking lifetime; only the
//! trend engine mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::diff;
use crate::types::{ItemId, ItemMeta, OrderBookSnapshot, PriceSnapshot, TpflipError};

// ---------------------------------------------------------------------------
// Horizon trackers
// ---------------------------------------------------------------------------

/// Exponentially-weighted trend statistics over one trailing horizon.
///
/// All values are rates per nominal refresh cycle, not raw sums. The
/// blend weight saturates at 1 once the gap between updates exceeds the
/// horizon, so a tracker never carries indefinitely stale momentum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonTracker {
    pub horizon_secs: u64,
    /// Trend of the best buy offer, copper per refresh cycle.
    pub buy_price_delta: f64,
    /// Trend of the cheapest sell listing, copper per refresh cycle.
    pub sell_price_delta: f64,
    /// Inferred depletion of buy orders, units per refresh cycle.
    pub fill_rate_buys: f64,
    /// Inferred depletion of sell listings, units per refresh cycle.
    pub fill_rate_sells: f64,
    /// Trend of total demand, units per refresh cycle.
    pub demand_delta: f64,
    /// Trend of total supply, units per refresh cycle.
    pub supply_delta: f64,
}

impl HorizonTracker {
    pub fn new(horizon_secs: u64) -> Self {
        Self {
            horizon_secs,
            buy_price_delta: 0.0,
            sell_price_delta: 0.0,
            fill_rate_buys: 0.0,
            fill_rate_sells: 0.0,
            demand_delta: 0.0,
            supply_delta: 0.0,
        }
    }

    /// Blend weight for an update after `elapsed_secs`: the fraction of
    /// the horizon that has passed, saturating at 1.
    pub fn weight_for(&self, elapsed_secs: f64) -> f64 {
        (elapsed_secs / self.horizon_secs as f64).min(1.0)
    }

    /// Fold one observation into a tracked rate.
    fn blend(value: f64, weight: f64, observation: f64) -> f64 {
        (1.0 - weight) * value + weight * observation
    }

    /// Fold observed raw price/quantity deltas into the price-path
    /// rates. `normalize` rescales the raw deltas to per-refresh-cycle
    /// units.
    pub(crate) fn apply_price_deltas(
        &mut self,
        weight: f64,
        normalize: f64,
        d_buy_price: f64,
        d_sell_price: f64,
        d_demand: f64,
        d_supply: f64,
    ) {
        debug_assert!((0.0..=1.0).contains(&weight));
        self.buy_price_delta = Self::blend(self.buy_price_delta, weight, normalize * d_buy_price);
        self.sell_price_delta =
            Self::blend(self.sell_price_delta, weight, normalize * d_sell_price);
        self.demand_delta = Self::blend(self.demand_delta, weight, normalize * d_demand);
        self.supply_delta = Self::blend(self.supply_delta, weight, normalize * d_supply);
    }

    /// Fold inferred filled quantities into the fill rates. Unlike the
    /// price path these are driven by the book diff output, not by a
    /// raw-value difference.
    pub(crate) fn apply_fill_rates(
        &mut self,
        weight: f64,
        normalize: f64,
        filled_buys: f64,
        filled_sells: f64,
    ) {
        debug_assert!((0.0..=1.0).contains(&weight));
        self.fill_rate_buys = Self::blend(self.fill_rate_buys, weight, normalize * filled_buys);
        self.fill_rate_sells = Self::blend(self.fill_rate_sells, weight, normalize * filled_sells);
    }
}

// ---------------------------------------------------------------------------
// Shared item state
// ---------------------------------------------------------------------------

/// Current market state of one item, shared across all its horizon
/// trackers. Rewritten exactly once per engine update from the newest
/// observation, independent of horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemState {
    pub item_id: ItemId,
    pub name: String,
    /// NPC vendor value in copper; the scorer's price floor.
    pub vendor_value: u32,
    /// Highest standing buy offer, copper.
    pub buy_price: u32,
    /// Cheapest sell listing, copper.
    pub sell_price: u32,
    /// Total units offered across all sell listings.
    pub supply: u32,
    /// Total units wanted across all buy orders.
    pub demand: u32,
    /// Average units per sell listing over the truncated book.
    pub avg_offer_size: f64,
    /// Average units per buy order over the truncated book.
    pub avg_bid_size: f64,
    pub last_price_snapshot: PriceSnapshot,
    pub last_orderbook_snapshot: OrderBookSnapshot,
    pub prices_timestamp: DateTime<Utc>,
    pub listings_timestamp: DateTime<Utc>,
}

/// One tracked item: shared state plus its horizon trackers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedItem {
    pub state: ItemState,
    pub trackers: Vec<HorizonTracker>,
}

impl TrackedItem {
    /// Start tracking an item from its first price and order book
    /// snapshots. Trackers start flat; trends accumulate from the
    /// following updates.
    pub fn new(
        meta: &ItemMeta,
        prices: PriceSnapshot,
        book: OrderBookSnapshot,
        horizons_secs: &[u64],
        now: DateTime<Utc>,
    ) -> Result<Self, TpflipError> {
        if prices.id != meta.id {
            return Err(TpflipError::ItemMismatch {
                item: meta.id,
                snapshot: prices.id,
            });
        }
        if book.id != meta.id {
            return Err(TpflipError::ItemMismatch {
                item: meta.id,
                snapshot: book.id,
            });
        }

        let state = ItemState {
            item_id: meta.id,
            name: meta.name.clone(),
            vendor_value: meta.vendor_value,
            buy_price: prices.buy_price(),
            sell_price: prices.sell_price(),
            supply: prices.supply(),
            demand: prices.demand(),
            avg_offer_size: diff::average_order_size(&book.sells),
            avg_bid_size: diff::average_order_size(&book.buys),
            last_price_snapshot: prices,
            last_orderbook_snapshot: book,
            prices_timestamp: now,
            listings_timestamp: now,
        };

        Ok(Self {
            state,
            trackers: horizons_secs
                .iter()
                .map(|h| HorizonTracker::new(*h))
                .collect(),
        })
    }

    /// The tracker for a given horizon, if configured.
    pub fn tracker_for(&self, horizon_secs: u64) -> Option<&HorizonTracker> {
        self.trackers.iter().find(|t| t.horizon_secs == horizon_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
