//! Multi-horizon trend engine.
//!
//! Applies fetched snapshots to tracked items: the price path feeds the
//! price/demand/supply trends directly, the listings path runs the book
//! diff first and feeds the inferred fill rates. Single-threaded by
//! design — updates run strictly after a refresh's fetch phase, on the
//! thread driving the refresh cycle.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::engine::diff;
use crate::engine::tracker::TrackedItem;
use crate::types::{OrderBookSnapshot, PriceSnapshot, TpflipError};

/// Statistics engine, parameterised by the nominal refresh cadence.
pub struct TrendEngine {
    /// Configured seconds between refresh cycles. Observed deltas are
    /// rescaled to this cadence so tracker units stay constant even
    /// when the actual update timing drifts.
    refresh_interval_secs: f64,
}

impl TrendEngine {
    pub fn new(refresh_interval_secs: u64) -> Self {
        Self {
            refresh_interval_secs: refresh_interval_secs as f64,
        }
    }

    pub fn refresh_interval_secs(&self) -> f64 {
        self.refresh_interval_secs
    }

    /// Apply a price snapshot to an item's trackers and shared state.
    ///
    /// `None` (the id could not be fetched this cycle) is a no-op. A
    /// snapshot carrying a different item id is a precondition
    /// violation and updates nothing.
    pub fn apply_price_update(
        &self,
        item: &mut TrackedItem,
        snapshot: Option<&PriceSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<(), TpflipError> {
        let Some(snap) = snapshot else {
            debug!(item = item.state.item_id, "Price snapshot unresolved; skipping");
            return Ok(());
        };
        if snap.id != item.state.item_id {
            return Err(TpflipError::ItemMismatch {
                item: item.state.item_id,
                snapshot: snap.id,
            });
        }

        let Some((weight_elapsed, normalize)) =
            self.scaling(item.state.prices_timestamp, now)
        else {
            // Same-instant duplicate; applying it would divide by zero
            // and double-count the observation.
            return Ok(());
        };

        let state = &item.state;
        let d_buy_price = f64::from(snap.buy_price()) - f64::from(state.buy_price);
        let d_sell_price = f64::from(snap.sell_price()) - f64::from(state.sell_price);
        let d_demand = f64::from(snap.demand()) - f64::from(state.demand);
        let d_supply = f64::from(snap.supply()) - f64::from(state.supply);

        for tracker in &mut item.trackers {
            let weight = tracker.weight_for(weight_elapsed);
            tracker.apply_price_deltas(
                weight, normalize, d_buy_price, d_sell_price, d_demand, d_supply,
            );
        }

        // Shared state reflects only the newest observation.
        let state = &mut item.state;
        state.buy_price = snap.buy_price();
        state.sell_price = snap.sell_price();
        state.demand = snap.demand();
        state.supply = snap.supply();
        state.last_price_snapshot = snap.clone();
        state.prices_timestamp = now;

        Ok(())
    }

    /// Apply an order book snapshot: diff against the previous book,
    /// fold the inferred fills into every tracker, then advance the
    /// shared book state.
    pub fn apply_listings_update(
        &self,
        item: &mut TrackedItem,
        snapshot: Option<&OrderBookSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<(), TpflipError> {
        let Some(snap) = snapshot else {
            debug!(item = item.state.item_id, "Book snapshot unresolved; skipping");
            return Ok(());
        };
        if snap.id != item.state.item_id {
            return Err(TpflipError::ItemMismatch {
                item: item.state.item_id,
                snapshot: snap.id,
            });
        }

        let Some((weight_elapsed, normalize)) =
            self.scaling(item.state.listings_timestamp, now)
        else {
            return Ok(());
        };

        let book_diff = diff::diff_books(&item.state.last_orderbook_snapshot, snap);
        debug!(
            item = item.state.item_id,
            filled_buys = book_diff.filled_buys,
            filled_sells = book_diff.filled_sells,
            "Book diffed"
        );

        for tracker in &mut item.trackers {
            let weight = tracker.weight_for(weight_elapsed);
            tracker.apply_fill_rates(
                weight,
                normalize,
                book_diff.filled_buys as f64,
                book_diff.filled_sells as f64,
            );
        }

        let state = &mut item.state;
        state.avg_bid_size = book_diff.avg_bid_size;
        state.avg_offer_size = book_diff.avg_offer_size;
        state.last_orderbook_snapshot = snap.clone();
        state.listings_timestamp = now;

        Ok(())
    }

    /// Elapsed seconds since the last update and the matching
    /// normalisation factor, or `None` when no time has passed.
    fn scaling(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> Option<(f64, f64)> {
        let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return None;
        }
        Some((elapsed, self.refresh_interval_secs / elapsed))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
