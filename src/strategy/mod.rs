//! Flip scoring.
//!
//! Maps an item's current state plus one horizon's trend statistics to
//! a `Flip`: a proposed buy-then-resell with estimated quantity,
//! prices, duration and profit. Pure arithmetic — no I/O, no mutation —
//! and total over valid numeric input.

use std::cmp::Ordering;

use tracing::debug;

use crate::engine::tracker::{HorizonTracker, ItemState, TrackedItem};
use crate::types::Flip;

// ---------------------------------------------------------------------------
// Marketplace constants
// ---------------------------------------------------------------------------

/// Fraction of the sale price the seller keeps after the 15% trading
/// post tax (10% exchange tax + 5% listing fee).
const SALE_KEEP: f64 = 0.85;

/// The listing fee share, paid up front when a sell listing is placed.
/// Reserved out of the budget per unit bought.
const LISTING_FEE: f64 = 0.05;

/// Hard per-item exposure ceiling: 8 listing slots x 250 units.
const MAX_EXPOSURE_UNITS: i64 = 2000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scoring policy parameters.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// Price distance (in copper per refresh cycle) at which a rising
    /// buy price or falling sell price is considered to have raced past
    /// our orders.
    pub outbid_fraction: f64,
    /// Capital available per flip, in copper.
    pub budget: i64,
    /// Nominal seconds between refresh cycles; flip times are expressed
    /// in these units.
    pub refresh_interval_secs: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            outbid_fraction: 0.5,
            budget: 2_000_000,
            refresh_interval_secs: 120.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Pure flip scorer over tracked item state.
pub struct FlipScorer {
    config: StrategyConfig,
}

impl FlipScorer {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Access the scoring configuration.
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Score one item against one horizon's trend statistics.
    pub fn score(&self, state: &ItemState, tracker: &HorizonTracker) -> Flip {
        let cfg = &self.config;

        // Below this price the vendor pays better than any resale.
        let min_viable_price = (f64::from(state.vendor_value) / SALE_KEEP).ceil() as i64;

        // Trust window: how many refresh cycles the horizon's trend is
        // extrapolated before it stops being believable.
        let target_duration =
            tracker.horizon_secs as f64 / (3.0 * cfg.refresh_interval_secs);

        // How long until a rising buy price races past our order, and
        // until a falling sell price undercuts our listing.
        let time_to_outbid = if tracker.buy_price_delta <= 0.0 {
            target_duration
        } else {
            cfg.outbid_fraction / tracker.buy_price_delta
        };
        let time_to_undercut = if tracker.sell_price_delta >= 0.0 {
            target_duration
        } else {
            cfg.outbid_fraction / -tracker.sell_price_delta
        };

        // Split the window between the buy and sell leg in proportion
        // to the observed fill traffic on each side.
        let fill_share_buy_time = if tracker.fill_rate_sells == 0.0 {
            0.0
        } else {
            target_duration * tracker.fill_rate_sells
                / (tracker.fill_rate_buys + tracker.fill_rate_sells)
        };
        let buy_time = time_to_outbid.min(fill_share_buy_time);
        let sell_time = time_to_undercut.min(target_duration - buy_time);

        let expected_sell_price = min_viable_price.max(
            i64::from(state.sell_price) + (tracker.sell_price_delta * buy_time).round() as i64 - 1,
        );
        // Outbid the current top buy by one copper.
        let buy_price = min_viable_price.max(i64::from(state.buy_price) + 1);

        // The budget term reserves the listing fee per unit up front.
        let affordable = (cfg.budget as f64
            / (buy_price as f64 + LISTING_FEE * expected_sell_price as f64))
            .floor() as i64;
        let quantity = [
            (tracker.fill_rate_buys * buy_time).floor() as i64,
            (tracker.fill_rate_sells * sell_time).floor() as i64,
            MAX_EXPOSURE_UNITS,
            affordable,
        ]
        .into_iter()
        .min()
        .unwrap_or(0)
        .max(0);

        let profit_per_unit =
            (expected_sell_price as f64 * SALE_KEEP - buy_price as f64).floor() as i64;
        let expected_profit = quantity * profit_per_unit;

        let total_time = buy_time + sell_time;
        let expected_profit_per_hour = if total_time == 0.0 {
            0.0
        } else {
            expected_profit as f64 * 3600.0 / (total_time * cfg.refresh_interval_secs)
        };

        debug!(
            item = state.item_id,
            horizon = tracker.horizon_secs,
            quantity,
            expected_profit,
            "Flip scored"
        );

        Flip {
            item_id: state.item_id,
            target_duration,
            quantity,
            buy_price,
            expected_sell_price,
            expected_profit,
            expected_profit_per_hour,
            buy_time,
            sell_time,
        }
    }

    /// Score every (item, horizon) pair and return the flips ranked
    /// best first.
    pub fn score_all<'a, I>(&self, items: I) -> Vec<Flip>
    where
        I: IntoIterator<Item = &'a TrackedItem>,
    {
        let mut flips: Vec<Flip> = items
            .into_iter()
            .flat_map(|item| {
                item.trackers
                    .iter()
                    .map(|tracker| self.score(&item.state, tracker))
            })
            .collect();
        rank_flips(&mut flips);
        flips
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Ranking order across flips: expected profit descending, expected
/// profit per hour as the tie break.
pub fn compare_flips(a: &Flip, b: &Flip) -> Ordering {
    b.expected_profit.cmp(&a.expected_profit).then_with(|| {
        b.expected_profit_per_hour
            .partial_cmp(&a.expected_profit_per_hour)
            .unwrap_or(Ordering::Equal)
    })
}

/// Sort flips best first.
pub fn rank_flips(flips: &mut [Flip]) {
    flips.sort_by(compare_flips);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
