//! Order book differencing.
//!
//! Infers filled volume from two consecutive truncated order book
//! snapshots of the same item. This is a heuristic, not ground truth:
//! without order-level tracking it cannot tell a genuine fill from a
//! cancellation or a relist, and it accepts that trade-off to stay on
//! top-10-level snapshots only.

use tracing::trace;

use crate::types::{BookLevel, BookSide, OrderBookSnapshot};

/// Inferred activity between two order book snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookDiff {
    /// Units inferred consumed from the buy-order side.
    pub filled_buys: u64,
    /// Units inferred consumed from the sell-listing side.
    pub filled_sells: u64,
    /// Average units per buy order across the *current* buy levels.
    pub avg_bid_size: f64,
    /// Average units per sell listing across the *current* sell levels.
    pub avg_offer_size: f64,
}

/// Diff both sides of an order book.
pub fn diff_books(previous: &OrderBookSnapshot, current: &OrderBookSnapshot) -> BookDiff {
    BookDiff {
        filled_buys: inferred_fills(&previous.buys, &current.buys, BookSide::Buys),
        filled_sells: inferred_fills(&previous.sells, &current.sells, BookSide::Sells),
        avg_bid_size: average_order_size(&current.buys),
        avg_offer_size: average_order_size(&current.sells),
    }
}

/// Infer the filled quantity on one side via a two-pointer merge over
/// the price-sorted levels.
///
/// Walking from best level to worst:
/// - matching prices contribute `max(0, prev.quantity - cur.quantity)`
///   (growth is never a fill);
/// - a previous price the current book has walked past is counted as
///   fully filled;
/// - a freshly inserted current level contributes nothing.
///
/// Previous levels left over once the current side is exhausted no
/// longer appear in the book at all and count as filled too.
pub fn inferred_fills(previous: &[BookLevel], current: &[BookLevel], side: BookSide) -> u64 {
    // For buys (descending) a previous level is gone once the current
    // walk reaches a lower price; for sells (ascending), a higher one.
    let prev_gone = |prev: u32, cur: u32| match side {
        BookSide::Buys => prev > cur,
        BookSide::Sells => prev < cur,
    };

    let mut filled: u64 = 0;
    let mut i = 0;
    let mut j = 0;

    while i < previous.len() {
        // Identical remainders cannot contribute fills; bail out early.
        // This is a pure shortcut — the walk below would produce the
        // same total.
        if previous[i..] == current[j..] {
            return filled;
        }

        let Some(cur) = current.get(j) else {
            // Current side exhausted: the rest of the previous levels
            // are no longer in the book.
            filled += u64::from(previous[i].quantity);
            i += 1;
            continue;
        };

        let prev = &previous[i];
        if prev.unit_price == cur.unit_price {
            filled += u64::from(prev.quantity.saturating_sub(cur.quantity));
            i += 1;
            j += 1;
        } else if prev_gone(prev.unit_price, cur.unit_price) {
            filled += u64::from(prev.quantity);
            i += 1;
        } else {
            // New level inserted ahead of the previous one.
            j += 1;
        }
    }

    trace!(side = %side, filled, "Book side diffed");
    filled
}

/// Average order size over a truncated level set:
/// total quantity divided by total resting orders. Defined as 0 for an
/// empty side or a zero listing count.
pub fn average_order_size(levels: &[BookLevel]) -> f64 {
    let quantity: u64 = levels.iter().map(|l| u64::from(l.quantity)).sum();
    let listings: u64 = levels.iter().map(|l| u64::from(l.listings)).sum();
    if listings == 0 {
        return 0.0;
    }
    quantity as f64 / listings as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: u32, quantity: u32, listings: u32) -> BookLevel {
        BookLevel {
            listings,
            unit_price: price,
            quantity,
        }
    }

    fn book(id: u32, buys: Vec<BookLevel>, sells: Vec<BookLevel>) -> OrderBookSnapshot {
        OrderBookSnapshot { id, buys, sells }
    }

    #[test]
    fn test_identical_snapshots_yield_zero_fills() {
        let buys = vec![level(100, 50, 2), level(99, 30, 1), level(95, 200, 4)];
        let sells = vec![level(110, 40, 2), level(111, 60, 3)];
        let s = book(1, buys, sells);

        let diff = diff_books(&s, &s);
        assert_eq!(diff.filled_buys, 0);
        assert_eq!(diff.filled_sells, 0);
    }

    #[test]
    fn test_pure_growth_yields_zero_fills() {
        let prev = vec![level(100, 50, 2), level(99, 30, 1)];
        let cur = vec![level(100, 80, 3), level(99, 30, 1)];
        assert_eq!(inferred_fills(&prev, &cur, BookSide::Buys), 0);
    }

    #[test]
    fn test_matched_level_shrink_counts_delta() {
        let prev = vec![level(100, 50, 2), level(99, 30, 1)];
        let cur = vec![level(100, 20, 1), level(99, 30, 1)];
        assert_eq!(inferred_fills(&prev, &cur, BookSide::Buys), 30);
    }

    #[test]
    fn test_walked_past_level_counts_fully() {
        // The 100c buy level vanished; current walk starts at 99c.
        let prev = vec![level(100, 50, 2), level(99, 30, 1)];
        let cur = vec![level(99, 30, 1)];
        assert_eq!(inferred_fills(&prev, &cur, BookSide::Buys), 50);
    }

    #[test]
    fn test_inserted_level_contributes_nothing() {
        // A new best buy at 101c appeared; old levels untouched.
        let prev = vec![level(100, 50, 2), level(99, 30, 1)];
        let cur = vec![level(101, 10, 1), level(100, 50, 2), level(99, 30, 1)];
        assert_eq!(inferred_fills(&prev, &cur, BookSide::Buys), 0);
    }

    #[test]
    fn test_sell_side_direction_is_mirrored() {
        // Sells ascend: the cheapest (12c) listing vanished, a new
        // cheaper one (11c) appeared in the same update.
        let prev = vec![level(12, 40, 1), level(13, 25, 2)];
        let cur = vec![level(11, 5, 1), level(13, 25, 2)];
        assert_eq!(inferred_fills(&prev, &cur, BookSide::Sells), 40);
    }

    #[test]
    fn test_current_exhausted_counts_leftover_previous() {
        let prev = vec![level(100, 50, 2), level(99, 30, 1), level(98, 10, 1)];
        let cur = vec![level(100, 50, 2)];
        assert_eq!(inferred_fills(&prev, &cur, BookSide::Buys), 40);
    }

    #[test]
    fn test_empty_sides() {
        let lv = vec![level(100, 50, 2)];
        assert_eq!(inferred_fills(&[], &lv, BookSide::Buys), 0);
        assert_eq!(inferred_fills(&lv, &[], BookSide::Buys), 50);
        assert_eq!(inferred_fills(&[], &[], BookSide::Sells), 0);
    }

    #[test]
    fn test_mixed_shrink_and_churn() {
        // 100c shrank by 30, 99c vanished, a 97c level appeared at the
        // tail. Only the first two events are fills.
        let prev = vec![level(100, 50, 2), level(99, 30, 1), level(98, 20, 1)];
        let cur = vec![level(100, 20, 1), level(98, 20, 1), level(97, 15, 1)];
        assert_eq!(inferred_fills(&prev, &cur, BookSide::Buys), 60);
    }

    #[test]
    fn test_average_order_size() {
        let levels = vec![level(100, 50, 2), level(99, 40, 3)];
        assert!((average_order_size(&levels) - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_average_order_size_zero_listings() {
        assert_eq!(average_order_size(&[]), 0.0);
        // Degenerate level with no resting orders must not divide by zero.
        assert_eq!(average_order_size(&[level(100, 0, 0)]), 0.0);
    }

    #[test]
    fn test_diff_books_covers_both_sides() {
        let prev = book(
            1,
            vec![level(100, 50, 2)],
            vec![level(110, 40, 2), level(111, 60, 3)],
        );
        let cur = book(
            1,
            vec![level(100, 45, 2)],
            vec![level(110, 10, 1), level(111, 60, 3)],
        );

        let diff = diff_books(&prev, &cur);
        assert_eq!(diff.filled_buys, 5);
        assert_eq!(diff.filled_sells, 30);
        assert!((diff.avg_bid_size - 22.5).abs() < 1e-9);
        assert!((diff.avg_offer_size - 17.5).abs() < 1e-9);
    }
}
