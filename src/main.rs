//! TPFLIP — Guild Wars 2 Trading Post flip scanner
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores tracked-item state from disk (or bootstraps fresh from the
//! API), and runs the fetch→update→score refresh loop with graceful
//! shutdown.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use tpflip::api::client::CommerceClient;
use tpflip::api::fetch::{BulkFetcher, RetryPolicy};
use tpflip::config::AppConfig;
use tpflip::engine::tracker::TrackedItem;
use tpflip::engine::trend::TrendEngine;
use tpflip::storage;
use tpflip::strategy::{FlipScorer, StrategyConfig};
use tpflip::types::ItemId;

const BANNER: &str = r#"
 _____ ____  _____ _     ___ ____
|_   _|  _ \|  ___| |   |_ _|  _ \
  | | | |_) | |_  | |    | || |_) |
  | | |  __/|  _| | |___ | ||  __/
  |_| |_|   |_|   |_____|___|_|

  Trading Post flip scanner
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        refresh_interval_secs = cfg.engine.refresh_interval_secs,
        horizons = ?cfg.engine.horizons_secs,
        budget = cfg.strategy.budget,
        "TPFLIP starting up"
    );

    // -- Initialise components -------------------------------------------

    let client = CommerceClient::new(cfg.api.request_timeout_secs)?;
    let fetcher = BulkFetcher::new(
        client,
        RetryPolicy {
            max_attempts: cfg.api.max_attempts,
            rate_limit_cooldown: Duration::from_secs(cfg.api.rate_limit_cooldown_secs),
            transient_cooldown: Duration::from_secs(cfg.api.transient_cooldown_secs),
        },
        cfg.api.page_size,
    );
    let engine = TrendEngine::new(cfg.engine.refresh_interval_secs);
    let scorer = FlipScorer::new(StrategyConfig {
        outbid_fraction: cfg.strategy.outbid_fraction,
        budget: cfg.strategy.budget,
        refresh_interval_secs: cfg.engine.refresh_interval_secs as f64,
    });

    // -- Restore or bootstrap tracked items ------------------------------

    let mut items = storage::load_items(None)?.unwrap_or_default();
    if !items.is_empty() {
        info!(items = items.len(), "Resumed tracked items from saved state");
    }

    let wanted_ids = resolve_tracked_ids(&cfg, &fetcher).await?;
    let missing: Vec<ItemId> = wanted_ids
        .iter()
        .copied()
        .filter(|id| !items.contains_key(id))
        .collect();
    if !missing.is_empty() {
        let added =
            bootstrap_items(&fetcher, &missing, &cfg.engine.horizons_secs, &mut items).await;
        info!(added, tracked = items.len(), "Bootstrapped new items");
    }

    if items.is_empty() {
        anyhow::bail!("no items could be tracked; check the watchlist and API availability");
    }

    let mut tracked_ids: Vec<ItemId> = items.keys().copied().collect();
    tracked_ids.sort_unstable();

    // -- Main loop -------------------------------------------------------

    let refresh = Duration::from_secs(cfg.engine.refresh_interval_secs);
    let mut interval = tokio::time::interval(refresh);
    // First tick fires immediately; it only marks the loop start.
    interval.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.engine.refresh_interval_secs,
        items = tracked_ids.len(),
        "Entering refresh loop. Press Ctrl+C to stop."
    );

    let mut cycle: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                cycle += 1;
                match run_cycle(&fetcher, &engine, &scorer, &mut items, &mut tracked_ids, &cfg).await {
                    Ok(()) => {
                        if let Err(e) = storage::save_items(&items, None) {
                            error!(error = %e, "Failed to save state");
                        }
                    }
                    Err(e) => {
                        error!(cycle, error = %e, "Cycle failed — continuing to next");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Save final state
    storage::save_items(&items, None)?;
    info!(cycles = cycle, items = items.len(), "TPFLIP shut down cleanly.");

    Ok(())
}

/// The id set to track: the configured watchlist, or the first
/// `max_tracked_items` of the full tradeable list.
async fn resolve_tracked_ids(
    cfg: &AppConfig,
    fetcher: &BulkFetcher<CommerceClient>,
) -> Result<Vec<ItemId>> {
    if !cfg.tracker.watchlist.is_empty() {
        return Ok(cfg.tracker.watchlist.clone());
    }

    let mut ids = fetcher.discover_tradeable_ids().await?;
    ids.truncate(cfg.tracker.max_tracked_items);
    info!(count = ids.len(), "Tracking discovered tradeable items");
    Ok(ids)
}

/// Create tracked-item state for new ids from their metadata and first
/// snapshots. Ids that fail to resolve (or are bound) are skipped with
/// a warning; tracking starts for the rest.
async fn bootstrap_items(
    fetcher: &BulkFetcher<CommerceClient>,
    ids: &[ItemId],
    horizons_secs: &[u64],
    items: &mut HashMap<ItemId, TrackedItem>,
) -> usize {
    let metas = fetcher.fetch_item_metas(ids).await;
    let (prices, listings) =
        tokio::join!(fetcher.fetch_prices(ids), fetcher.fetch_listings(ids));
    let now = Utc::now();

    let mut added = 0;
    for (i, id) in ids.iter().enumerate() {
        let meta = match metas.results[i].as_ref() {
            Some(m) if m.is_tradeable() => m,
            Some(_) => {
                warn!(item = id, "Item is account/soul bound; not tracking");
                continue;
            }
            None => {
                warn!(item = id, "No item metadata; not tracking");
                continue;
            }
        };
        let (Some(price), Some(book)) = (prices.results[i].clone(), listings.results[i].clone())
        else {
            warn!(item = id, "Missing initial snapshots; not tracking");
            continue;
        };

        match TrackedItem::new(meta, price, book, horizons_secs, now) {
            Ok(item) => {
                items.insert(*id, item);
                added += 1;
            }
            Err(e) => warn!(item = id, error = %e, "Failed to start tracking"),
        }
    }
    added
}

/// Run a single fetch→update→score refresh cycle.
async fn run_cycle(
    fetcher: &BulkFetcher<CommerceClient>,
    engine: &TrendEngine,
    scorer: &FlipScorer,
    items: &mut HashMap<ItemId, TrackedItem>,
    tracked_ids: &mut Vec<ItemId>,
    cfg: &AppConfig,
) -> Result<()> {
    // 1. Fetch both feeds concurrently
    let (prices, listings) = tokio::join!(
        fetcher.fetch_prices(tracked_ids),
        fetcher.fetch_listings(tracked_ids)
    );
    let now = Utc::now();

    // 2. Apply updates. Unresolved ids are per-id no-ops.
    for (i, id) in tracked_ids.iter().enumerate() {
        let Some(item) = items.get_mut(id) else {
            continue;
        };
        engine.apply_price_update(item, prices.results[i].as_ref(), now)?;
        engine.apply_listings_update(item, listings.results[i].as_ref(), now)?;
    }

    // 3. Ids the server explicitly rejected have left the trading post;
    //    stop tracking them.
    for id in prices.rejected.iter().chain(listings.rejected.iter()) {
        if items.remove(id).is_some() {
            warn!(item = id, "Server rejected id; dropped from tracking");
        }
    }
    tracked_ids.retain(|id| items.contains_key(id));

    // 4. Score and report
    let flips = scorer.score_all(items.values());
    for flip in flips.iter().take(cfg.strategy.report_top) {
        info!(%flip, "Flip candidate");
    }

    info!(
        items = tracked_ids.len(),
        prices_resolved = prices.resolved(),
        listings_resolved = listings.resolved(),
        flips = flips.len(),
        best_profit = flips.first().map(|f| f.expected_profit).unwrap_or(0),
        "Cycle complete"
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tpflip=info"));

    let json_logging = std::env::var("TPFLIP_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
