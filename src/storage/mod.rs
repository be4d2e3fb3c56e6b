//! Persistence layer.
//!
//! Saves and loads the tracked-item map to/from a JSON file, so trend
//! trackers survive a restart instead of relearning from flat.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::engine::tracker::TrackedItem;
use crate::types::ItemId;

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "tpflip_state.json";

/// Save the tracked-item map to a JSON file.
pub fn save_items(items: &HashMap<ItemId, TrackedItem>, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string(items).context("Failed to serialise tracked items")?;

    std::fs::write(path, &json).context(format!("Failed to write state to {path}"))?;

    debug!(path, items = items.len(), "State saved");
    Ok(())
}

/// Load the tracked-item map from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_items(path: Option<&str>) -> Result<Option<HashMap<ItemId, TrackedItem>>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json =
        std::fs::read_to_string(path).context(format!("Failed to read state from {path}"))?;

    let items: HashMap<ItemId, TrackedItem> =
        serde_json::from_str(&json).context(format!("Failed to parse state from {path}"))?;

    info!(path, items = items.len(), "State loaded from disk");

    Ok(Some(items))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
