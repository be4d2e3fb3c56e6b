//! Core engine — book diffing and multi-horizon trend tracking.

pub mod diff;
pub mod tracker;
pub mod trend;
