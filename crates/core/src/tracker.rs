//! Incremental tracker collaborator

use crate::error::TrackerError;

/// Tracks source files so "what changed since the last run" is cheap to answer
pub trait Tracker: Send + Sync {
    /// Number of source files known to the tracker
    fn tracked_file_count(&self) -> usize;

    /// Re-read tracked state after a successful generation pass
    fn refresh(&self) -> Result<(), TrackerError>;

    /// Directory keys whose sources changed since the last refresh (sorted)
    fn stale_dirs(&self) -> Result<Vec<String>, TrackerError>;
}
