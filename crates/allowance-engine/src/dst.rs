//! DST transition handling for civil times that do not map 1:1 onto instants.

use serde::Serialize;

/// How a civil (wall-clock) time was mapped onto an absolute instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DstResolution {
    /// The local time exists exactly once.
    #[default]
    Exact,
    /// The local time fell in a spring-forward gap (e.g., 02:30 AM) and was
    /// clamped forward to the first valid local minute after it.
    GapShifted,
    /// The local time occurs twice during a fall-back overlap; the earlier
    /// occurrence (the pre-transition offset) was chosen.
    OverlapEarliest,
}

impl DstResolution {
    pub fn is_anomaly(self) -> bool {
        self != DstResolution::Exact
    }
}
