use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing knobs for the scan-and-redeem flow.
///
/// The defaults match the source behavior: a reading must hold for about half
/// a second before it counts, and the final highlight sits briefly before the
/// confirmation prompt comes up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// How long the same code must keep being read before it is promoted to a
    /// detection.
    pub settle_window_ms: u64,

    /// Hold on the final highlight before the confirmation prompt is shown.
    pub highlight_hold_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            settle_window_ms: 500,
            highlight_hold_ms: 500,
        }
    }
}

impl ScannerConfig {
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }

    pub fn highlight_hold(&self) -> Duration {
        Duration::from_millis(self.highlight_hold_ms)
    }
}
