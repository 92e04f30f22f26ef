use std::sync::Arc;
use std::time::{Duration, Instant};

use couponscan_core::settle::{SettleAction, SettleTracker};
use couponscan_core::types::{DetectionEvent, FrameCandidate};

use crate::traits::OverlayPresenter;

/// Consumes raw frame candidates and applies the not-yet-confirmed debounce.
///
/// While the settle window is open the overlay is re-driven with the latest
/// region so the highlight tracks a moving code; only once the same code has
/// held for the full window does a `DetectionEvent` come out.
pub struct CodeDetector {
    tracker: SettleTracker,
    overlay: Arc<dyn OverlayPresenter>,
}

impl CodeDetector {
    pub fn new(settle_window: Duration, overlay: Arc<dyn OverlayPresenter>) -> Self {
        Self {
            tracker: SettleTracker::new(settle_window),
            overlay,
        }
    }

    /// Feeds one candidate. Returns the promoted detection once the reading
    /// has settled; the caller owns what happens next (the final highlight is
    /// the flow's job, not ours).
    pub async fn on_candidate(
        &mut self,
        candidate: FrameCandidate,
        now: Instant,
    ) -> Option<DetectionEvent> {
        match self.tracker.observe(candidate, now) {
            SettleAction::Highlight(region) => {
                self.overlay.show(region).await;
                None
            }
            SettleAction::Promote(event) => Some(event),
        }
    }

    /// When the open settle window closes, if one is open. The window is a
    /// fixed timer relative to its own start; it is never extended.
    pub fn deadline(&self) -> Option<Instant> {
        self.tracker.deadline()
    }

    /// Deadline-timer path: promotes a code held steady between frames.
    pub fn on_deadline(&mut self, now: Instant) -> Option<DetectionEvent> {
        self.tracker.expire(now)
    }

    /// Drops any half-settled candidate, e.g. when a redemption takes over.
    pub fn reset(&mut self) {
        self.tracker.reset();
    }
}
