use std::time::{Duration, Instant};

use crate::types::{DetectionEvent, FrameCandidate, Region};

/// What the caller should do with one observed candidate.
#[derive(Debug, PartialEq)]
pub enum SettleAction {
    /// The window is still open; keep the highlight tracking this region.
    Highlight(Region),
    /// The reading held for the full window.
    Promote(DetectionEvent),
}

#[derive(Debug)]
struct PendingCandidate {
    candidate: FrameCandidate,
    started: Instant,
}

/// Debounce policy for raw frame candidates.
///
/// The first candidate opens a settle window; repeats of the same code refresh
/// the region (so a moving code keeps its highlight) and promote once the
/// window has elapsed. A differing code restarts the window. Gaps in the
/// frame stream do not reset it; only a different reading does.
///
/// Pure bookkeeping: the caller supplies `now` and applies side effects.
#[derive(Debug)]
pub struct SettleTracker {
    window: Duration,
    pending: Option<PendingCandidate>,
}

impl SettleTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    pub fn observe(&mut self, candidate: FrameCandidate, now: Instant) -> SettleAction {
        let same_code = self
            .pending
            .as_ref()
            .is_some_and(|p| p.candidate.code == candidate.code);

        if !same_code {
            let region = candidate.region;
            self.pending = Some(PendingCandidate {
                candidate,
                started: now,
            });
            return SettleAction::Highlight(region);
        }

        let elapsed = if let Some(pending) = self.pending.as_mut() {
            pending.candidate.region = candidate.region;
            now.duration_since(pending.started) >= self.window
        } else {
            false
        };

        if elapsed {
            self.promote(now)
        } else {
            SettleAction::Highlight(candidate.region)
        }
    }

    /// When the currently open window closes, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.started + self.window)
    }

    /// Deadline-timer path: promotes the pending candidate once its window has
    /// elapsed, so a code held perfectly still is not starved between frames.
    pub fn expire(&mut self, now: Instant) -> Option<DetectionEvent> {
        let elapsed = self
            .pending
            .as_ref()
            .is_some_and(|p| now.duration_since(p.started) >= self.window);
        if !elapsed {
            return None;
        }
        match self.promote(now) {
            SettleAction::Promote(event) => Some(event),
            SettleAction::Highlight(_) => None,
        }
    }

    pub fn reset(&mut self) {
        self.pending = None;
    }

    fn promote(&mut self, now: Instant) -> SettleAction {
        match self.pending.take() {
            Some(pending) => SettleAction::Promote(DetectionEvent {
                code: pending.candidate.code,
                region: pending.candidate.region,
                timestamp: now,
            }),
            None => SettleAction::Highlight(Region::new(0.0, 0.0, 0.0, 0.0)),
        }
    }
}
