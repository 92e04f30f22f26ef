use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use couponscan_capture::{CaptureError, CaptureSession};
use couponscan_core::types::{Confirmation, ConfirmationId, CouponCode, DetectionEvent, RedemptionOutcome};

use crate::traits::OverlayPresenter;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Scanning,
    AwaitingConfirmation,
    // Terminal: the flow instance is not reused after redeeming.
    Redeeming,
    Cancelled,
}

/// The one in-flight redemption. At most one exists at a time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingRedemption {
    pub code: CouponCode,
    pub id: ConfirmationId,
    /// Whether the frozen highlight is still on screen, i.e. whether a
    /// decline must issue a clear.
    pub highlight_active: bool,
}

/// Confirmation state machine: `Scanning -> AwaitingConfirmation ->
/// {Redeeming, Scanning}`, with teardown forcing `Cancelled` from anywhere.
///
/// Holds a non-owning handle on the capture session: it pauses, resumes and
/// stops, but never allocates the device. Outcomes stream to the host over
/// the channel handed in at construction.
pub struct RedemptionFlow {
    state: FlowState,
    pending: Option<PendingRedemption>,
    session: Arc<CaptureSession>,
    overlay: Arc<dyn OverlayPresenter>,
    outcomes: UnboundedSender<RedemptionOutcome>,
}

impl RedemptionFlow {
    pub fn new(
        session: Arc<CaptureSession>,
        overlay: Arc<dyn OverlayPresenter>,
        outcomes: UnboundedSender<RedemptionOutcome>,
    ) -> Self {
        Self {
            state: FlowState::Scanning,
            pending: None,
            session,
            overlay,
            outcomes,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.state == FlowState::Scanning
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, FlowState::Redeeming | FlowState::Cancelled)
    }

    pub fn pending(&self) -> Option<&PendingRedemption> {
        self.pending.as_ref()
    }

    /// A settled detection arrived: suspend scanning, freeze the highlight
    /// and hand back the identity the eventual answer must carry.
    ///
    /// Detections delivered in any state but Scanning are dropped.
    pub async fn begin_confirmation(
        &mut self,
        event: DetectionEvent,
    ) -> Option<(ConfirmationId, CouponCode)> {
        if self.state != FlowState::Scanning {
            log::debug!("detection of {:?} dropped in {:?}", event.code, self.state);
            return None;
        }

        self.session.pause();
        self.overlay.show(event.region).await;

        let id = ConfirmationId::new();
        self.pending = Some(PendingRedemption {
            code: event.code.clone(),
            id,
            highlight_active: true,
        });
        self.state = FlowState::AwaitingConfirmation;
        log::info!("awaiting confirmation for {}", event.code.as_str());
        Some((id, event.code))
    }

    /// Delivers the user's answer. Answers for a stale id, and any answer
    /// once the flow is terminal, are discarded; a duplicate answer no-ops
    /// because the first one consumed the pending redemption.
    pub async fn resolve(&mut self, id: ConfirmationId, answer: Confirmation) {
        if self.state != FlowState::AwaitingConfirmation {
            log::debug!("late confirmation answer discarded in {:?}", self.state);
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.id != id {
            log::debug!("confirmation answer for stale request discarded");
            self.pending = Some(pending);
            return;
        }

        match answer {
            Confirmation::Yes => {
                // Stop before announcing: the host must never observe
                // `Redeemed` while frames are still live.
                self.session.stop();
                self.state = FlowState::Redeeming;
                log::info!("coupon {} redeemed", pending.code.as_str());
                let _ = self.outcomes.send(RedemptionOutcome::Redeemed(pending.code));
            }
            Confirmation::No => {
                if pending.highlight_active {
                    self.overlay.clear().await;
                }
                self.session.resume();
                self.state = FlowState::Scanning;
                log::info!("coupon {} declined, scanning resumes", pending.code.as_str());
                let _ = self.outcomes.send(RedemptionOutcome::Declined);
            }
        }
    }

    /// Screen teardown. Safe in every state; forces the terminal state. Emits
    /// `Cancelled` only when it interrupted an in-flight redemption.
    pub async fn cancel(&mut self) {
        if self.is_terminal() {
            return;
        }
        let interrupted = self.pending.take().is_some();
        self.overlay.clear().await;
        self.session.stop();
        self.state = FlowState::Cancelled;
        if interrupted {
            log::info!("pending confirmation force-resolved as cancelled");
            let _ = self.outcomes.send(RedemptionOutcome::Cancelled);
        }
    }
}
