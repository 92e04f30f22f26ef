use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use couponscan_capture::{CameraProvider, CaptureSession, SessionEvent, SessionState};
use couponscan_core::config::ScannerConfig;
use couponscan_core::types::{Confirmation, ConfirmationId, DetectionEvent, RedemptionOutcome};
use couponscan_engine::detector::CodeDetector;
use couponscan_engine::flow::{RedemptionFlow, ScanError};
use couponscan_engine::traits::{ConfirmationUi, OverlayPresenter, PermissionGate};

/// Everything the foreground loop reacts to. The capture worker's events are
/// bridged in, confirmation answers come back as messages, and teardown is
/// just one more message.
enum ScreenMsg {
    Session(SessionEvent),
    Confirmed {
        id: ConfirmationId,
        answer: Confirmation,
    },
    Teardown,
}

/// Host-facing surface of the scanner screen.
///
/// `on_screen_appear` runs the permission gate, starts the capture session
/// and spawns the single foreground loop that owns every externally visible
/// transition. `on_screen_disappear` is the cancellation signal: safe in any
/// state, redundantly callable, and it force-resolves an in-flight
/// confirmation as `Cancelled`.
pub struct ScannerScreen {
    config: ScannerConfig,
    gate: Arc<dyn PermissionGate>,
    overlay: Arc<dyn OverlayPresenter>,
    confirm: Arc<dyn ConfirmationUi>,
    session: Arc<CaptureSession>,
    ctl: Mutex<Option<UnboundedSender<ScreenMsg>>>,
}

impl ScannerScreen {
    pub fn new(
        config: ScannerConfig,
        provider: Arc<dyn CameraProvider>,
        gate: Arc<dyn PermissionGate>,
        overlay: Arc<dyn OverlayPresenter>,
        confirm: Arc<dyn ConfirmationUi>,
    ) -> Self {
        Self {
            config,
            gate,
            overlay,
            confirm,
            session: Arc::new(CaptureSession::new(provider)),
            ctl: Mutex::new(None),
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Gate, start, and hand back the outcome stream. On permission denial
    /// the session is never started and nothing is allocated; the host shows
    /// its settings redirect and that is the end of it.
    pub async fn on_screen_appear(
        &self,
    ) -> Result<UnboundedReceiver<RedemptionOutcome>, ScanError> {
        if !self.gate.request_access().await {
            log::warn!("camera permission denied");
            return Err(ScanError::PermissionDenied);
        }

        let events = self.session.start()?;

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        // Bridge the worker's channel onto the foreground loop. The thread
        // ends when either side goes away.
        {
            let msg_tx = msg_tx.clone();
            thread::spawn(move || {
                for event in events {
                    if msg_tx.send(ScreenMsg::Session(event)).is_err() {
                        break;
                    }
                }
            });
        }

        *self.ctl_lock() = Some(msg_tx.clone());

        tokio::spawn(run_loop(
            self.config.clone(),
            Arc::clone(&self.session),
            Arc::clone(&self.overlay),
            Arc::clone(&self.confirm),
            msg_tx,
            msg_rx,
            outcome_tx,
        ));

        Ok(outcome_rx)
    }

    /// Teardown. Stops the capture directly (without waiting for the loop to
    /// get scheduled) and tells the loop to wind the flow down.
    pub fn on_screen_disappear(&self) {
        self.session.stop();
        if let Some(tx) = self.ctl_lock().take() {
            let _ = tx.send(ScreenMsg::Teardown);
        }
    }

    fn ctl_lock(&self) -> std::sync::MutexGuard<'_, Option<UnboundedSender<ScreenMsg>>> {
        match self.ctl.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ScannerScreen {
    fn drop(&mut self) {
        self.on_screen_disappear();
    }
}

/// The serialized foreground context. Every state transition the outside
/// world can observe happens on this task, in message order.
async fn run_loop(
    config: ScannerConfig,
    session: Arc<CaptureSession>,
    overlay: Arc<dyn OverlayPresenter>,
    confirm: Arc<dyn ConfirmationUi>,
    msg_tx: UnboundedSender<ScreenMsg>,
    mut msgs: UnboundedReceiver<ScreenMsg>,
    outcomes: UnboundedSender<RedemptionOutcome>,
) {
    let mut detector = CodeDetector::new(config.settle_window(), Arc::clone(&overlay));
    let mut flow = RedemptionFlow::new(Arc::clone(&session), overlay, outcomes);
    let hold = config.highlight_hold();

    loop {
        // The settle window is a fixed timer relative to its own start: if
        // one is open, race the next message against its deadline so a code
        // held perfectly still is still promoted.
        let msg = match detector.deadline() {
            Some(deadline) => {
                let deadline = tokio::time::Instant::from_std(deadline);
                tokio::select! {
                    msg = msgs.recv() => msg,
                    _ = tokio::time::sleep_until(deadline) => {
                        if flow.is_scanning() {
                            if let Some(event) = detector.on_deadline(Instant::now()) {
                                open_confirmation(
                                    &mut flow, &mut detector, event, &confirm, &msg_tx, hold,
                                )
                                .await;
                            }
                        } else {
                            detector.reset();
                        }
                        continue;
                    }
                }
            }
            None => msgs.recv().await,
        };

        let Some(msg) = msg else { break };

        match msg {
            ScreenMsg::Session(SessionEvent::Running) => {
                // Preview surface side effects belong here, on this task.
                log::info!("capture running");
            }
            ScreenMsg::Session(SessionEvent::Candidate(candidate)) => {
                if !flow.is_scanning() {
                    continue;
                }
                if let Some(event) = detector.on_candidate(candidate, Instant::now()).await {
                    open_confirmation(&mut flow, &mut detector, event, &confirm, &msg_tx, hold)
                        .await;
                }
            }
            ScreenMsg::Session(SessionEvent::Error(e)) => {
                log::error!("capture error: {e}");
                session.stop();
                // The worker's Stopped follows and ends the loop.
            }
            ScreenMsg::Session(SessionEvent::Stopped) => {
                // Device released. A stop the flow did not initiate itself
                // (teardown, backgrounding, worker failure) force-resolves
                // whatever was in flight.
                if !flow.is_terminal() {
                    flow.cancel().await;
                }
                break;
            }
            ScreenMsg::Confirmed { id, answer } => {
                flow.resolve(id, answer).await;
                if flow.is_terminal() {
                    break;
                }
            }
            ScreenMsg::Teardown => {
                flow.cancel().await;
                break;
            }
        }
    }

    log::debug!("scanner loop exited");
}

/// Suspends scanning for a settled detection and parks the prompt on its own
/// task; the answer comes back as a message carrying the confirmation id, so
/// a late answer for a torn-down prompt is simply ignored by the flow.
async fn open_confirmation(
    flow: &mut RedemptionFlow,
    detector: &mut CodeDetector,
    event: DetectionEvent,
    confirm: &Arc<dyn ConfirmationUi>,
    msg_tx: &UnboundedSender<ScreenMsg>,
    hold: Duration,
) {
    let Some((id, code)) = flow.begin_confirmation(event).await else {
        return;
    };
    detector.reset();

    let confirm = Arc::clone(confirm);
    let msg_tx = msg_tx.clone();
    tokio::spawn(async move {
        // Let the final highlight sit before the prompt comes up.
        tokio::time::sleep(hold).await;
        let answer = confirm.request_confirmation(&code).await;
        let _ = msg_tx.send(ScreenMsg::Confirmed { id, answer });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use couponscan_capture::{CameraDevice, CaptureError};
    use couponscan_core::types::{CouponCode, FrameCandidate, Region};
    use std::collections::VecDeque;
    use tokio::sync::Semaphore;

    struct Gate(bool);

    #[async_trait]
    impl PermissionGate for Gate {
        async fn request_access(&self) -> bool {
            self.0
        }
    }

    #[derive(Default)]
    struct RecordingOverlay {
        shown: Mutex<usize>,
        cleared: Mutex<usize>,
    }

    #[async_trait]
    impl OverlayPresenter for RecordingOverlay {
        async fn show(&self, _region: Region) {
            *self.shown.lock().unwrap() += 1;
        }

        async fn clear(&self) {
            *self.cleared.lock().unwrap() += 1;
        }
    }

    /// Prompt that records the codes it was asked about and answers only
    /// when the test releases a permit.
    struct ScriptedConfirm {
        permits: Semaphore,
        answers: Mutex<VecDeque<Confirmation>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedConfirm {
        fn new(answers: impl IntoIterator<Item = Confirmation>, ready: usize) -> Arc<Self> {
            Arc::new(Self {
                permits: Semaphore::new(ready),
                answers: Mutex::new(answers.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn release(&self) {
            self.permits.add_permits(1);
        }
    }

    #[async_trait]
    impl ConfirmationUi for ScriptedConfirm {
        async fn request_confirmation(&self, code: &CouponCode) -> Confirmation {
            self.calls.lock().unwrap().push(code.as_str().to_string());
            self.permits.acquire().await.expect("semaphore open").forget();
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Confirmation::No)
        }
    }

    /// Replays scripted frame segments: `Some(n)` frames of a code, `None`
    /// for a gap segment, and the final segment repeats forever.
    struct SegmentDevice {
        segments: VecDeque<(Option<FrameCandidate>, Option<usize>)>,
    }

    impl CameraDevice for SegmentDevice {
        fn configure(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        fn poll_candidate(&mut self, timeout: Duration) -> Option<FrameCandidate> {
            thread::sleep(timeout.min(Duration::from_millis(5)));
            let (frame, remaining) = self.segments.front_mut()?;
            let frame = frame.clone();
            if let Some(n) = remaining {
                *n -= 1;
                if *n == 0 && self.segments.len() > 1 {
                    self.segments.pop_front();
                }
            }
            frame
        }
    }

    struct SegmentProvider {
        segments: Vec<(Option<&'static str>, Option<usize>)>,
    }

    impl SegmentProvider {
        fn steady(code: &'static str) -> Arc<Self> {
            Arc::new(Self {
                segments: vec![(Some(code), None)],
            })
        }
    }

    impl CameraProvider for SegmentProvider {
        fn default_device(&self) -> Option<Box<dyn CameraDevice>> {
            let segments = self
                .segments
                .iter()
                .map(|(code, n)| {
                    let frame = code.map(|c| FrameCandidate {
                        code: CouponCode::new(c),
                        region: Region::new(0.25, 0.25, 0.5, 0.5),
                    });
                    (frame, *n)
                })
                .collect();
            Some(Box::new(SegmentDevice { segments }))
        }
    }

    struct NoCamera;

    impl CameraProvider for NoCamera {
        fn default_device(&self) -> Option<Box<dyn CameraDevice>> {
            None
        }
    }

    fn quick_config() -> ScannerConfig {
        ScannerConfig {
            settle_window_ms: 30,
            highlight_hold_ms: 5,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    async fn next_outcome(rx: &mut UnboundedReceiver<RedemptionOutcome>) -> RedemptionOutcome {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("outcome in time")
            .expect("loop alive")
    }

    #[tokio::test]
    async fn steady_code_yields_one_confirmation_and_redeems_on_yes() {
        let confirm = ScriptedConfirm::new([Confirmation::Yes], 8);
        let screen = ScannerScreen::new(
            quick_config(),
            SegmentProvider::steady("COUPON123"),
            Arc::new(Gate(true)),
            Arc::new(RecordingOverlay::default()),
            confirm.clone(),
        );

        let mut outcomes = screen.on_screen_appear().await.expect("appear");
        assert_eq!(
            next_outcome(&mut outcomes).await,
            RedemptionOutcome::Redeemed(CouponCode::new("COUPON123"))
        );

        wait_until(|| screen.session_state() == SessionState::Stopped, "session stop").await;

        // Frames kept arriving the whole time; only one prompt was issued.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(confirm.calls(), vec!["COUPON123".to_string()]);
    }

    #[tokio::test]
    async fn decline_resumes_and_a_later_code_gets_its_own_confirmation() {
        // COUPON123 for ~40ms, a gap, then COUPON456 forever. No permits up
        // front: the test releases each answer once the prompt is up.
        let provider = Arc::new(SegmentProvider {
            segments: vec![
                (Some("COUPON123"), Some(8)),
                (None, Some(10)),
                (Some("COUPON456"), None),
            ],
        });
        let confirm = ScriptedConfirm::new([Confirmation::No, Confirmation::Yes], 0);
        let overlay = Arc::new(RecordingOverlay::default());
        let screen = ScannerScreen::new(
            quick_config(),
            provider,
            Arc::new(Gate(true)),
            overlay.clone(),
            confirm.clone(),
        );

        let mut outcomes = screen.on_screen_appear().await.expect("appear");

        let confirm_for_wait = confirm.clone();
        wait_until(|| confirm_for_wait.calls().len() == 1, "first prompt").await;
        // Give the device time to move past the COUPON123 frames before the
        // decline resumes scanning.
        tokio::time::sleep(Duration::from_millis(200)).await;
        confirm.release();

        assert_eq!(next_outcome(&mut outcomes).await, RedemptionOutcome::Declined);
        wait_until(|| screen.session_state() == SessionState::Running, "resume").await;
        assert!(*overlay.cleared.lock().unwrap() >= 1);

        let confirm_for_wait = confirm.clone();
        wait_until(|| confirm_for_wait.calls().len() == 2, "second prompt").await;
        confirm.release();

        assert_eq!(
            next_outcome(&mut outcomes).await,
            RedemptionOutcome::Redeemed(CouponCode::new("COUPON456"))
        );
        assert_eq!(
            confirm.calls(),
            vec!["COUPON123".to_string(), "COUPON456".to_string()]
        );
        wait_until(|| screen.session_state() == SessionState::Stopped, "session stop").await;
    }

    #[tokio::test]
    async fn teardown_while_awaiting_cancels_and_the_late_answer_is_ignored() {
        let confirm = ScriptedConfirm::new([Confirmation::Yes], 0);
        let screen = ScannerScreen::new(
            quick_config(),
            SegmentProvider::steady("COUPON123"),
            Arc::new(Gate(true)),
            Arc::new(RecordingOverlay::default()),
            confirm.clone(),
        );

        let mut outcomes = screen.on_screen_appear().await.expect("appear");

        let confirm_for_wait = confirm.clone();
        wait_until(|| confirm_for_wait.calls().len() == 1, "prompt up").await;

        // The user never answers; the screen goes away first.
        screen.on_screen_disappear();
        assert_eq!(next_outcome(&mut outcomes).await, RedemptionOutcome::Cancelled);
        wait_until(|| screen.session_state() == SessionState::Stopped, "session stop").await;

        // Now the Yes lands. Nobody cares.
        confirm.release();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(outcomes.try_recv().is_err());

        // Redundant teardown stays silent.
        screen.on_screen_disappear();
    }

    #[tokio::test]
    async fn permission_denied_never_starts_the_session() {
        let screen = ScannerScreen::new(
            quick_config(),
            SegmentProvider::steady("COUPON123"),
            Arc::new(Gate(false)),
            Arc::new(RecordingOverlay::default()),
            ScriptedConfirm::new([], 0),
        );

        assert!(matches!(
            screen.on_screen_appear().await,
            Err(ScanError::PermissionDenied)
        ));
        assert_eq!(screen.session_state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn missing_camera_surfaces_device_unavailable() {
        let screen = ScannerScreen::new(
            quick_config(),
            Arc::new(NoCamera),
            Arc::new(Gate(true)),
            Arc::new(RecordingOverlay::default()),
            ScriptedConfirm::new([], 0),
        );

        assert!(matches!(
            screen.on_screen_appear().await,
            Err(ScanError::Capture(CaptureError::DeviceUnavailable))
        ));
        assert_eq!(screen.session_state(), SessionState::Idle);
    }
}
