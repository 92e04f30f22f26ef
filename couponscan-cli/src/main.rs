use std::sync::Arc;
use std::time::Duration;

use couponscan_appcore::ScannerScreen;
use couponscan_capture::{CameraDevice, CameraProvider, CaptureError};
use couponscan_core::config::ScannerConfig;
use couponscan_core::types::{Confirmation, CouponCode, FrameCandidate, RedemptionOutcome, Region};
use couponscan_engine::traits::{ConfirmationUi, OverlayPresenter, PermissionGate};

// Demo camera: reads the same coupon code on every frame, drifting slowly
// across the viewfinder the way a hand-held phone would.
struct DemoDevice {
    code: CouponCode,
    tick: u32,
}

impl CameraDevice for DemoDevice {
    fn configure(&mut self) -> Result<(), CaptureError> {
        std::thread::sleep(Duration::from_millis(50));
        Ok(())
    }

    fn poll_candidate(&mut self, timeout: Duration) -> Option<FrameCandidate> {
        std::thread::sleep(timeout.min(Duration::from_millis(30)));
        self.tick += 1;
        let drift = (self.tick % 10) as f32 * 0.01;
        Some(FrameCandidate {
            code: self.code.clone(),
            region: Region::new(0.25 + drift, 0.25, 0.4, 0.4),
        })
    }
}

struct DemoProvider {
    code: String,
}

impl CameraProvider for DemoProvider {
    fn default_device(&self) -> Option<Box<dyn CameraDevice>> {
        Some(Box::new(DemoDevice {
            code: CouponCode::new(self.code.clone()),
            tick: 0,
        }))
    }
}

struct AlwaysGranted;

#[async_trait::async_trait]
impl PermissionGate for AlwaysGranted {
    async fn request_access(&self) -> bool {
        true
    }
}

struct StdoutOverlay;

#[async_trait::async_trait]
impl OverlayPresenter for StdoutOverlay {
    async fn show(&self, region: Region) {
        println!("[overlay] highlight at ({:.2}, {:.2})", region.x, region.y);
    }

    async fn clear(&self) {
        println!("[overlay] cleared");
    }
}

struct EnvConfirm {
    answer: Confirmation,
}

#[async_trait::async_trait]
impl ConfirmationUi for EnvConfirm {
    async fn request_confirmation(&self, code: &CouponCode) -> Confirmation {
        println!("[confirm] use coupon {}? -> {:?}", code.as_str(), self.answer);
        self.answer
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // SCAN_CODE picks the coupon the demo camera reads; CONFIRM=no declines
    // the first prompt (the screen keeps scanning, so the demo tears it down
    // after a short while instead of waiting forever).
    let code = std::env::var("SCAN_CODE").unwrap_or_else(|_| "COUPON123".into());
    let decline = std::env::var("CONFIRM").is_ok_and(|v| v.eq_ignore_ascii_case("no"));
    let answer = if decline {
        Confirmation::No
    } else {
        Confirmation::Yes
    };

    let screen = ScannerScreen::new(
        ScannerConfig::default(),
        Arc::new(DemoProvider { code }),
        Arc::new(AlwaysGranted),
        Arc::new(StdoutOverlay),
        Arc::new(EnvConfirm { answer }),
    );

    let mut outcomes = screen.on_screen_appear().await?;

    if decline {
        // Every prompt gets declined, so scanning never ends on its own;
        // tear the screen down after a short demo window and drain whatever
        // outcomes were produced.
        tokio::time::sleep(Duration::from_secs(2)).await;
        screen.on_screen_disappear();
        while let Some(outcome) = outcomes.recv().await {
            println!("outcome: {outcome:?}");
        }
        return Ok(());
    }

    match outcomes.recv().await {
        Some(RedemptionOutcome::Redeemed(code)) => {
            println!("coupon {} redeemed", code.as_str());
        }
        Some(other) => println!("outcome: {other:?}"),
        None => println!("scanner closed without an outcome"),
    }

    Ok(())
}
