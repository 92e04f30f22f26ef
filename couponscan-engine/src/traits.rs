use async_trait::async_trait;
use couponscan_core::types::{Confirmation, CouponCode, Region};

/// Camera authorization collaborator. Asked once per screen appearance; on
/// denial the capture session is never started.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn request_access(&self) -> bool;
}

/// Bounding-box highlight on the host's render surface. Both calls are
/// fire-and-forget draw commands and must be fast.
#[async_trait]
pub trait OverlayPresenter: Send + Sync {
    async fn show(&self, region: Region);
    async fn clear(&self);
}

/// Modal Yes/No prompt carrying the detected code. Waits indefinitely for a
/// human decision; there is no timeout on this step.
#[async_trait]
pub trait ConfirmationUi: Send + Sync {
    async fn request_confirmation(&self, code: &CouponCode) -> Confirmation;
}
