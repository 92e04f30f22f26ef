pub mod detector;
pub mod flow;
pub mod traits;

pub use detector::CodeDetector;
pub use flow::{FlowState, PendingRedemption, RedemptionFlow, ScanError};
pub use traits::{ConfirmationUi, OverlayPresenter, PermissionGate};
