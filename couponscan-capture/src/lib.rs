pub mod session;

pub use session::{
    CameraDevice, CameraProvider, CaptureError, CaptureSession, SessionEvent, SessionState,
};
