//
// Capture-session lifecycle for the QR scanner.
//
// The session owns a background worker thread that configures the camera
// device and polls it for raw code candidates. All externally visible state
// lives behind one mutex; the worker hands everything to the foreground as
// one-directional `SessionEvent` messages, so the foreground never blocks on
// the sensor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;
use std::time::Duration;

use couponscan_core::types::FrameCandidate;

/// How long the worker blocks on the device before re-checking state. Bounds
/// the latency of stop/pause observed by the worker.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("no camera device available")]
    DeviceUnavailable,

    #[error("capture session is busy (state: {0:?})")]
    DeviceBusy(SessionState),

    #[error("device configuration failed: {0}")]
    Configure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopped,
}

/// Messages from the worker to the foreground event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Device configured and live. UI side effects (attaching the preview
    /// surface) belong after this, on the event thread.
    Running,
    Candidate(FrameCandidate),
    /// Configuration failed on the worker. A `Stopped` follows.
    Error(CaptureError),
    /// Device handle released. Emitted exactly once, always last.
    Stopped,
}

/// A configured camera handle. Dropping it releases the device.
pub trait CameraDevice: Send {
    /// Attach inputs and outputs. May be slow; only ever called on the
    /// worker thread.
    fn configure(&mut self) -> Result<(), CaptureError>;

    /// Block up to `timeout` for the next raw detection candidate.
    fn poll_candidate(&mut self, timeout: Duration) -> Option<FrameCandidate>;
}

/// Device discovery seam. Stands in for the platform camera stack.
pub trait CameraProvider: Send + Sync {
    /// The default camera, or `None` when the host has no usable sensor.
    fn default_device(&self) -> Option<Box<dyn CameraDevice>>;
}

struct Inner {
    state: SessionState,
    // Per-run stop signal. A restart replaces it, so a worker from a previous
    // run exits on its own flag even after the public state moved on.
    shutdown: Option<Arc<AtomicBool>>,
    worker: Option<thread::JoinHandle<()>>,
}

/// Sole owner of the camera device handle.
///
/// `start`/`pause`/`resume`/`stop` are safe from any thread at any time,
/// including concurrently with an in-flight configuration. The device is
/// acquired at most once per run and released exactly once, on the worker,
/// when the run winds down.
pub struct CaptureSession {
    provider: Arc<dyn CameraProvider>,
    inner: Arc<Mutex<Inner>>,
    // Serializes whole start runs, device discovery included.
    start_gate: Mutex<()>,
}

impl CaptureSession {
    pub fn new(provider: Arc<dyn CameraProvider>) -> Self {
        Self {
            provider,
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Idle,
                shutdown: None,
                worker: None,
            })),
            start_gate: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Starts a capture run and returns its event stream.
    ///
    /// Fails with `DeviceBusy` unless the session is Idle or Stopped, and
    /// with `DeviceUnavailable` when discovery finds no camera (in which case
    /// nothing was allocated and the session returns to Idle, unless a stop
    /// landed in the meantime).
    pub fn start(&self) -> Result<mpsc::Receiver<SessionEvent>, CaptureError> {
        // One start at a time, discovery included: a restart issued while an
        // earlier start is still inside `default_device` parks here until
        // that run has registered its worker or bailed, so a second device
        // can never be acquired while the first is still in flight.
        let _gate = match self.start_gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let stale = {
            let mut inner = self.lock();
            match inner.state {
                SessionState::Idle | SessionState::Stopped => {}
                state => return Err(CaptureError::DeviceBusy(state)),
            }
            inner.state = SessionState::Starting;
            inner.shutdown = None;
            inner.worker.take()
        };

        // Reap the previous run's thread. Its shutdown flag is already set,
        // so this blocks for at most one poll interval.
        if let Some(handle) = stale {
            let _ = handle.join();
        }

        let Some(device) = self.provider.default_device() else {
            let mut inner = self.lock();
            if inner.state == SessionState::Starting {
                inner.state = SessionState::Idle;
            }
            return Err(CaptureError::DeviceUnavailable);
        };

        let (event_tx, event_rx) = mpsc::channel();

        let mut inner = self.lock();
        if inner.state != SessionState::Starting {
            // A stop landed while discovery was in flight. The device never
            // went live; release it right here and report the run as over.
            drop(inner);
            drop(device);
            let _ = event_tx.send(SessionEvent::Stopped);
            return Ok(event_rx);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let inner_for_worker = Arc::clone(&self.inner);
        let shutdown_for_worker = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            run_worker(device, inner_for_worker, shutdown_for_worker, event_tx);
        });
        inner.shutdown = Some(shutdown);
        inner.worker = Some(handle);
        Ok(event_rx)
    }

    /// Valid only while Running; a no-op otherwise. Teardown racing a pause
    /// is expected and must be silent.
    pub fn pause(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Running {
            inner.state = SessionState::Paused;
            log::debug!("capture paused");
        }
    }

    /// Valid only while Paused; a no-op otherwise.
    pub fn resume(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Paused {
            inner.state = SessionState::Running;
            log::debug!("capture resumed");
        }
    }

    /// Idempotent; callable from any thread and any state. Never blocks on
    /// the worker: the device release happens over there, exactly once, even
    /// when stop lands mid-configuration.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state != SessionState::Stopped {
            log::info!("capture stopping (was {:?})", inner.state);
        }
        inner.state = SessionState::Stopped;
        if let Some(flag) = inner.shutdown.take() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
        let handle = self.lock().worker.take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn lock_inner(m: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn run_worker(
    mut device: Box<dyn CameraDevice>,
    inner: Arc<Mutex<Inner>>,
    shutdown: Arc<AtomicBool>,
    event_tx: mpsc::Sender<SessionEvent>,
) {
    if let Err(e) = device.configure() {
        log::error!("camera configuration failed: {e}");
        {
            let mut guard = lock_inner(&inner);
            if !shutdown.load(Ordering::Relaxed) && guard.state == SessionState::Starting {
                guard.state = SessionState::Stopped;
            }
        }
        let _ = event_tx.send(SessionEvent::Error(e));
        let _ = event_tx.send(SessionEvent::Stopped);
        return;
    }

    // Promote Starting -> Running unless a stop won the race mid-configure;
    // then the device is dropped right here without ever going live.
    {
        let mut guard = lock_inner(&inner);
        if shutdown.load(Ordering::Relaxed) || guard.state != SessionState::Starting {
            drop(guard);
            drop(device);
            let _ = event_tx.send(SessionEvent::Stopped);
            return;
        }
        guard.state = SessionState::Running;
    }
    let _ = event_tx.send(SessionEvent::Running);

    loop {
        let state = {
            let guard = lock_inner(&inner);
            guard.state
        };

        if shutdown.load(Ordering::Relaxed) || state == SessionState::Stopped {
            break;
        }

        match state {
            SessionState::Running => {
                if let Some(candidate) = device.poll_candidate(POLL_INTERVAL) {
                    // Re-check: a pause or stop may have landed while we were
                    // blocked inside the device.
                    let still_running = {
                        let guard = lock_inner(&inner);
                        !shutdown.load(Ordering::Relaxed)
                            && guard.state == SessionState::Running
                    };
                    if still_running && event_tx.send(SessionEvent::Candidate(candidate)).is_err() {
                        // Foreground went away without stopping; wind down so
                        // the device doesn't leak.
                        let mut guard = lock_inner(&inner);
                        if !shutdown.load(Ordering::Relaxed) {
                            guard.state = SessionState::Stopped;
                        }
                        break;
                    }
                }
            }
            SessionState::Paused => {
                // Keep the device drained but drop its output at the source.
                let _ = device.poll_candidate(POLL_INTERVAL);
            }
            _ => thread::sleep(POLL_INTERVAL),
        }
    }

    drop(device);
    let _ = event_tx.send(SessionEvent::Stopped);
}
