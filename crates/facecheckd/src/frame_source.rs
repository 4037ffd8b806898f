//! Capture loop and the latest-frame slot it publishes into.

use crate::events::{WorkerEvent, WorkerSink};
use crate::stop::StopSignal;
use facecheck_hw::{CameraDevice, CameraError, CameraOpener, Frame};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

/// Upper bound on the wait between attempts while the camera keeps failing.
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Single-slot, latest-wins handoff of immutable frames.
///
/// Publishing swaps in a new `Arc<Frame>`; readers clone the `Arc` they see,
/// so a frame is never mutated while someone holds it.
#[derive(Clone)]
pub struct FrameSlot {
    tx: Arc<watch::Sender<Option<Arc<Frame>>>>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.tx.borrow().clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    /// Nominal capture period (40ms ≈ 25 fps).
    pub interval: Duration,
    /// Report every N-th consecutive failure to the controller.
    pub fault_report_every: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(40),
            fault_report_every: 25,
        }
    }
}

struct Running {
    stop: StopSignal,
    handle: JoinHandle<()>,
}

/// Owns the capture thread. The camera handle itself only ever lives on
/// that thread and is released there.
pub struct FrameSource {
    opener: Arc<dyn CameraOpener>,
    slot: FrameSlot,
    settings: CaptureSettings,
    sink: WorkerSink,
    running: Option<Running>,
}

impl FrameSource {
    pub fn new(
        opener: Arc<dyn CameraOpener>,
        slot: FrameSlot,
        settings: CaptureSettings,
        sink: WorkerSink,
    ) -> Self {
        Self {
            opener,
            slot,
            settings,
            sink,
            running: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    /// Start capturing. Returns `false` if already running.
    pub fn start(&mut self) -> bool {
        if self.running.is_some() {
            tracing::debug!("frame source already running");
            return false;
        }

        let stop = StopSignal::new();
        let ctx = CaptureLoop {
            opener: Arc::clone(&self.opener),
            slot: self.slot.clone(),
            settings: self.settings,
            sink: self.sink.clone(),
            stop: stop.clone(),
        };

        match std::thread::Builder::new()
            .name("facecheck-capture".into())
            .spawn(move || ctx.run())
        {
            Ok(handle) => {
                self.running = Some(Running { stop, handle });
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn capture thread");
                false
            }
        }
    }

    /// Request the loop to exit and wait for it to release the camera.
    ///
    /// No-op when already stopped.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.stop.stop();
        if running.handle.join().is_err() {
            tracing::error!("capture thread panicked");
        }
        self.slot.clear();
        tracing::info!("frame source stopped");
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureLoop {
    opener: Arc<dyn CameraOpener>,
    slot: FrameSlot,
    settings: CaptureSettings,
    sink: WorkerSink,
    stop: StopSignal,
}

impl CaptureLoop {
    fn run(self) {
        tracing::info!(interval_ms = self.settings.interval.as_millis() as u64, "capture loop started");
        let mut camera: Option<Box<dyn CameraDevice>> = None;
        let mut failures: u32 = 0;

        while !self.stop.is_stopped() {
            match self.tick(&mut camera) {
                Ok(frame) => {
                    failures = 0;
                    self.slot.publish(frame);
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::debug!(error = %e, failures, "capture tick skipped");
                    if self.settings.fault_report_every > 0
                        && failures % self.settings.fault_report_every == 0
                    {
                        tracing::warn!(error = %e, failures, "camera keeps failing");
                        self.sink.emit(WorkerEvent::CaptureFault {
                            consecutive: failures,
                            error: e.to_string(),
                        });
                    }
                }
            }

            if self.stop.wait(backoff(self.settings.interval, failures)) {
                break;
            }
        }

        if let Some(device) = camera.take() {
            device.release();
        }
        tracing::info!("capture loop exited");
    }

    /// Open the camera if needed, then read one frame.
    fn tick(&self, camera: &mut Option<Box<dyn CameraDevice>>) -> Result<Frame, CameraError> {
        if camera.is_none() {
            *camera = Some(self.opener.open()?);
        }
        camera.as_mut().map_or_else(
            || Err(CameraError::DeviceUnavailable("camera not open".into())),
            |device| device.read_frame(),
        )
    }
}

/// Wait before the next tick: the nominal interval, doubled for every
/// failure beyond the first few, capped at [`MAX_BACKOFF`].
fn backoff(interval: Duration, failures: u32) -> Duration {
    const FREE_RETRIES: u32 = 3;
    let doublings = failures.saturating_sub(FREE_RETRIES).min(10);
    interval
        .saturating_mul(1u32 << doublings)
        .min(MAX_BACKOFF.max(interval))
}
