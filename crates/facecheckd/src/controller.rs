//! Mode controller: owns the frame source and the active scan worker, and
//! turns requests and worker events into UI events.
//!
//! All state lives on one dedicated thread. Requests arrive with a oneshot
//! reply channel on the same queue as worker events, so every transition is
//! applied in arrival order.

use crate::check::CheckWorker;
use crate::events::{ControlMessage, Mode, UiEvent, WorkerEvent, WorkerSink};
use crate::frame_source::{CaptureSettings, FrameSlot, FrameSource};
use crate::register::RegisterWorker;
use crate::worker::WorkerHandle;
use facecheck_core::{
    AttendanceLog, Descriptor, DescriptorStore, GuideCircle, Identity, MatchingEngine, StoreError,
};
use facecheck_hw::CameraOpener;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Session tag carried by capture loop events.
const CAPTURE_SESSION: u64 = 0;

/// Buffered UI events per subscriber before it starts lagging.
const UI_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("camera is not open")]
    CameraInactive,
    #[error("{active} mode is active; return to idle before entering {requested} mode")]
    ModeBusy { active: Mode, requested: Mode },
    #[error("no enrollment is waiting for a name")]
    NoPendingEnrollment,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("controller thread exited")]
    ChannelClosed,
}

/// What a mode request does to the running worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Stay,
    StopWorker,
    Start(Mode),
}

/// Mode state machine. Pure; the controller applies the returned step.
pub fn transition(current: Mode, requested: Mode, camera_active: bool) -> Result<Step, ControllerError> {
    if current == requested {
        return Ok(Step::Stay);
    }
    match (current, requested) {
        (_, Mode::Idle) => Ok(Step::StopWorker),
        (Mode::Idle, _) if !camera_active => Err(ControllerError::CameraInactive),
        (Mode::Idle, next) => Ok(Step::Start(next)),
        (active, requested) => Err(ControllerError::ModeBusy { active, requested }),
    }
}

/// Snapshot returned by the `Status` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub mode: Mode,
    pub camera_active: bool,
    pub pending_enrollment: bool,
    pub status: String,
    pub enrolled: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub capture: CaptureSettings,
    pub scan_interval: Duration,
    pub check_cooldown: Duration,
    pub guide: GuideCircle,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            scan_interval: Duration::from_millis(500),
            check_cooldown: Duration::from_secs(2),
            guide: GuideCircle::default(),
        }
    }
}

/// Everything the controller thread takes ownership of.
pub struct ControllerDeps {
    pub opener: Arc<dyn CameraOpener>,
    pub store: Arc<DescriptorStore>,
    pub log: AttendanceLog,
    pub register_engine: MatchingEngine,
    pub check_engine: MatchingEngine,
    pub settings: ControllerSettings,
}

/// Requests handled on the controller thread.
pub enum Request {
    ToggleCamera {
        reply: oneshot::Sender<bool>,
    },
    SetMode {
        mode: Mode,
        reply: oneshot::Sender<Result<Mode, ControllerError>>,
    },
    SubmitName {
        name: String,
        reply: oneshot::Sender<Result<u32, ControllerError>>,
    },
    CancelEnrollment {
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    Identities {
        reply: oneshot::Sender<Vec<Identity>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the controller thread.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControlMessage>,
    ui: broadcast::Sender<UiEvent>,
}

impl ControllerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.ui.subscribe()
    }

    /// Open the camera if closed, close it if open. Returns the new state.
    pub async fn toggle_camera(&self) -> Result<bool, ControllerError> {
        self.request(|reply| Request::ToggleCamera { reply }).await
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<Mode, ControllerError> {
        self.request(|reply| Request::SetMode { mode, reply }).await?
    }

    /// Commit the pending enrollment under `name`. Returns the new identifier.
    pub async fn submit_name(&self, name: String) -> Result<u32, ControllerError> {
        self.request(|reply| Request::SubmitName { name, reply }).await?
    }

    /// Discard the pending enrollment. Returns `false` if there was none.
    pub async fn cancel_enrollment(&self) -> Result<bool, ControllerError> {
        self.request(|reply| Request::CancelEnrollment { reply }).await
    }

    pub async fn status(&self) -> Result<StatusReport, ControllerError> {
        self.request(|reply| Request::Status { reply }).await
    }

    pub async fn identities(&self) -> Result<Vec<Identity>, ControllerError> {
        self.request(|reply| Request::Identities { reply }).await
    }

    /// Stop the worker and the camera, then end the controller thread.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        self.request(|reply| Request::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, ControllerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControlMessage::Request(build(reply_tx)))
            .map_err(|_| ControllerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ControllerError::ChannelClosed)
    }
}

/// Spawn the controller on a dedicated OS thread.
pub fn spawn_controller(deps: ControllerDeps) -> std::io::Result<ControllerHandle> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ControlMessage>();
    let (ui, _) = broadcast::channel(UI_CHANNEL_CAPACITY);
    let mut controller = Controller::new(deps, tx.clone(), ui.clone());

    std::thread::Builder::new()
        .name("facecheck-controller".into())
        .spawn(move || {
            tracing::info!("controller thread started");
            while let Some(message) = rx.blocking_recv() {
                match message {
                    ControlMessage::Request(request) => {
                        if !controller.handle_request(request) {
                            break;
                        }
                    }
                    ControlMessage::Worker { session, event } => {
                        controller.on_worker_event(session, event);
                    }
                }
            }
            controller.shutdown();
            tracing::info!("controller thread exiting");
        })?;

    Ok(ControllerHandle { tx, ui })
}

struct Controller {
    mode: Mode,
    frame_source: FrameSource,
    slot: FrameSlot,
    store: Arc<DescriptorStore>,
    log: AttendanceLog,
    register_engine: MatchingEngine,
    check_engine: MatchingEngine,
    settings: ControllerSettings,
    worker: Option<WorkerHandle>,
    next_session: u64,
    pending_enrollment: Option<Descriptor>,
    status_text: String,
    tx: mpsc::UnboundedSender<ControlMessage>,
    ui: broadcast::Sender<UiEvent>,
}

impl Controller {
    fn new(
        deps: ControllerDeps,
        tx: mpsc::UnboundedSender<ControlMessage>,
        ui: broadcast::Sender<UiEvent>,
    ) -> Self {
        let slot = FrameSlot::new();
        let frame_source = FrameSource::new(
            deps.opener,
            slot.clone(),
            deps.settings.capture,
            WorkerSink::new(CAPTURE_SESSION, tx.clone()),
        );
        Self {
            mode: Mode::Idle,
            frame_source,
            slot,
            store: deps.store,
            log: deps.log,
            register_engine: deps.register_engine,
            check_engine: deps.check_engine,
            settings: deps.settings,
            worker: None,
            next_session: CAPTURE_SESSION + 1,
            pending_enrollment: None,
            status_text: String::new(),
            tx,
            ui,
        }
    }

    /// Returns `false` once the loop should exit.
    fn handle_request(&mut self, request: Request) -> bool {
        match request {
            Request::ToggleCamera { reply } => {
                let _ = reply.send(self.toggle_camera());
            }
            Request::SetMode { mode, reply } => {
                let _ = reply.send(self.set_mode(mode));
            }
            Request::SubmitName { name, reply } => {
                let _ = reply.send(self.submit_name(&name));
            }
            Request::CancelEnrollment { reply } => {
                let _ = reply.send(self.cancel_enrollment());
            }
            Request::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Request::Identities { reply } => {
                let _ = reply.send(self.store.identities());
            }
            Request::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn toggle_camera(&mut self) -> bool {
        if self.frame_source.is_active() {
            self.stop_worker();
            self.enter(Mode::Idle);
            self.frame_source.stop();
            tracing::info!("camera closed");
            self.set_status("Camera closed");
            false
        } else {
            if !self.frame_source.start() {
                self.set_status("Failed to open camera");
                return false;
            }
            tracing::info!("camera opened");
            self.set_status("Camera opened");
            true
        }
    }

    fn set_mode(&mut self, requested: Mode) -> Result<Mode, ControllerError> {
        let step = match transition(self.mode, requested, self.frame_source.is_active()) {
            Ok(step) => step,
            Err(e) => {
                tracing::info!(current = %self.mode, %requested, error = %e, "mode change rejected");
                if matches!(e, ControllerError::CameraInactive) {
                    self.set_status("Please open the camera");
                }
                return Err(e);
            }
        };

        match step {
            Step::Stay => {}
            Step::StopWorker => {
                self.stop_worker();
                self.enter(Mode::Idle);
                self.set_status("");
            }
            Step::Start(mode) => {
                self.start_worker(mode)?;
                self.enter(mode);
                self.set_status(match mode {
                    Mode::Register => "Register mode enabled",
                    _ => "Check mode enabled",
                });
            }
        }
        Ok(self.mode)
    }

    fn start_worker(&mut self, mode: Mode) -> Result<(), ControllerError> {
        let session = self.next_session;
        self.next_session += 1;
        let sink = WorkerSink::new(session, self.tx.clone());

        let handle = match mode {
            Mode::Register => RegisterWorker {
                slot: self.slot.clone(),
                engine: self.register_engine.clone(),
                guide: self.settings.guide,
                interval: self.settings.scan_interval,
                sink,
            }
            .spawn()?,
            Mode::Check => CheckWorker {
                slot: self.slot.clone(),
                engine: self.check_engine.clone(),
                store: Arc::clone(&self.store),
                interval: self.settings.scan_interval,
                cooldown: self.settings.check_cooldown,
                sink,
            }
            .spawn()?,
            Mode::Idle => return Ok(()),
        };

        tracing::info!(session, %mode, "worker started");
        self.worker = Some(handle);
        Ok(())
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let session = worker.session();
            worker.stop_and_join();
            tracing::info!(session, "worker stopped");
        }
    }

    fn enter(&mut self, mode: Mode) {
        if self.mode != mode {
            tracing::info!(from = %self.mode, to = %mode, "mode changed");
            self.mode = mode;
            self.emit(UiEvent::ModeChanged(mode));
        }
    }

    fn on_worker_event(&mut self, session: u64, event: WorkerEvent) {
        if let WorkerEvent::CaptureFault { consecutive, error } = event {
            if session == CAPTURE_SESSION && self.frame_source.is_active() {
                tracing::warn!(consecutive, %error, "camera fault reported");
                self.set_status(&format!("Camera unavailable: {error}"));
            }
            return;
        }

        let current = self.worker.as_ref().map(WorkerHandle::session);
        if current != Some(session) {
            tracing::debug!(session, ?current, "dropping event from stale worker");
            return;
        }

        match event {
            WorkerEvent::RegisterStatus(status) if self.mode == Mode::Register => {
                self.set_status(status.message());
            }
            WorkerEvent::EnrollmentReady(descriptor) if self.mode == Mode::Register => {
                self.stop_worker();
                self.enter(Mode::Idle);
                if self.pending_enrollment.is_some() {
                    tracing::warn!("replacing an enrollment that was never named");
                }
                self.pending_enrollment = Some(descriptor.clone());
                self.emit(UiEvent::EnrollmentPrompt(descriptor));
            }
            WorkerEvent::Matched { identifier, name } if self.mode == Mode::Check => {
                self.record_attendance(identifier, name);
            }
            other => {
                tracing::debug!(mode = %self.mode, event = ?other, "event does not apply to current mode");
            }
        }
    }

    fn record_attendance(&mut self, identifier: u32, name: String) {
        match self.log.append(identifier, &name) {
            Ok(record) => {
                tracing::info!(identifier, name = %name, timestamp = %record.timestamp, "attendance recorded");
                self.set_status(&format!("id: {identifier} name: {name} checked"));
                self.emit(UiEvent::AttendanceLogged { identifier, name });
            }
            Err(e) => {
                tracing::error!(identifier, error = %e, "failed to record attendance");
                self.set_status(&format!("Failed to record attendance: {e}"));
            }
        }
    }

    fn submit_name(&mut self, name: &str) -> Result<u32, ControllerError> {
        let descriptor = self
            .pending_enrollment
            .take()
            .ok_or(ControllerError::NoPendingEnrollment)?;

        match self.store.enroll(name.trim(), descriptor.clone()) {
            Ok(record) => {
                self.set_status(&format!("id: {} name: {} registered", record.identifier, record.name));
                Ok(record.identifier)
            }
            Err(e) => {
                tracing::warn!(error = %e, "enrollment rejected");
                self.pending_enrollment = Some(descriptor);
                Err(e.into())
            }
        }
    }

    fn cancel_enrollment(&mut self) -> bool {
        let had = self.pending_enrollment.take().is_some();
        if had {
            tracing::info!("pending enrollment discarded");
        }
        had
    }

    fn status(&self) -> StatusReport {
        StatusReport {
            mode: self.mode,
            camera_active: self.frame_source.is_active(),
            pending_enrollment: self.pending_enrollment.is_some(),
            status: self.status_text.clone(),
            enrolled: self.store.len(),
        }
    }

    fn shutdown(&mut self) {
        self.stop_worker();
        self.frame_source.stop();
        self.mode = Mode::Idle;
    }

    fn set_status(&mut self, text: &str) {
        self.status_text = text.to_string();
        self.emit(UiEvent::StatusMessage(self.status_text.clone()));
    }

    fn emit(&self, event: UiEvent) {
        // No subscribers is not an error.
        let _ = self.ui.send(event);
    }
}
