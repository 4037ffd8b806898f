use crate::controller::{ControllerError, ControllerHandle};
use crate::events::{Mode, UiEvent};
use tokio::sync::broadcast;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.facecheck.Attendance1";
pub const OBJECT_PATH: &str = "/org/facecheck/Attendance1";

/// D-Bus interface for the facecheck attendance daemon.
///
/// Bus name: org.facecheck.Attendance1
/// Object path: /org/facecheck/Attendance1
pub struct AttendanceService {
    controller: ControllerHandle,
}

impl AttendanceService {
    pub fn new(controller: ControllerHandle) -> Self {
        Self { controller }
    }
}

fn to_fdo(e: ControllerError) -> zbus::fdo::Error {
    match e {
        ControllerError::CameraInactive
        | ControllerError::ModeBusy { .. }
        | ControllerError::NoPendingEnrollment => zbus::fdo::Error::Failed(e.to_string()),
        ControllerError::Store(facecheck_core::StoreError::InvalidName(_)) => {
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        other => {
            tracing::error!(error = %other, "controller request failed");
            zbus::fdo::Error::Failed(other.to_string())
        }
    }
}

#[interface(name = "org.facecheck.Attendance1")]
impl AttendanceService {
    /// Open the camera if closed, otherwise close it. Returns whether it is now open.
    async fn toggle_camera(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("toggle_camera requested");
        self.controller.toggle_camera().await.map_err(to_fdo)
    }

    async fn enter_register_mode(&self) -> zbus::fdo::Result<String> {
        tracing::info!("enter_register_mode requested");
        self.set_mode(Mode::Register).await
    }

    async fn enter_check_mode(&self) -> zbus::fdo::Result<String> {
        tracing::info!("enter_check_mode requested");
        self.set_mode(Mode::Check).await
    }

    async fn return_to_idle(&self) -> zbus::fdo::Result<String> {
        tracing::info!("return_to_idle requested");
        self.set_mode(Mode::Idle).await
    }

    /// Name the pending enrollment. Returns the assigned identifier.
    async fn submit_name(&self, name: &str) -> zbus::fdo::Result<u32> {
        tracing::info!(name, "submit_name requested");
        self.controller
            .submit_name(name.to_string())
            .await
            .map_err(to_fdo)
    }

    async fn cancel_enrollment(&self) -> zbus::fdo::Result<bool> {
        self.controller.cancel_enrollment().await.map_err(to_fdo)
    }

    /// Current mode, camera state and status text as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let report = self.controller.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "mode": report.mode,
            "camera_active": report.camera_active,
            "pending_enrollment": report.pending_enrollment,
            "status": report.status,
            "enrolled": report.enrolled,
        })
        .to_string())
    }

    /// Enrolled identities as a JSON array of `{identifier, name}`.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self.controller.identities().await.map_err(to_fdo)?;
        serde_json::to_string(&identities).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    #[zbus(signal)]
    async fn status_message(emitter: &SignalEmitter<'_>, text: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn mode_changed(emitter: &SignalEmitter<'_>, mode: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn enrollment_prompt(emitter: &SignalEmitter<'_>, descriptor: Vec<f64>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn attendance_logged(
        emitter: &SignalEmitter<'_>,
        identifier: u32,
        name: &str,
    ) -> zbus::Result<()>;
}

impl AttendanceService {
    async fn set_mode(&self, mode: Mode) -> zbus::fdo::Result<String> {
        self.controller
            .set_mode(mode)
            .await
            .map(|mode| mode.to_string())
            .map_err(to_fdo)
    }
}

/// Re-publish controller UI events as D-Bus signals until the channel closes.
pub async fn forward_events(
    connection: zbus::Connection,
    mut events: broadcast::Receiver<UiEvent>,
) -> zbus::Result<()> {
    let emitter = SignalEmitter::new(&connection, OBJECT_PATH)?;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "signal forwarder lagged; events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        };

        let sent = match &event {
            UiEvent::StatusMessage(text) => AttendanceService::status_message(&emitter, text).await,
            UiEvent::ModeChanged(mode) => {
                AttendanceService::mode_changed(&emitter, &mode.to_string()).await
            }
            UiEvent::EnrollmentPrompt(descriptor) => {
                let values = descriptor.values().iter().map(|&v| f64::from(v)).collect();
                AttendanceService::enrollment_prompt(&emitter, values).await
            }
            UiEvent::AttendanceLogged { identifier, name } => {
                AttendanceService::attendance_logged(&emitter, *identifier, name).await
            }
        };
        if let Err(e) = sent {
            tracing::warn!(error = %e, ?event, "failed to emit signal");
        }
    }
}
