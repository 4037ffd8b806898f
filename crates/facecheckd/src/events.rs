//! Messages flowing between the loops, the controller and the UI boundary.

use facecheck_core::Descriptor;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Camera mode. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Register,
    Check,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Idle => "idle",
            Mode::Register => "register",
            Mode::Check => "check",
        })
    }
}

/// Per-scan outcome of the register worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterStatus {
    NoFace,
    FaceDetected,
    MultipleFaces,
    FaceOutOfGuide,
}

impl RegisterStatus {
    pub fn message(self) -> &'static str {
        match self {
            RegisterStatus::NoFace => "No face",
            RegisterStatus::FaceDetected => "Face recognised successfully",
            RegisterStatus::MultipleFaces => "Multiple faces",
            RegisterStatus::FaceOutOfGuide => "Please place your face within the circle",
        }
    }
}

/// Emitted by the capture loop and the scan workers.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    RegisterStatus(RegisterStatus),
    EnrollmentReady(Descriptor),
    Matched { identifier: u32, name: String },
    CaptureFault { consecutive: u32, error: String },
}

/// Produced by the controller for whatever front end is attached.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    StatusMessage(String),
    ModeChanged(Mode),
    /// A face was captured for enrollment; a name is needed to commit it.
    EnrollmentPrompt(Descriptor),
    AttendanceLogged { identifier: u32, name: String },
}

/// Everything the controller loop receives.
pub enum ControlMessage {
    Request(crate::controller::Request),
    Worker { session: u64, event: WorkerEvent },
}

/// Sending half handed to a loop, tagged with the session that spawned it.
#[derive(Clone)]
pub struct WorkerSink {
    session: u64,
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl WorkerSink {
    pub fn new(session: u64, tx: mpsc::UnboundedSender<ControlMessage>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Returns `false` once the controller is gone.
    pub fn emit(&self, event: WorkerEvent) -> bool {
        self.tx
            .send(ControlMessage::Worker {
                session: self.session,
                event,
            })
            .is_ok()
    }
}
