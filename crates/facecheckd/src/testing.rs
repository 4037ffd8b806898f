//! Mock camera and analyzer shared by the daemon's unit tests.

use facecheck_core::{
    BoundingBox, Descriptor, EngineError, FaceAnalyzer, FaceDescription, MatchingEngine,
    DESCRIPTOR_LEN,
};
use facecheck_hw::{CameraDevice, CameraError, CameraOpener, Frame, PixelLayout};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const FRAME_SIZE: u32 = 400;

/// Blank square frame; square frames need no display offset.
pub fn gray_frame(sequence: u32) -> Frame {
    let len = (FRAME_SIZE * FRAME_SIZE) as usize;
    Frame::new(vec![128; len], FRAME_SIZE, FRAME_SIZE, PixelLayout::Gray, sequence).unwrap()
}

pub fn descriptor(value: f32) -> Descriptor {
    Descriptor::new(vec![value; DESCRIPTOR_LEN]).unwrap()
}

fn face(x: f32, y: f32, size: f32) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width: size,
        height: size,
        confidence: 0.9,
        landmarks: None,
    }
}

/// Well inside the default guide circle.
pub fn centered_face() -> BoundingBox {
    face(150.0, 150.0, 100.0)
}

/// Top-left corner sits outside the default guide circle.
pub fn off_center_face() -> BoundingBox {
    face(0.0, 0.0, 80.0)
}

#[derive(Default)]
struct CameraState {
    opens: AtomicUsize,
    releases: AtomicUsize,
    reads: AtomicUsize,
    live: AtomicUsize,
    failing_opens: AtomicU32,
    failing_reads: AtomicBool,
    release_thread: Mutex<Option<String>>,
}

/// Camera opener that counts every open, read and release.
#[derive(Clone, Default)]
pub struct MockOpener {
    state: Arc<CameraState>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open attempts, failed ones included.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// Handles opened and not yet released.
    pub fn live_handles(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Name of the thread that performed the most recent release.
    pub fn release_thread_name(&self) -> Option<String> {
        self.state.release_thread.lock().unwrap().clone()
    }

    pub fn fail_next_opens(&self, count: u32) {
        self.state.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.failing_reads.store(fail, Ordering::SeqCst);
    }
}

impl CameraOpener for MockOpener {
    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .state
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CameraError::DeviceUnavailable("mock device busy".into()));
        }
        self.state.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockCamera {
            state: Arc::clone(&self.state),
            sequence: 0,
        }))
    }
}

struct MockCamera {
    state: Arc<CameraState>,
    sequence: u32,
}

impl CameraDevice for MockCamera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        if self.state.failing_reads.load(Ordering::SeqCst) {
            return Err(CameraError::NoFrame("mock read failure".into()));
        }
        self.sequence = self.sequence.wrapping_add(1);
        Ok(gray_frame(self.sequence))
    }

    fn release(self: Box<Self>) {
        self.state.releases.fetch_add(1, Ordering::SeqCst);
        self.state.live.fetch_sub(1, Ordering::SeqCst);
        *self.state.release_thread.lock().unwrap() =
            std::thread::current().name().map(str::to_string);
    }
}

struct AnalyzerState {
    faces: Vec<BoundingBox>,
    descriptor: Descriptor,
    fail: bool,
}

/// Analyzer returning scripted faces and a fixed descriptor.
///
/// Clones share their script and counters, so a test can keep one clone and
/// hand another to the engine.
#[derive(Clone)]
pub struct MockAnalyzer {
    state: Arc<Mutex<AnalyzerState>>,
    detect_calls: Arc<AtomicUsize>,
    describe_calls: Arc<AtomicUsize>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AnalyzerState {
                faces: Vec::new(),
                descriptor: descriptor(0.1),
                fail: false,
            })),
            detect_calls: Arc::new(AtomicUsize::new(0)),
            describe_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn engine(&self) -> MatchingEngine {
        MatchingEngine::new(Box::new(self.clone()))
    }

    pub fn set_faces(&self, faces: Vec<BoundingBox>) {
        self.state.lock().unwrap().faces = faces;
    }

    pub fn set_descriptor(&self, descriptor: Descriptor) {
        self.state.lock().unwrap().descriptor = descriptor;
    }

    pub fn descriptor(&self) -> Descriptor {
        self.state.lock().unwrap().descriptor.clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }
}

impl FaceAnalyzer for MockAnalyzer {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, EngineError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.fail {
            return Err(EngineError::Analyzer("mock inference failure".into()));
        }
        Ok(state.faces.clone())
    }

    fn describe(&mut self, _frame: &Frame, face: &BoundingBox) -> Result<FaceDescription, EngineError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(FaceDescription {
            landmarks: face
                .landmarks
                .map(|points| points.to_vec())
                .unwrap_or_default(),
            descriptor: state.descriptor.clone(),
        })
    }
}
