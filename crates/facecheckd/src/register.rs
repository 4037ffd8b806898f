//! Register worker: waits for a single face inside the guide circle, hands
//! its descriptor to the controller and stops.

use crate::events::{RegisterStatus, WorkerEvent, WorkerSink};
use crate::frame_source::FrameSlot;
use crate::stop::StopSignal;
use crate::worker::WorkerHandle;
use facecheck_core::{Descriptor, GuideCircle, MatchingEngine, Recognition};
use facecheck_hw::Frame;
use std::time::Duration;

pub struct RegisterWorker {
    pub slot: FrameSlot,
    pub engine: MatchingEngine,
    pub guide: GuideCircle,
    pub interval: Duration,
    pub sink: WorkerSink,
}

impl RegisterWorker {
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let session = self.sink.session();
        WorkerHandle::spawn("facecheck-register", session, move |stop| self.run(stop))
    }

    fn run(self, stop: StopSignal) {
        tracing::info!(session = self.sink.session(), "register worker started");

        while !stop.is_stopped() {
            if let Some(frame) = self.slot.latest() {
                match self.engine.recognize(&frame) {
                    Ok(recognition) => {
                        let (status, descriptor) = evaluate(recognition, &self.guide, &frame);
                        tracing::debug!(?status, sequence = frame.sequence, "register scan");
                        self.sink.emit(WorkerEvent::RegisterStatus(status));
                        if let Some(descriptor) = descriptor {
                            self.sink.emit(WorkerEvent::EnrollmentReady(descriptor));
                            tracing::info!("face captured for enrollment; register worker halting");
                            return;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "register scan failed"),
                }
            }

            if stop.wait(self.interval) {
                break;
            }
        }

        tracing::info!("register worker stopped");
    }
}

/// Classify one recognition result. A descriptor is returned only for a
/// single face that sits inside the guide.
pub fn evaluate(
    recognition: Recognition,
    guide: &GuideCircle,
    frame: &Frame,
) -> (RegisterStatus, Option<Descriptor>) {
    match recognition {
        Recognition::NoFace => (RegisterStatus::NoFace, None),
        Recognition::MultipleFaces => (RegisterStatus::MultipleFaces, None),
        Recognition::OneFace {
            region, descriptor, ..
        } => {
            if guide.encloses(&region, frame.width, frame.height) {
                (RegisterStatus::FaceDetected, Some(descriptor))
            } else {
                (RegisterStatus::FaceOutOfGuide, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ControlMessage;
    use crate::testing::{centered_face, descriptor, gray_frame, off_center_face, MockAnalyzer};
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn register_worker(
        analyzer: &MockAnalyzer,
        slot: &FrameSlot,
    ) -> (RegisterWorker, mpsc::UnboundedReceiver<ControlMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = RegisterWorker {
            slot: slot.clone(),
            engine: analyzer.engine(),
            guide: GuideCircle::default(),
            interval: Duration::from_millis(5),
            sink: WorkerSink::new(7, tx),
        };
        (worker, rx)
    }

    fn collect_for(
        rx: &mut mpsc::UnboundedReceiver<ControlMessage>,
        window: Duration,
    ) -> Vec<WorkerEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        while Instant::now() < deadline {
            while let Ok(message) = rx.try_recv() {
                if let ControlMessage::Worker { session, event } = message {
                    assert_eq!(session, 7);
                    events.push(event);
                }
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        events
    }

    #[test]
    fn test_evaluate_statuses() {
        let guide = GuideCircle::default();
        let frame = gray_frame(0);

        let (status, d) = evaluate(Recognition::NoFace, &guide, &frame);
        assert_eq!((status, d), (RegisterStatus::NoFace, None));

        let (status, d) = evaluate(Recognition::MultipleFaces, &guide, &frame);
        assert_eq!((status, d), (RegisterStatus::MultipleFaces, None));

        let one = |region| Recognition::OneFace {
            region,
            landmarks: Vec::new(),
            descriptor: descriptor(0.1),
        };
        let (status, d) = evaluate(one(centered_face()), &guide, &frame);
        assert_eq!(status, RegisterStatus::FaceDetected);
        assert_eq!(d, Some(descriptor(0.1)));

        let (status, d) = evaluate(one(off_center_face()), &guide, &frame);
        assert_eq!((status, d), (RegisterStatus::FaceOutOfGuide, None));
    }

    #[test]
    fn test_enrolls_once_then_halts() {
        let analyzer = MockAnalyzer::new();
        analyzer.set_faces(vec![centered_face()]);
        let slot = FrameSlot::new();
        slot.publish(gray_frame(1));

        let (worker, mut rx) = register_worker(&analyzer, &slot);
        let handle = worker.spawn().unwrap();
        let events = collect_for(&mut rx, Duration::from_millis(150));

        assert!(handle.is_finished(), "worker halts itself after enrollment");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], WorkerEvent::RegisterStatus(RegisterStatus::FaceDetected)));
        assert!(matches!(&events[1], WorkerEvent::EnrollmentReady(d) if *d == analyzer.descriptor()));
    }

    #[test]
    fn test_multiple_faces_keep_polling() {
        let analyzer = MockAnalyzer::new();
        analyzer.set_faces(vec![centered_face(), off_center_face()]);
        let slot = FrameSlot::new();
        slot.publish(gray_frame(1));

        let (worker, mut rx) = register_worker(&analyzer, &slot);
        let handle = worker.spawn().unwrap();
        let events = collect_for(&mut rx, Duration::from_millis(100));

        assert!(!handle.is_finished(), "worker keeps polling");
        assert!(events.len() >= 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, WorkerEvent::RegisterStatus(RegisterStatus::MultipleFaces))));
        handle.stop_and_join();
    }

    #[test]
    fn test_out_of_guide_then_centered() {
        let analyzer = MockAnalyzer::new();
        analyzer.set_faces(vec![off_center_face()]);
        let slot = FrameSlot::new();
        slot.publish(gray_frame(1));

        let (worker, mut rx) = register_worker(&analyzer, &slot);
        let handle = worker.spawn().unwrap();
        let before = collect_for(&mut rx, Duration::from_millis(50));
        assert!(before
            .iter()
            .all(|e| matches!(e, WorkerEvent::RegisterStatus(RegisterStatus::FaceOutOfGuide))));

        analyzer.set_faces(vec![centered_face()]);
        let after = collect_for(&mut rx, Duration::from_millis(100));
        assert!(after.iter().any(|e| matches!(e, WorkerEvent::EnrollmentReady(_))));
        assert!(handle.is_finished());
    }

    #[test]
    fn test_analyzer_failure_skips_scan() {
        let analyzer = MockAnalyzer::new();
        analyzer.set_failing(true);
        let slot = FrameSlot::new();
        slot.publish(gray_frame(1));

        let (worker, mut rx) = register_worker(&analyzer, &slot);
        let handle = worker.spawn().unwrap();
        assert!(collect_for(&mut rx, Duration::from_millis(40)).is_empty());
        assert!(analyzer.detect_calls() > 1, "worker keeps polling after a failure");
        handle.stop_and_join();
    }

    #[test]
    fn test_idle_without_frames() {
        let analyzer = MockAnalyzer::new();
        let slot = FrameSlot::new();
        let (worker, mut rx) = register_worker(&analyzer, &slot);
        let handle = worker.spawn().unwrap();
        assert!(collect_for(&mut rx, Duration::from_millis(40)).is_empty());
        assert_eq!(analyzer.detect_calls(), 0);
        handle.stop_and_join();
    }
}
