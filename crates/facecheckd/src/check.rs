//! Check worker: matches a single face against the store and reports
//! attendance, then cools down.

use crate::events::{WorkerEvent, WorkerSink};
use crate::frame_source::FrameSlot;
use crate::stop::StopSignal;
use crate::worker::WorkerHandle;
use facecheck_core::{DescriptorStore, MatchResult, MatchingEngine, Recognition};
use facecheck_hw::Frame;
use std::sync::Arc;
use std::time::Duration;

pub struct CheckWorker {
    pub slot: FrameSlot,
    pub engine: MatchingEngine,
    pub store: Arc<DescriptorStore>,
    pub interval: Duration,
    pub cooldown: Duration,
    pub sink: WorkerSink,
}

impl CheckWorker {
    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        let session = self.sink.session();
        WorkerHandle::spawn("facecheck-check", session, move |stop| self.run(stop))
    }

    fn run(self, stop: StopSignal) {
        tracing::info!(session = self.sink.session(), "check worker started");

        while !stop.is_stopped() {
            let pause = match self.slot.latest().and_then(|frame| self.scan(&frame)) {
                Some(found) => {
                    tracing::info!(
                        identifier = found.identifier,
                        name = %found.name,
                        distance = found.distance,
                        "identity matched"
                    );
                    self.sink.emit(WorkerEvent::Matched {
                        identifier: found.identifier,
                        name: found.name,
                    });
                    pause_after(true, self.interval, self.cooldown)
                }
                None => pause_after(false, self.interval, self.cooldown),
            };

            if stop.wait(pause) {
                break;
            }
        }

        tracing::info!("check worker stopped");
    }

    /// A match within threshold for the single face in `frame`, if any.
    fn scan(&self, frame: &Frame) -> Option<MatchResult> {
        let descriptor = match self.engine.recognize(frame) {
            Ok(Recognition::OneFace { descriptor, .. }) => descriptor,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "check scan failed");
                return None;
            }
        };

        let result = self.store.nearest_match(&descriptor)?;
        tracing::debug!(distance = result.distance, matched = result.matched, "nearest match");
        result.matched.then_some(result)
    }
}

/// Delay before the next scan. A match adds the cool-down on top of the
/// regular cadence.
fn pause_after(matched: bool, interval: Duration, cooldown: Duration) -> Duration {
    if matched {
        cooldown + interval
    } else {
        interval
    }
}
