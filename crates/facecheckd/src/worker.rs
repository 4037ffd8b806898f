use crate::stop::StopSignal;
use std::thread::JoinHandle;

/// Handle to a running scan worker thread.
///
/// Dropping the handle requests a stop but does not wait for the thread.
pub struct WorkerHandle {
    session: u64,
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn `body` on a named thread with a fresh stop signal.
    pub fn spawn(
        name: &str,
        session: u64,
        body: impl FnOnce(StopSignal) + Send + 'static,
    ) -> std::io::Result<Self> {
        let stop = StopSignal::new();
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_stop))?;
        Ok(Self {
            session,
            stop,
            handle: Some(handle),
        })
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Request a stop and wait for the thread to exit.
    pub fn stop_and_join(mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(session = self.session, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}
