//! Run an orchestrator on a background thread.
//!
//! Pollers observe the run only through the [`RunMonitor`]. A stop request is
//! honored at the next checkpoint, so after `request_stop` the thread exits
//! within one backend step.

use std::io;
use std::thread::{self, JoinHandle};

use crate::schema::FinalResult;

use super::backend::SearchBackend;
use super::diary::CallCounter;
use super::monitor::RunMonitor;
use super::orchestrator::{Orchestrator, RunError};

/// Thread name used for background runs.
pub const RUNNER_THREAD_NAME: &str = "orchestrator";

/// Handle on a run executing on its own thread.
#[derive(Debug)]
pub struct RunHandle {
    monitor: RunMonitor,
    thread: JoinHandle<Result<FinalResult, RunError>>,
}

impl RunHandle {
    pub fn monitor(&self) -> &RunMonitor {
        &self.monitor
    }

    /// Ask the run to stop at its next checkpoint.
    pub fn request_stop(&self) {
        self.monitor.request_stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run. A panic on the run thread is resumed on the caller.
    pub fn join(self) -> Result<FinalResult, RunError> {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Start `orchestrator` on a named thread.
pub fn spawn<B, C>(mut orchestrator: Orchestrator<B, C>) -> io::Result<RunHandle>
where
    B: SearchBackend + Send + 'static,
    C: CallCounter + Send + 'static,
{
    let monitor = orchestrator.monitor();
    let thread = thread::Builder::new()
        .name(RUNNER_THREAD_NAME.to_owned())
        .spawn(move || orchestrator.run())?;
    Ok(RunHandle { monitor, thread })
}
