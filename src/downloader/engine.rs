// Control surface for the presentation layer: start, stop, poll
//
// One run at a time. A second start while a run is active is rejected,
// never queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::cancel::CancellationController;
use super::driver::JobDriver;
use super::errors::{DownloadError, Result};
use super::format_selector::FormatSelector;
use super::models::{DownloadRequest, JobResult, JobState, JsRuntime};
use super::traits::{MediaBackend, StatusSink};

/// What `RunHandle::current_result` reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    InProgress(JobState),
    Finished(JobResult),
}

pub struct DownloadEngine {
    backend: Arc<dyn MediaBackend>,
    sink: Arc<dyn StatusSink>,
    js_runtime: Option<JsRuntime>,
    active: Arc<AtomicBool>,
}

impl DownloadEngine {
    pub fn new(backend: Arc<dyn MediaBackend>, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            backend,
            sink,
            js_runtime: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_js_runtime(mut self, runtime: Option<JsRuntime>) -> Self {
        self.js_runtime = runtime;
        self
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Validate the request and start it on its own worker task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_run(&self, request: DownloadRequest) -> Result<RunHandle> {
        request.ensure_url()?;
        FormatSelector::select(request.media_kind(), request.quality_label())?;

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(url = request.url(), "rejected start: run already in progress");
            return Err(DownloadError::RunAlreadyInProgress);
        }
        let slot = RunSlot(Arc::clone(&self.active));

        let cancel = CancellationController::new();
        let driver = JobDriver::new(Arc::clone(&self.backend), Arc::clone(&self.sink), cancel.clone())
            .with_js_runtime(self.js_runtime.clone());
        let state = driver.subscribe();
        let finished = Arc::new(Mutex::new(None));
        let finished_in_worker = Arc::clone(&finished);

        let task = tokio::spawn(async move {
            let _slot = slot;
            let result = match driver.run(&request).await {
                Ok(result) => result,
                // Already validated above; reaching here means the request changed shape
                Err(e) => {
                    tracing::error!(error = %e, "run rejected inside worker");
                    JobResult::default()
                }
            };
            if let Ok(mut finished) = finished_in_worker.lock() {
                *finished = Some(result.clone());
            }
            result
        });

        Ok(RunHandle {
            cancel,
            state,
            finished,
            task,
        })
    }
}

/// Releases the engine's single run slot when the worker ends, panics included
struct RunSlot(Arc<AtomicBool>);

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to one started run
pub struct RunHandle {
    cancel: CancellationController,
    state: watch::Receiver<JobState>,
    finished: Arc<Mutex<Option<JobResult>>>,
    task: JoinHandle<JobResult>,
}

impl RunHandle {
    /// Cooperative stop; honored at the next unit boundary or progress callback
    pub fn request_stop(&self) {
        self.cancel.request_stop();
    }

    /// Clone of the run's stop flag, e.g. for a signal handler
    pub fn canceller(&self) -> CancellationController {
        self.cancel.clone()
    }

    pub fn current_result(&self) -> RunState {
        if let Ok(finished) = self.finished.lock() {
            if let Some(result) = finished.as_ref() {
                return RunState::Finished(result.clone());
            }
        }
        RunState::InProgress(*self.state.borrow())
    }

    pub fn state_updates(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    /// Wait for the worker and take its result
    pub async fn wait(self) -> Result<JobResult> {
        self.task.await.map_err(|e| {
            DownloadError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("download worker failed: {}", e),
            ))
        })
    }
}
