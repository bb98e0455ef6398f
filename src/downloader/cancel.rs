// Cooperative stop flag shared between the worker and the front end

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::errors::{DownloadError, Result};

/// One flag per run. Clones share the same flag; there is no reset, a new
/// run gets a new controller.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    stop: Arc<AtomicBool>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop at its next checkpoint
    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            tracing::info!("stop requested");
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// `Err(StopRequested)` once a stop has been requested
    pub fn checkpoint(&self) -> Result<()> {
        if self.should_stop() {
            return Err(DownloadError::StopRequested);
        }
        Ok(())
    }
}
