// Progress aggregation - raw backend callbacks to normalized snapshots

use super::cancel::CancellationController;
use super::errors::Result;
use super::models::{Phase, ProgressSnapshot, RawProgressEvent, RawStatus};

/// Which unit a callback belongs to. Built fresh for each unit so nothing
/// from a previous iteration leaks into the next one's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitContext {
    pub unit_index: usize,
    pub total_units: usize,
}

impl UnitContext {
    pub fn new(unit_index: usize, total_units: usize) -> Self {
        Self {
            unit_index,
            total_units,
        }
    }

    /// "[2/5]" style counter, 1-based
    pub fn counter(&self) -> String {
        format!("[{}/{}]", self.unit_index + 1, self.total_units)
    }
}

pub struct ProgressAggregator;

impl ProgressAggregator {
    /// Normalize one raw event.
    ///
    /// This is where a stop takes effect during an active fetch: once the
    /// flag is set every event returns `StopRequested`, which the backend
    /// must propagate out of its fetch call.
    pub fn normalize(
        event: &RawProgressEvent,
        ctx: UnitContext,
        cancel: &CancellationController,
    ) -> Result<ProgressSnapshot> {
        cancel.checkpoint()?;

        let (phase, fraction_complete) = match event.status {
            RawStatus::Downloading => (Phase::Downloading, Self::fraction(event)),
            RawStatus::Finished | RawStatus::PostProcessing => (Phase::PostProcessing, 1.0),
            RawStatus::PostProcessed => (Phase::Finished, 1.0),
        };

        Ok(ProgressSnapshot {
            unit_index: ctx.unit_index,
            phase,
            fraction_complete,
            bytes_per_second: event.speed,
        })
    }

    fn fraction(event: &RawProgressEvent) -> f64 {
        match event.total_bytes.or(event.total_bytes_estimate) {
            Some(total) if total > 0 => {
                (event.downloaded_bytes as f64 / total as f64).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }
}

/// Format bytes into human readable size
pub fn format_file_size(size_bytes: f64) -> String {
    let mut size = size_bytes;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}
