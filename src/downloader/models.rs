// Common data models for the download engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::errors::{DownloadError, Result};

/// What the user wants out of the URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Inputs for one run. Fields are private so a started run cannot be altered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    url: String,
    destination_dir: PathBuf,
    media_kind: MediaKind,
    quality_label: String,
}

impl DownloadRequest {
    /// The URL is trimmed here; emptiness is checked when the run starts.
    pub fn new(
        url: impl Into<String>,
        destination_dir: impl Into<PathBuf>,
        media_kind: MediaKind,
        quality_label: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into().trim().to_string(),
            destination_dir: destination_dir.into(),
            media_kind,
            quality_label: quality_label.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination_dir(&self) -> &PathBuf {
        &self.destination_dir
    }

    pub fn media_kind(&self) -> MediaKind {
        self.media_kind
    }

    pub fn quality_label(&self) -> &str {
        &self.quality_label
    }

    pub fn ensure_url(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(DownloadError::EmptyUrl);
        }
        Ok(())
    }
}

/// Post-processing applied after the raw media bytes are on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostProcess {
    RemuxToMp4,
    ExtractAudioMp3 { bitrate_kbps: u32 },
}

/// Backend-agnostic format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatConstraint {
    pub kind: MediaKind,
    /// Set iff `kind == Video`
    pub video_max_height_px: Option<u32>,
    /// Set iff `kind == Audio`
    pub audio_max_bitrate_kbps: Option<u32>,
    pub post_process: PostProcess,
}

impl FormatConstraint {
    pub fn video(max_height_px: u32) -> Self {
        Self {
            kind: MediaKind::Video,
            video_max_height_px: Some(max_height_px),
            audio_max_bitrate_kbps: None,
            post_process: PostProcess::RemuxToMp4,
        }
    }

    pub fn audio(max_bitrate_kbps: u32) -> Self {
        Self {
            kind: MediaKind::Audio,
            video_max_height_px: None,
            audio_max_bitrate_kbps: Some(max_bitrate_kbps),
            post_process: PostProcess::ExtractAudioMp3 {
                bitrate_kbps: max_bitrate_kbps,
            },
        }
    }
}

/// One fetchable item produced by resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadUnit {
    pub index: usize,
    pub title: String,
    pub source_ref: String,
    pub external_id: Option<String>,
}

/// Result of a flat (non-downloading) listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatListing {
    pub is_collection: bool,
    pub title: Option<String>,
    pub id: Option<String>,
    pub entries: Vec<FlatEntry>,
}

/// One child of a collection as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatEntry {
    pub title: Option<String>,
    pub direct_url: Option<String>,
    pub webpage_url: Option<String>,
    pub external_id: Option<String>,
}

/// Lifecycle phase as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawStatus {
    /// Bytes are flowing
    Downloading,
    /// Byte transfer finished
    Finished,
    /// A remux/transcode step is running
    PostProcessing,
    /// Backend confirmed every post-processing step is done
    PostProcessed,
}

/// Raw progress callback payload from a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProgressEvent {
    pub status: RawStatus,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<u64>,
    pub speed: Option<f64>,
    /// Title the backend resolved for the item, if it reports one
    pub title: Option<String>,
}

impl RawProgressEvent {
    pub fn downloading(downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            status: RawStatus::Downloading,
            downloaded_bytes,
            total_bytes,
            total_bytes_estimate: None,
            speed: None,
            title: None,
        }
    }

    pub fn with_status(status: RawStatus) -> Self {
        Self {
            status,
            downloaded_bytes: 0,
            total_bytes: None,
            total_bytes_estimate: None,
            speed: None,
            title: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }
}

/// Normalized progress phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Downloading,
    PostProcessing,
    Finished,
}

/// Normalized progress for one unit at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub unit_index: usize,
    pub phase: Phase,
    /// In `[0, 1]`; 0 when the total size is unknown
    pub fraction_complete: f64,
    pub bytes_per_second: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Succeeded,
    Failed,
    SkippedByCancellation,
}

/// Terminal result of attempting one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit_index: usize,
    pub status: UnitStatus,
    pub error_detail: Option<String>,
}

impl UnitOutcome {
    pub fn succeeded(unit_index: usize) -> Self {
        Self {
            unit_index,
            status: UnitStatus::Succeeded,
            error_detail: None,
        }
    }

    pub fn failed(unit_index: usize, detail: impl Into<String>) -> Self {
        Self {
            unit_index,
            status: UnitStatus::Failed,
            error_detail: Some(detail.into()),
        }
    }

    pub fn skipped(unit_index: usize) -> Self {
        Self {
            unit_index,
            status: UnitStatus::SkippedByCancellation,
            error_detail: None,
        }
    }
}

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Every unit succeeded
    Completed,
    /// Stop was requested before every unit was attempted
    Cancelled,
    /// Run finished without cancellation but some units failed
    PartiallyFailed,
}

/// Terminal summary of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub total_units: usize,
    pub succeeded_count: usize,
    pub cancelled: bool,
    pub outcomes: Vec<UnitOutcome>,
}

impl JobResult {
    pub fn new(total_units: usize) -> Self {
        Self {
            total_units,
            outcomes: Vec::with_capacity(total_units),
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: UnitOutcome) {
        match outcome.status {
            UnitStatus::Succeeded => self.succeeded_count += 1,
            UnitStatus::SkippedByCancellation => self.cancelled = true,
            UnitStatus::Failed => {}
        }
        self.outcomes.push(outcome);
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == UnitStatus::Failed)
            .count()
    }

    pub fn status(&self) -> JobStatus {
        if self.cancelled {
            JobStatus::Cancelled
        } else if self.succeeded_count == self.total_units {
            JobStatus::Completed
        } else {
            JobStatus::PartiallyFailed
        }
    }

    /// Short human-readable summary of the outcome
    pub fn summary(&self) -> String {
        match self.status() {
            JobStatus::Cancelled => "Download cancelled".to_string(),
            JobStatus::Completed => format!(
                "Completed {}/{} downloads!",
                self.succeeded_count, self.total_units
            ),
            JobStatus::PartiallyFailed => format!(
                "Completed {}/{} (some failed)",
                self.succeeded_count, self.total_units
            ),
        }
    }
}

/// Engine state machine as seen from outside the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Resolving,
    RunningUnit(usize),
    AdvancingUnit,
    Completed,
    Cancelled,
    PartiallyFailed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::PartiallyFailed)
    }
}

impl From<JobStatus> for JobState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Completed => Self::Completed,
            JobStatus::Cancelled => Self::Cancelled,
            JobStatus::PartiallyFailed => Self::PartiallyFailed,
        }
    }
}

/// Severity attached to a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Ready,
    Downloading,
    Success,
    Error,
}

/// Status line handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub text: String,
    pub severity: Severity,
    /// Present when the update was produced from a progress callback
    pub progress: Option<ProgressSnapshot>,
}

impl StatusUpdate {
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
            progress: None,
        }
    }

    pub fn with_progress(mut self, snapshot: ProgressSnapshot) -> Self {
        self.progress = Some(snapshot);
        self
    }
}

/// Alternative JavaScript runtime handed to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsRuntime {
    /// Runtime name as the backend knows it (e.g. "deno")
    pub name: String,
    pub path: PathBuf,
}

/// Everything a backend needs to fetch one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub format: FormatConstraint,
    /// Destination path template, e.g. `<dir>/%(title)s.%(ext)s`
    pub output_template: PathBuf,
    pub post_process: PostProcess,
    pub js_runtime: Option<JsRuntime>,
}

/// File name template; the backend substitutes the resolved title and extension
pub const OUTPUT_FILE_TEMPLATE: &str = "%(title)s.%(ext)s";

impl FetchOptions {
    pub fn new(format: FormatConstraint, destination_dir: &std::path::Path) -> Self {
        Self {
            format,
            output_template: destination_dir.join(OUTPUT_FILE_TEMPLATE),
            post_process: format.post_process,
            js_runtime: None,
        }
    }

    pub fn with_js_runtime(mut self, runtime: Option<JsRuntime>) -> Self {
        self.js_runtime = runtime;
        self
    }
}
