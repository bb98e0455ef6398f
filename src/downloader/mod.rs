// Downloader module - sequential download engine

pub mod backends;
pub mod cancel;
pub mod config;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod progress;
pub mod resolver;
pub mod traits;
pub mod utils;

pub use backends::YtDlpBackend;
pub use cancel::CancellationController;
pub use config::YtDlpConfig;
pub use driver::JobDriver;
pub use engine::{DownloadEngine, RunHandle, RunState};
pub use errors::{DownloadError, FetchFailure, Result};
pub use format_selector::FormatSelector;
pub use models::{
    DownloadRequest, DownloadUnit, FetchOptions, FlatEntry, FlatListing, FormatConstraint,
    JobResult, JobState, JobStatus, JsRuntime, MediaKind, Phase, PostProcess, ProgressSnapshot,
    RawProgressEvent, RawStatus, Severity, StatusUpdate, UnitOutcome, UnitStatus,
};
pub use progress::{ProgressAggregator, UnitContext};
pub use resolver::{Resolution, UnitResolver};
pub use traits::{ChannelSink, MediaBackend, RecordingSink, StatusSink};
