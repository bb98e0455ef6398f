pub mod downloader;

pub use downloader::{
    CancellationController, DownloadEngine, DownloadError, DownloadRequest, JobResult, JobStatus,
    MediaBackend, MediaKind, Result, RunHandle, RunState, StatusSink, StatusUpdate, YtDlpBackend,
    YtDlpConfig,
};
