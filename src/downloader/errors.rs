// Error types for the download engine and its backends

use thiserror::Error;

use super::models::MediaKind;

/// Result alias used across the downloader module
pub type Result<T> = std::result::Result<T, DownloadError>;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Submitted URL was empty after trimming
    #[error("URL must not be empty")]
    EmptyUrl,

    /// Quality label is not one of the labels offered for the media kind
    #[error("invalid {kind} quality: {label:?}")]
    InvalidQuality { kind: MediaKind, label: String },

    /// Another run is still active on this engine
    #[error("a download run is already in progress")]
    RunAlreadyInProgress,

    /// Flat listing of the URL failed
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Fetching a single unit failed
    #[error("fetch error: {0}")]
    Fetch(FetchFailure),

    /// Stop was requested while a fetch was active
    #[error("download stopped by user")]
    StopRequested,

    /// yt-dlp (or a helper binary) could not be started
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Backend produced output we could not understand
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// True for the cooperative-cancellation signal
    pub fn is_stop_requested(&self) -> bool {
        matches!(self, Self::StopRequested)
    }
}

/// Why a single fetch failed, classified from backend output
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// Network timeout while talking to the site
    #[error("network timeout")]
    NetworkTimeout,

    /// Site refused the request (429, bot detection, 403)
    #[error("blocked by the remote site")]
    Blocked,

    /// Item is private, removed, or otherwise unavailable
    #[error("media unavailable: {0}")]
    Unavailable(String),

    /// The backend has no extractor for this URL
    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("{0}")]
    Other(String),
}

// Classify raw backend stderr into a failure kind
impl From<String> for FetchFailure {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("timed out") || lower.contains("timeout") {
            return Self::NetworkTimeout;
        }

        if lower.contains("429")
            || lower.contains("403")
            || lower.contains("sign in to confirm")
            || lower.contains("blocked")
        {
            return Self::Blocked;
        }

        if lower.contains("unsupported url") {
            return Self::UnsupportedUrl(last_error_line(&s));
        }

        if lower.contains("video unavailable")
            || lower.contains("private video")
            || lower.contains("has been removed")
            || lower.contains("not available")
        {
            return Self::Unavailable(last_error_line(&s));
        }

        Self::Other(last_error_line(&s))
    }
}

impl From<&str> for FetchFailure {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

/// yt-dlp prints warnings before the real error; keep the last ERROR line
fn last_error_line(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .lines()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| trimmed.lines().rev().find(|line| !line.trim().is_empty()))
        .map(|line| line.trim_start_matches("ERROR:").trim().to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}
