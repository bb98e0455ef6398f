// Configuration for the yt-dlp backend
//
// Defaults, then environment overrides (MICRO_DL_*), then builder calls.

use std::path::PathBuf;

use super::models::JsRuntime;
use super::utils::find_ytdlp;

pub const ENV_YTDLP: &str = "MICRO_DL_YTDLP";
pub const ENV_FFMPEG: &str = "MICRO_DL_FFMPEG";
pub const ENV_DENO: &str = "MICRO_DL_DENO";
pub const ENV_PROXY: &str = "MICRO_DL_PROXY";
pub const ENV_COOKIES: &str = "MICRO_DL_COOKIES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YtDlpConfig {
    /// yt-dlp executable
    pub ytdlp_path: PathBuf,
    /// Directory (or binary) handed to `--ffmpeg-location`
    pub ffmpeg_location: Option<PathBuf>,
    /// Alternative JS runtime for sites that need one
    pub js_runtime: Option<JsRuntime>,
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Path to cookies.txt file
    pub cookies_path: Option<PathBuf>,
    /// `--socket-timeout` in seconds
    pub socket_timeout_secs: u32,
    /// Upper bound for a flat listing call
    pub listing_timeout_secs: u64,
    /// `--retries` for each fetch
    pub retries: u32,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: find_ytdlp(),
            ffmpeg_location: None,
            js_runtime: None,
            proxy: None,
            cookies_path: None,
            socket_timeout_secs: 30,
            listing_timeout_secs: 60,
            retries: 5,
        }
    }
}

impl YtDlpConfig {
    /// Defaults with `MICRO_DL_*` environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (environment, tests)
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_YTDLP) {
            self.ytdlp_path = PathBuf::from(path);
        }
        if let Some(path) = get(ENV_FFMPEG) {
            self.ffmpeg_location = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_DENO) {
            self.js_runtime = Some(JsRuntime {
                name: "deno".to_string(),
                path: PathBuf::from(path),
            });
        }
        if let Some(proxy) = get(ENV_PROXY) {
            self.proxy = Some(proxy);
        }
        if let Some(path) = get(ENV_COOKIES) {
            self.cookies_path = Some(PathBuf::from(path));
        }
        self
    }

    pub fn with_ytdlp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ytdlp_path = path.into();
        self
    }

    pub fn with_ffmpeg_location(mut self, path: Option<PathBuf>) -> Self {
        self.ffmpeg_location = path;
        self
    }

    pub fn with_js_runtime(mut self, runtime: Option<JsRuntime>) -> Self {
        self.js_runtime = runtime;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_socket_timeout(mut self, seconds: u32) -> Self {
        self.socket_timeout_secs = seconds;
        self
    }

    pub fn with_listing_timeout(mut self, seconds: u64) -> Self {
        self.listing_timeout_secs = seconds;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Network arguments shared by listing and fetching
    pub fn network_args(&self) -> Vec<String> {
        let mut args = vec![
            "--socket-timeout".to_string(),
            self.socket_timeout_secs.to_string(),
        ];

        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        if let Some(path) = &self.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.display().to_string());
        }

        args
    }
}
