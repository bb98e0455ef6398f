// yt-dlp backend - flat listing and fetching through the yt-dlp executable

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use crate::downloader::config::YtDlpConfig;
use crate::downloader::errors::{DownloadError, FetchFailure, Result};
use crate::downloader::format_selector::FormatSelector;
use crate::downloader::models::{
    FetchOptions, FlatEntry, FlatListing, JsRuntime, PostProcess, RawProgressEvent, RawStatus,
};
use crate::downloader::traits::MediaBackend;
use crate::downloader::utils::{
    kill_process_group, run_output_with_timeout, spawn_error, tool_command,
};

/// Machine-readable progress line; the title goes last since it may contain spaces
const PROGRESS_TEMPLATE: &str = "download:[progress] %(progress.status)s %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s %(progress.speed)s %(info.title)s";

lazy_static::lazy_static! {
    static ref PROGRESS_RE: Regex = Regex::new(
        r"^\[progress\]\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)(?:\s+(.+))?$"
    ).unwrap();
    static ref POSTPROCESS_RE: Regex = Regex::new(
        r"^\[(Merger|VideoRemuxer|VideoConvertor|ExtractAudio|FixupM3u8|FixupM4a|FixupStretched)\]"
    ).unwrap();
    static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").unwrap();
}

#[derive(Debug, Deserialize)]
struct ListingJson {
    title: Option<String>,
    id: Option<String>,
    entries: Option<Vec<Option<EntryJson>>>,
}

#[derive(Debug, Deserialize)]
struct EntryJson {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    id: Option<String>,
}

pub struct YtDlpBackend {
    config: YtDlpConfig,
}

impl YtDlpBackend {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &YtDlpConfig {
        &self.config
    }

    fn js_runtime_args(runtime: Option<&JsRuntime>) -> Vec<String> {
        runtime
            .map(|rt| {
                vec![
                    "--js-runtimes".to_string(),
                    format!("{}:{}", rt.name, rt.path.display()),
                ]
            })
            .unwrap_or_default()
    }

    fn listing_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "-J".to_string(),
            "--flat-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.config.network_args());
        args.extend(Self::js_runtime_args(self.config.js_runtime.as_ref()));
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    fn fetch_args(&self, source_ref: &str, options: &FetchOptions) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            FormatSelector::get_format_spec(&options.format),
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--no-update".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "--retries".to_string(),
            self.config.retries.to_string(),
            "-o".to_string(),
            options.output_template.display().to_string(),
        ];
        args.extend(self.config.network_args());

        if let Some(ffmpeg) = &self.config.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.display().to_string());
        }

        // Per-run override wins over the backend default
        let runtime = options.js_runtime.as_ref().or(self.config.js_runtime.as_ref());
        args.extend(Self::js_runtime_args(runtime));

        match options.post_process {
            PostProcess::RemuxToMp4 => args.extend([
                "--merge-output-format".to_string(),
                "mp4".to_string(),
                "--remux-video".to_string(),
                "mp4".to_string(),
            ]),
            PostProcess::ExtractAudioMp3 { bitrate_kbps } => args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "--audio-quality".to_string(),
                format!("{}K", bitrate_kbps),
            ]),
        }

        args.push("--".to_string());
        args.push(source_ref.to_string());
        args
    }

    fn parse_listing(stdout: &[u8]) -> Result<FlatListing> {
        let json: ListingJson = serde_json::from_slice(stdout)
            .map_err(|e| DownloadError::Parse(format!("Invalid listing JSON: {}", e)))?;

        let is_collection = json.entries.is_some();
        let entries = json
            .entries
            .unwrap_or_default()
            .into_iter()
            // unavailable playlist items come back as null
            .flatten()
            .map(|e| FlatEntry {
                title: e.title,
                direct_url: e.url,
                webpage_url: e.webpage_url,
                external_id: e.id,
            })
            .collect();

        Ok(FlatListing {
            is_collection,
            title: json.title,
            id: json.id,
            entries,
        })
    }
}

impl Default for YtDlpBackend {
    fn default() -> Self {
        Self::new(YtDlpConfig::from_env())
    }
}

/// Parse one stdout line into a raw progress event
pub fn parse_output_line(line: &str) -> Option<RawProgressEvent> {
    let line = line.trim();

    if let Some(caps) = PROGRESS_RE.captures(line) {
        let status = match caps.get(1)?.as_str() {
            "downloading" => RawStatus::Downloading,
            "finished" => RawStatus::Finished,
            _ => return None,
        };
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());

        return Some(RawProgressEvent {
            status,
            downloaded_bytes: number(2).map(|n| n as u64).unwrap_or(0),
            total_bytes: number(3).map(|n| n as u64),
            total_bytes_estimate: number(4).map(|n| n as u64),
            speed: number(5),
            title: caps
                .get(6)
                .map(|m| m.as_str().trim().to_string())
                .filter(|t| !t.is_empty() && t != "NA"),
        });
    }

    if POSTPROCESS_RE.is_match(line) {
        return Some(RawProgressEvent::with_status(RawStatus::PostProcessing));
    }

    if ALREADY_RE.is_match(line) {
        return Some(RawProgressEvent::with_status(RawStatus::Finished));
    }

    None
}

#[async_trait]
impl MediaBackend for YtDlpBackend {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn list_flat(&self, url: &str) -> Result<FlatListing> {
        let args = self.listing_args(url);
        tracing::debug!(program = %self.config.ytdlp_path.display(), ?args, "listing");

        let output =
            run_output_with_timeout(&self.config.ytdlp_path, &args, self.config.listing_timeout_secs)
                .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DownloadError::Extraction(stderr.trim().to_string()));
        }

        Self::parse_listing(&output.stdout)
    }

    async fn fetch(
        &self,
        source_ref: &str,
        options: &FetchOptions,
        on_progress: &mut (dyn FnMut(RawProgressEvent) -> Result<()> + Send),
    ) -> Result<()> {
        let args = self.fetch_args(source_ref, options);
        tracing::debug!(program = %self.config.ytdlp_path.display(), ?args, "starting yt-dlp");

        let mut child = tool_command(&self.config.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.config.ytdlp_path, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Parse("Failed to capture stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Parse("Failed to capture stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        // file names in a non-UTF-8 locale must not end the fetch
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let Some(event) = parse_output_line(&line) else {
                continue;
            };
            if let Err(e) = on_progress(event) {
                tracing::debug!(error = %e, "progress callback aborted fetch, killing yt-dlp");
                kill_process_group(&mut child).await;
                stderr_task.abort();
                return Err(e);
            }
        }

        let status = child.wait().await?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if !status.success() {
            tracing::debug!(code = ?status.code(), stderr = %stderr_output.trim(), "yt-dlp failed");
            return Err(DownloadError::Fetch(FetchFailure::from(stderr_output)));
        }

        on_progress(RawProgressEvent::with_status(RawStatus::PostProcessed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{FormatConstraint, MediaKind};
    use std::path::{Path, PathBuf};

    fn backend() -> YtDlpBackend {
        YtDlpBackend::new(YtDlpConfig::default().with_ytdlp_path("/usr/bin/yt-dlp"))
    }

    #[test]
    fn test_parse_progress_line() {
        let event =
            parse_output_line("[progress] downloading 1024 4096 NA 512.5 My clip (live)").unwrap();
        assert_eq!(event.status, RawStatus::Downloading);
        assert_eq!(event.downloaded_bytes, 1024);
        assert_eq!(event.total_bytes, Some(4096));
        assert_eq!(event.total_bytes_estimate, None);
        assert_eq!(event.speed, Some(512.5));
        assert_eq!(event.title.as_deref(), Some("My clip (live)"));
    }

    #[test]
    fn test_parse_progress_line_with_estimate() {
        let event = parse_output_line("[progress] downloading 10 NA 2000.7 NA NA").unwrap();
        assert_eq!(event.total_bytes, None);
        assert_eq!(event.total_bytes_estimate, Some(2000));
        assert_eq!(event.speed, None);
        assert_eq!(event.title, None);
    }

    #[test]
    fn test_parse_finished_and_postprocess_lines() {
        let finished = parse_output_line("[progress] finished 4096 4096 NA NA clip").unwrap();
        assert_eq!(finished.status, RawStatus::Finished);

        let merge = parse_output_line("[Merger] Merging formats into \"clip.mp4\"").unwrap();
        assert_eq!(merge.status, RawStatus::PostProcessing);

        let audio = parse_output_line("[ExtractAudio] Destination: clip.mp3").unwrap();
        assert_eq!(audio.status, RawStatus::PostProcessing);

        let already = parse_output_line("[download] clip.mp4 has already been downloaded").unwrap();
        assert_eq!(already.status, RawStatus::Finished);

        assert!(parse_output_line("[youtube] abc: Downloading webpage").is_none());
        assert!(parse_output_line("[progress] error 1 2 3 4").is_none());
    }

    #[test]
    fn test_video_fetch_args() {
        let options = FetchOptions::new(FormatConstraint::video(720), Path::new("/out"));
        let args = backend().fetch_args("https://youtu.be/x", &options);

        assert_eq!(args[0], "-f");
        assert!(args[1].contains("height<=720"));
        assert!(args.windows(2).any(|w| *w == ["-o", "/out/%(title)s.%(ext)s"]));
        assert!(args.windows(2).any(|w| *w == ["--remux-video", "mp4"]));
        assert!(!args.contains(&"-x".to_string()));
        assert_eq!(args[args.len() - 2..], ["--", "https://youtu.be/x"]);
    }

    #[test]
    fn test_audio_fetch_args_with_runtime() {
        let options = FetchOptions::new(FormatConstraint::audio(256), Path::new("/out"))
            .with_js_runtime(Some(JsRuntime {
                name: "deno".to_string(),
                path: PathBuf::from("/opt/deno"),
            }));
        let args = backend().fetch_args("https://youtu.be/x", &options);

        assert!(args.windows(2).any(|w| *w == ["--audio-quality", "256K"]));
        assert!(args.windows(2).any(|w| *w == ["--audio-format", "mp3"]));
        assert!(args.windows(2).any(|w| *w == ["--js-runtimes", "deno:/opt/deno"]));
    }

    #[test]
    fn test_parse_playlist_listing() {
        let json = br#"{
            "_type": "playlist",
            "title": "Mix",
            "id": "PL1",
            "entries": [
                {"title": "one", "url": "https://www.youtube.com/watch?v=1", "id": "1"},
                null,
                {"title": "two", "id": "2"}
            ]
        }"#;
        let listing = YtDlpBackend::parse_listing(json).unwrap();
        assert!(listing.is_collection);
        assert_eq!(listing.title.as_deref(), Some("Mix"));
        assert_eq!(listing.entries.len(), 2);
        assert_eq!(listing.entries[1].external_id.as_deref(), Some("2"));
        assert_eq!(listing.entries[1].direct_url, None);
    }

    #[test]
    fn test_parse_single_listing() {
        let json = br#"{"title": "clip", "id": "abc", "webpage_url": "https://www.youtube.com/watch?v=abc"}"#;
        let listing = YtDlpBackend::parse_listing(json).unwrap();
        assert!(!listing.is_collection);
        assert_eq!(listing.id.as_deref(), Some("abc"));
        assert!(listing.entries.is_empty());
    }

    #[test]
    fn test_parse_listing_garbage() {
        assert!(matches!(
            YtDlpBackend::parse_listing(b"not json"),
            Err(DownloadError::Parse(_))
        ));
    }

    #[cfg(unix)]
    mod script {
        use super::*;
        use crate::downloader::cancel::CancellationController;
        use std::os::unix::fs::PermissionsExt;

        /// Writes an executable stand-in for yt-dlp
        fn fake_ytdlp(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("yt-dlp");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn options(dir: &Path) -> FetchOptions {
            FetchOptions::new(
                crate::downloader::format_selector::FormatSelector::select(MediaKind::Video, "720p")
                    .unwrap(),
                dir,
            )
        }

        #[tokio::test]
        async fn test_fetch_streams_progress() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_ytdlp(
                dir.path(),
                "echo '[youtube] x: Downloading webpage'\n\
                 echo '[progress] downloading 50 100 NA 10.0 clip'\n\
                 echo '[progress] downloading 100 100 NA 10.0 clip'\n\
                 echo '[progress] finished 100 100 NA NA clip'\n\
                 echo '[VideoRemuxer] Not remuxing media file'\n\
                 exit 0",
            );
            let backend = YtDlpBackend::new(YtDlpConfig::default().with_ytdlp_path(bin));

            let mut events = Vec::new();
            let mut on_progress = |e: RawProgressEvent| -> Result<()> {
                events.push(e.status);
                Ok(())
            };
            backend
                .fetch("https://youtu.be/x", &options(dir.path()), &mut on_progress)
                .await
                .unwrap();

            assert_eq!(
                events,
                vec![
                    RawStatus::Downloading,
                    RawStatus::Downloading,
                    RawStatus::Finished,
                    RawStatus::PostProcessing,
                    RawStatus::PostProcessed
                ]
            );
        }

        #[tokio::test]
        async fn test_fetch_failure_is_classified() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_ytdlp(
                dir.path(),
                "echo 'ERROR: [youtube] x: Private video' >&2\nexit 1",
            );
            let backend = YtDlpBackend::new(YtDlpConfig::default().with_ytdlp_path(bin));

            let mut on_progress = |_e: RawProgressEvent| -> Result<()> { Ok(()) };
            let err = backend
                .fetch("https://youtu.be/x", &options(dir.path()), &mut on_progress)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                DownloadError::Fetch(FetchFailure::Unavailable(_))
            ));
        }

        #[tokio::test]
        async fn test_fetch_stops_on_callback_error() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_ytdlp(
                dir.path(),
                "echo '[progress] downloading 1 100 NA NA clip'\n\
                 echo '[progress] downloading 2 100 NA NA clip'\n\
                 sleep 10\n\
                 echo '[progress] downloading 3 100 NA NA clip'",
            );
            let backend = YtDlpBackend::new(YtDlpConfig::default().with_ytdlp_path(bin));

            let cancel = CancellationController::new();
            let mut seen = 0;
            let mut on_progress = |_e: RawProgressEvent| -> Result<()> {
                cancel.checkpoint()?;
                seen += 1;
                cancel.request_stop();
                Ok(())
            };
            let started = std::time::Instant::now();
            let err = backend
                .fetch("https://youtu.be/x", &options(dir.path()), &mut on_progress)
                .await
                .unwrap_err();

            assert!(err.is_stop_requested());
            assert_eq!(seen, 1);
            assert!(started.elapsed() < std::time::Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_fetch_survives_non_utf8_output() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_ytdlp(
                dir.path(),
                "printf '[download] Destination: caf\\351.webm\\n'\n\
                 printf '[progress] downloading 5 10 NA NA caf\\351\\n'\n\
                 echo '[progress] finished 10 10 NA NA clip'\n\
                 exit 0",
            );
            let backend = YtDlpBackend::new(YtDlpConfig::default().with_ytdlp_path(bin));

            let mut events = Vec::new();
            let mut on_progress = |e: RawProgressEvent| -> Result<()> {
                events.push(e);
                Ok(())
            };
            backend
                .fetch("https://youtu.be/x", &options(dir.path()), &mut on_progress)
                .await
                .unwrap();

            let statuses: Vec<RawStatus> = events.iter().map(|e| e.status).collect();
            assert_eq!(
                statuses,
                vec![RawStatus::Downloading, RawStatus::Finished, RawStatus::PostProcessed]
            );
            assert_eq!(events[0].title.as_deref(), Some("caf\u{FFFD}"));
        }

        /// True while `pid` is running (zombies count as gone)
        #[cfg(target_os = "linux")]
        fn is_running(pid: &str) -> bool {
            std::fs::read_to_string(format!("/proc/{}/stat", pid))
                .map(|stat| !stat.contains(") Z "))
                .unwrap_or(false)
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_stop_kills_helper_processes() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("helper.pid");
            let bin = fake_ytdlp(
                dir.path(),
                &format!(
                    "sleep 30 &\n\
                     echo $! > {}\n\
                     echo '[progress] downloading 1 100 NA NA clip'\n\
                     wait",
                    pid_file.display()
                ),
            );
            let backend = YtDlpBackend::new(YtDlpConfig::default().with_ytdlp_path(bin));

            let cancel = CancellationController::new();
            cancel.request_stop();
            let mut on_progress = |_e: RawProgressEvent| -> Result<()> { cancel.checkpoint() };
            let err = backend
                .fetch("https://youtu.be/x", &options(dir.path()), &mut on_progress)
                .await
                .unwrap_err();
            assert!(err.is_stop_requested());

            let pid = std::fs::read_to_string(&pid_file).unwrap();
            let pid = pid.trim();
            for _ in 0..50 {
                if !is_running(pid) {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
            panic!("helper process {} outlived the stop", pid);
        }

        #[tokio::test]
        async fn test_list_flat_runs_binary() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_ytdlp(
                dir.path(),
                r#"echo '{"title": "Mix", "entries": [{"title": "a", "url": "https://a"}]}'"#,
            );
            let backend = YtDlpBackend::new(YtDlpConfig::default().with_ytdlp_path(bin));

            let listing = backend.list_flat("https://list").await.unwrap();
            assert!(listing.is_collection);
            assert_eq!(listing.entries[0].direct_url.as_deref(), Some("https://a"));
        }

        #[tokio::test]
        async fn test_list_flat_failure() {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_ytdlp(dir.path(), "echo 'ERROR: Unsupported URL' >&2\nexit 1");
            let backend = YtDlpBackend::new(YtDlpConfig::default().with_ytdlp_path(bin));

            assert!(matches!(
                backend.list_flat("https://odd").await,
                Err(DownloadError::Extraction(_))
            ));
        }
    }
}
