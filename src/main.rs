use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use micro_downloader::downloader::utils::default_destination_dir;
use micro_downloader::downloader::{FormatSelector, Severity};
use micro_downloader::{
    DownloadEngine, DownloadRequest, JobStatus, MediaKind, StatusUpdate, YtDlpBackend, YtDlpConfig,
};

#[derive(Parser, Debug)]
#[command(name = "micro-downloader")]
#[command(about = "Download a video, audio track, or whole playlist", long_about = None)]
struct Cli {
    /// Video or playlist URL
    url: String,

    /// Folder to save into (defaults to the system download folder)
    #[arg(short, long)]
    dest: Option<PathBuf>,

    /// Extract audio as MP3 instead of downloading video
    #[arg(short, long)]
    audio: bool,

    /// Quality label, e.g. "1080p" or "192kbps"
    #[arg(short, long)]
    quality: Option<String>,

    /// yt-dlp executable to use
    #[arg(long)]
    ytdlp: Option<PathBuf>,

    /// Proxy URL handed to yt-dlp
    #[arg(long)]
    proxy: Option<String>,
}

fn print_status(update: StatusUpdate) {
    let marker = match update.severity {
        Severity::Ready => "-",
        Severity::Downloading => ">",
        Severity::Success => "+",
        Severity::Error => "!",
    };
    eprintln!("{} {}", marker, update.text);
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("micro_downloader=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = YtDlpConfig::from_env();
    if let Some(path) = cli.ytdlp {
        config = config.with_ytdlp_path(path);
    }
    if cli.proxy.is_some() {
        config = config.with_proxy(cli.proxy);
    }

    let kind = if cli.audio { MediaKind::Audio } else { MediaKind::Video };
    let quality = cli
        .quality
        .unwrap_or_else(|| FormatSelector::default_label(kind).to_string());
    let dest = cli.dest.unwrap_or_else(default_destination_dir);

    let js_runtime = config.js_runtime.clone();
    let engine = DownloadEngine::new(Arc::new(YtDlpBackend::new(config)), Arc::new(print_status))
        .with_js_runtime(js_runtime);

    let handle = match engine.start_run(DownloadRequest::new(cli.url, dest, kind, quality)) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(2);
        }
    };

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("- Stopping...");
            canceller.request_stop();
        }
    });

    match handle.wait().await {
        Ok(result) => match result.status() {
            JobStatus::Completed => ExitCode::SUCCESS,
            JobStatus::PartiallyFailed => ExitCode::from(1),
            JobStatus::Cancelled => ExitCode::from(130),
        },
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}
