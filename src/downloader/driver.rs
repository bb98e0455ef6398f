// Job driver - runs one request's units strictly one after another
//
// Idle -> Resolving -> RunningUnit(i) <-> AdvancingUnit -> Completed | Cancelled | PartiallyFailed
//
// A failed unit never stops the batch; only a stop request does.

use std::sync::Arc;
use tokio::sync::watch;

use super::cancel::CancellationController;
use super::errors::Result;
use super::format_selector::FormatSelector;
use super::models::{
    DownloadRequest, DownloadUnit, FetchOptions, JobResult, JobState, JobStatus, JsRuntime, Phase,
    ProgressSnapshot, RawProgressEvent, Severity, StatusUpdate, UnitOutcome, UnitStatus,
};
use super::progress::{format_file_size, ProgressAggregator, UnitContext};
use super::resolver::UnitResolver;
use super::traits::{MediaBackend, StatusSink};

pub struct JobDriver {
    backend: Arc<dyn MediaBackend>,
    sink: Arc<dyn StatusSink>,
    cancel: CancellationController,
    state: watch::Sender<JobState>,
    js_runtime: Option<JsRuntime>,
}

impl JobDriver {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        sink: Arc<dyn StatusSink>,
        cancel: CancellationController,
    ) -> Self {
        let (state, _) = watch::channel(JobState::Idle);
        Self {
            backend,
            sink,
            cancel,
            state,
            js_runtime: None,
        }
    }

    pub fn with_js_runtime(mut self, runtime: Option<JsRuntime>) -> Self {
        self.js_runtime = runtime;
        self
    }

    /// Watch the state machine from outside the worker
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Run the whole request.
    ///
    /// Only request validation (`EmptyUrl`, `InvalidQuality`) is returned as
    /// an error, before any state changes. Everything that happens per unit
    /// ends up in the returned `JobResult`.
    pub async fn run(&self, request: &DownloadRequest) -> Result<JobResult> {
        request.ensure_url()?;
        let format = FormatSelector::select(request.media_kind(), request.quality_label())?;

        self.set_state(JobState::Resolving);
        self.sink
            .emit(StatusUpdate::new("Fetching video info...", Severity::Downloading));

        let resolution = UnitResolver::resolve(self.backend.as_ref(), request.url()).await;
        let units = resolution.units;
        let total = units.len();

        if let Some(title) = &resolution.collection_title {
            if total > 1 {
                self.sink.emit(StatusUpdate::new(
                    format!("Playlist: {} ({} videos)", title, total),
                    Severity::Downloading,
                ));
            }
        }

        let options = FetchOptions::new(format, request.destination_dir())
            .with_js_runtime(self.js_runtime.clone());

        tracing::info!(
            backend = self.backend.name(),
            url = request.url(),
            total_units = total,
            kind = %request.media_kind(),
            "starting run"
        );

        let mut result = JobResult::new(total);

        for unit in &units {
            if self.cancel.should_stop() {
                tracing::info!(unit_index = unit.index, "stop observed between units");
                Self::skip_remaining(&mut result, unit.index, total);
                break;
            }

            self.set_state(JobState::RunningUnit(unit.index));
            let ctx = UnitContext::new(unit.index, total);
            let outcome = self.run_unit(unit, ctx, &options).await;
            let stopped = outcome.status == UnitStatus::SkippedByCancellation;
            result.record(outcome);

            if stopped {
                Self::skip_remaining(&mut result, unit.index + 1, total);
                break;
            }
            self.set_state(JobState::AdvancingUnit);
        }

        let status = result.status();
        self.set_state(status.into());
        self.sink.emit(StatusUpdate::new(
            result.summary(),
            match status {
                JobStatus::Completed => Severity::Success,
                JobStatus::PartiallyFailed => Severity::Error,
                JobStatus::Cancelled => Severity::Ready,
            },
        ));

        tracing::info!(
            total_units = result.total_units,
            succeeded = result.succeeded_count,
            failed = result.failed_count(),
            cancelled = result.cancelled,
            "run finished"
        );

        Ok(result)
    }

    async fn run_unit(
        &self,
        unit: &DownloadUnit,
        ctx: UnitContext,
        options: &FetchOptions,
    ) -> UnitOutcome {
        tracing::debug!(
            unit_index = unit.index,
            total_units = ctx.total_units,
            source_ref = %unit.source_ref,
            "fetching unit"
        );

        let sink = Arc::clone(&self.sink);
        let cancel = self.cancel.clone();
        let fallback_title = unit.title.clone();
        let mut on_progress = move |event: RawProgressEvent| -> Result<()> {
            let snapshot = ProgressAggregator::normalize(&event, ctx, &cancel)?;
            let title = event.title.as_deref().unwrap_or(&fallback_title);
            sink.emit(progress_update(&snapshot, ctx, title));
            Ok(())
        };

        match self
            .backend
            .fetch(&unit.source_ref, options, &mut on_progress)
            .await
        {
            Ok(()) => {
                tracing::info!(unit_index = unit.index, title = %unit.title, "unit succeeded");
                UnitOutcome::succeeded(unit.index)
            }
            // the backend may fail on its own once a stop is underway
            Err(e) if e.is_stop_requested() || self.cancel.should_stop() => {
                tracing::info!(unit_index = unit.index, error = %e, "unit stopped by user");
                UnitOutcome::skipped(unit.index)
            }
            Err(e) => {
                tracing::warn!(unit_index = unit.index, error = %e, "unit failed, continuing");
                UnitOutcome::failed(unit.index, e.to_string())
            }
        }
    }

    fn skip_remaining(result: &mut JobResult, from: usize, total: usize) {
        for index in from..total {
            result.record(UnitOutcome::skipped(index));
        }
    }

    fn set_state(&self, state: JobState) {
        tracing::debug!(?state, "job state");
        self.state.send_replace(state);
    }
}

/// Status line for one progress snapshot
fn progress_update(snapshot: &ProgressSnapshot, ctx: UnitContext, title: &str) -> StatusUpdate {
    let text = match snapshot.phase {
        Phase::Downloading => {
            let speed = snapshot
                .bytes_per_second
                .map(|s| format!(" - {}/s", format_file_size(s)))
                .unwrap_or_default();
            format!(
                "{} {}: {:.0}%{}",
                ctx.counter(),
                title,
                snapshot.fraction_complete * 100.0,
                speed
            )
        }
        Phase::PostProcessing => format!("{} Processing...", ctx.counter()),
        Phase::Finished => format!("{} Finished: {}", ctx.counter(), title),
    };
    StatusUpdate::new(text, Severity::Downloading).with_progress(*snapshot)
}
