// Backend and status sink traits

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::errors::Result;
use super::models::{FetchOptions, FlatListing, RawProgressEvent, StatusUpdate};

/// Trait for extraction/fetch backend implementations
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// List a URL without downloading anything. Collections report their
    /// children in `entries`.
    async fn list_flat(&self, url: &str) -> Result<FlatListing>;

    /// Fetch one item to disk, reporting progress through `on_progress`.
    ///
    /// When `on_progress` returns an error (normally `StopRequested`) the
    /// fetch must be abandoned and that error returned unchanged.
    async fn fetch(
        &self,
        source_ref: &str,
        options: &FetchOptions,
        on_progress: &mut (dyn FnMut(RawProgressEvent) -> Result<()> + Send),
    ) -> Result<()>;
}

/// Receives status lines for the presentation layer
pub trait StatusSink: Send + Sync {
    fn emit(&self, update: StatusUpdate);
}

impl<F> StatusSink for F
where
    F: Fn(StatusUpdate) + Send + Sync,
{
    fn emit(&self, update: StatusUpdate) {
        self(update)
    }
}

/// Forwards updates to a channel; a closed receiver is ignored
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<StatusUpdate>) -> Self {
        Self { tx }
    }
}

impl StatusSink for ChannelSink {
    fn emit(&self, update: StatusUpdate) {
        let _ = self.tx.send(update);
    }
}

/// Keeps every update in memory, in order
#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates
            .lock()
            .map(|u| u.clone())
            .unwrap_or_default()
    }
}

impl StatusSink for RecordingSink {
    fn emit(&self, update: StatusUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update);
        }
    }
}
