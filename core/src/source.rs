use crate::changes::{Attributes, ChangeEvent};
use crate::error::SourceError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A source's change stream: possibly infinite, terminated by `stop` or by a
/// terminal `Err` item.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, SourceError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceStatus {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceStatus::Created => "CREATED",
            SourceStatus::Starting => "STARTING",
            SourceStatus::Running => "RUNNING",
            SourceStatus::Stopping => "STOPPING",
            SourceStatus::Stopped => "STOPPED",
            SourceStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Contract for change-data-capture adapters.
///
/// Invariants an implementation must uphold: every emitted event carries this
/// source's id; events for one entity are emitted in mutation order; `stop`
/// completes the stream cleanly; a streaming failure transitions the status
/// to Error and terminates the stream with an `Err` item.
#[async_trait]
pub trait Source: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn config(&self) -> &Attributes;
    fn status(&self) -> SourceStatus;

    /// Begin streaming changes. The stream starts at subscription.
    async fn start(&self) -> Result<ChangeStream, SourceError>;

    async fn stop(&self) -> Result<(), SourceError>;

    /// Terminating stream of [`ChangeKind::Snapshot`] events for all current
    /// rows. Defaults to empty for sources without backfill support.
    async fn snapshot(&self) -> Result<ChangeStream, SourceError> { Ok(futures::stream::empty().boxed()) }
}

type EventItem = Result<ChangeEvent, SourceError>;

/// In-process source backed by an unbounded channel. Hosts push events with
/// [`ChannelSource::push`]; the stream replays any held snapshot rows first,
/// then live pushes. Used for embedding and tests.
pub struct ChannelSource {
    inner: Arc<ChannelSourceInner>,
}

struct ChannelSourceInner {
    id: String,
    name: String,
    config: Attributes,
    status: Mutex<SourceStatus>,
    tx: Mutex<Option<mpsc::UnboundedSender<EventItem>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<EventItem>>>,
    snapshot_rows: Mutex<Vec<(String, String, Attributes)>>,
}

impl Clone for ChannelSource {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl ChannelSource {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ChannelSourceInner {
                id: id.into(),
                name: name.into(),
                config: Attributes::new(),
                status: Mutex::new(SourceStatus::Created),
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                snapshot_rows: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a row to be replayed as a Snapshot event at stream start and
    /// by [`Source::snapshot`].
    pub fn add_snapshot_row(&self, entity_type: impl Into<String>, entity_id: impl Into<String>, data: Attributes) {
        self.inner.snapshot_rows.lock().unwrap().push((entity_type.into(), entity_id.into(), data));
    }

    /// Emit a live event. The event's `source_id` is rewritten to this
    /// source's id.
    pub fn push(&self, mut event: ChangeEvent) -> Result<(), SourceError> {
        event.source_id = self.inner.id.clone();
        let guard = self.inner.tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.send(Ok(event)).map_err(|_| SourceError::Stopped),
            None => Err(SourceError::Stopped),
        }
    }

    /// Inject a terminal stream failure; the source transitions to Error and
    /// the stream ends with an `Err` item.
    pub fn fail(&self, error: SourceError) {
        *self.inner.status.lock().unwrap() = SourceStatus::Error;
        let mut guard = self.inner.tx.lock().unwrap();
        if let Some(tx) = guard.take() {
            let _ = tx.send(Err(error));
        }
    }

    fn snapshot_events(&self) -> Vec<ChangeEvent> {
        let rows = self.inner.snapshot_rows.lock().unwrap();
        rows.iter()
            .map(|(entity_type, entity_id, data)| {
                ChangeEvent::snapshot(entity_type.clone(), entity_id.clone(), data.clone(), self.inner.id.clone())
            })
            .collect()
    }
}

#[async_trait]
impl Source for ChannelSource {
    fn id(&self) -> &str { &self.inner.id }

    fn name(&self) -> &str { &self.inner.name }

    fn config(&self) -> &Attributes { &self.inner.config }

    fn status(&self) -> SourceStatus { *self.inner.status.lock().unwrap() }

    async fn start(&self) -> Result<ChangeStream, SourceError> {
        let mut rx = {
            let mut guard = self.inner.rx.lock().unwrap();
            guard.take().ok_or_else(|| SourceError::Connect("channel source already started".to_string()))?
        };
        *self.inner.status.lock().unwrap() = SourceStatus::Running;

        let backfill = futures::stream::iter(self.snapshot_events().into_iter().map(Ok));
        let live = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
        Ok(backfill.chain(live).boxed())
    }

    async fn stop(&self) -> Result<(), SourceError> {
        {
            let mut status = self.inner.status.lock().unwrap();
            if *status == SourceStatus::Error {
                // terminal; the stream already ended
            } else {
                *status = SourceStatus::Stopped;
            }
        }
        // dropping the sender completes the live stream
        self.inner.tx.lock().unwrap().take();
        Ok(())
    }

    async fn snapshot(&self) -> Result<ChangeStream, SourceError> {
        Ok(futures::stream::iter(self.snapshot_events().into_iter().map(Ok)).boxed())
    }
}
