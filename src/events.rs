//! Crawler events
//!
//! Events report what happened to references during a run. They are
//! observational: listeners cannot influence processing.

use crate::state::CrawlState;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Kinds of crawler events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlerEventKind {
    CrawlerStarted,
    CrawlerFinished,
    ReferenceQueued,
    DocumentCommittedAdd,
    DocumentCommittedRemove,
    DocumentCommitSkipped,
    RejectedUnmodified,
    RejectedError,
    RejectedNotFound,
    RejectedBadStatus,
    ReferenceGraced,
    ReferenceVanished,
}

impl CrawlerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlerEventKind::CrawlerStarted => "CRAWLER_STARTED",
            CrawlerEventKind::CrawlerFinished => "CRAWLER_FINISHED",
            CrawlerEventKind::ReferenceQueued => "REFERENCE_QUEUED",
            CrawlerEventKind::DocumentCommittedAdd => "DOCUMENT_COMMITTED_ADD",
            CrawlerEventKind::DocumentCommittedRemove => "DOCUMENT_COMMITTED_REMOVE",
            CrawlerEventKind::DocumentCommitSkipped => "DOCUMENT_COMMIT_SKIPPED",
            CrawlerEventKind::RejectedUnmodified => "REJECTED_UNMODIFIED",
            CrawlerEventKind::RejectedError => "REJECTED_ERROR",
            CrawlerEventKind::RejectedNotFound => "REJECTED_NOTFOUND",
            CrawlerEventKind::RejectedBadStatus => "REJECTED_BAD_STATUS",
            CrawlerEventKind::ReferenceGraced => "REFERENCE_GRACED",
            CrawlerEventKind::ReferenceVanished => "REFERENCE_VANISHED",
        }
    }

    /// Rejection event matching an invalid crawl state
    pub fn rejection_for(state: CrawlState) -> Option<Self> {
        match state {
            CrawlState::NotFound => Some(CrawlerEventKind::RejectedNotFound),
            CrawlState::BadStatus => Some(CrawlerEventKind::RejectedBadStatus),
            CrawlState::Error => Some(CrawlerEventKind::RejectedError),
            CrawlState::Unmodified => Some(CrawlerEventKind::RejectedUnmodified),
            CrawlState::New | CrawlState::Modified => None,
        }
    }
}

impl fmt::Display for CrawlerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single crawler event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlerEvent {
    pub kind: CrawlerEventKind,

    /// Crawler that fired the event
    pub crawler_id: String,

    /// Reference concerned, absent for run-level events
    pub reference: Option<String>,

    /// Free-form detail (status code, error message, ...)
    pub message: Option<String>,
}

impl CrawlerEvent {
    pub fn new(kind: CrawlerEventKind, crawler_id: impl Into<String>) -> Self {
        Self {
            kind,
            crawler_id: crawler_id.into(),
            reference: None,
            message: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Receives crawler events
pub trait CrawlerEventListener: Send + Sync {
    fn on_event(&self, event: &CrawlerEvent);
}

impl<F> CrawlerEventListener for F
where
    F: Fn(&CrawlerEvent) + Send + Sync,
{
    fn on_event(&self, event: &CrawlerEvent) {
        self(event)
    }
}

/// Dispatches events to registered listeners
#[derive(Default)]
pub struct EventManager {
    listeners: RwLock<Vec<Arc<dyn CrawlerEventListener>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn CrawlerEventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Logs the event and hands it to every listener in registration order
    pub fn fire(&self, event: CrawlerEvent) {
        tracing::debug!(
            crawler = %event.crawler_id,
            reference = event.reference.as_deref().unwrap_or("-"),
            "{}{}",
            event.kind,
            event
                .message
                .as_deref()
                .map(|m| format!(": {}", m))
                .unwrap_or_default()
        );

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}

impl fmt::Debug for EventManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventManager")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
