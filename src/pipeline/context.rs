use crate::checksum::{DocumentChecksummer, MetadataChecksummer};
use crate::committer::Committer;
use crate::config::Config;
use crate::events::{CrawlerEvent, CrawlerEventKind, EventManager};
use crate::reference::ReferenceStore;
use crate::state::ReferenceRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Multi-valued document metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    fields: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value to `key`
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.entry(key.into()).or_default().push(value.into());
    }

    /// Replaces every value of `key`
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), vec![value.into()]);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.fields.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.fields.iter()
    }
}

/// A fetched document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub reference: String,
    pub content: Vec<u8>,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(reference: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            reference: reference.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Collaborators shared by every document of a run
pub struct CrawlerServices {
    pub crawler_id: String,
    pub config: Arc<Config>,
    pub events: Arc<EventManager>,
    pub reference_store: Arc<ReferenceStore>,
    pub document_checksummer: Option<Arc<dyn DocumentChecksummer>>,
    pub metadata_checksummer: Option<Arc<dyn MetadataChecksummer>>,
    pub committer: Option<Arc<dyn Committer>>,
}

impl CrawlerServices {
    /// Fires an event about `reference`
    pub fn fire(&self, kind: CrawlerEventKind, reference: &str) {
        self.events
            .fire(CrawlerEvent::new(kind, &self.crawler_id).with_reference(reference));
    }
}

/// Per-reference state carried through the document pipeline
///
/// Lives for one reference in one run and is never persisted; the record is
/// written to the processed store when the reference is finalized.
pub struct DocumentPipelineContext {
    pub document: Document,

    /// In-flight record for this run
    pub record: ReferenceRecord,

    /// Record left by the previous run, if any
    pub cached: Option<ReferenceRecord>,

    pub services: Arc<CrawlerServices>,
}

impl DocumentPipelineContext {
    pub fn new(
        document: Document,
        record: ReferenceRecord,
        cached: Option<ReferenceRecord>,
        services: Arc<CrawlerServices>,
    ) -> Self {
        Self {
            document,
            record,
            cached,
            services,
        }
    }

    pub fn config(&self) -> &Config {
        &self.services.config
    }

    /// Fires an event about this context's reference
    pub fn fire(&self, kind: CrawlerEventKind) {
        self.services.fire(kind, &self.record.reference);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::events::CrawlerEvent;
    use crate::reference::ResumePolicy;
    use crate::storage::{DataStoreEngine, RunContext, SqliteDataStoreEngine};
    use parking_lot::Mutex;

    /// Committer that remembers what it was asked to do
    #[derive(Default)]
    pub(crate) struct RecordingCommitter {
        pub added: Mutex<Vec<String>>,
        pub removed: Mutex<Vec<String>>,
    }

    impl Committer for RecordingCommitter {
        fn add(&self, reference: &str, _: &[u8], _: &Metadata) -> anyhow::Result<()> {
            self.added.lock().push(reference.to_string());
            Ok(())
        }

        fn remove(&self, reference: &str, _: &Metadata) -> anyhow::Result<()> {
            self.removed.lock().push(reference.to_string());
            Ok(())
        }
    }

    /// In-memory services with an event recorder
    pub(crate) struct Harness {
        pub services: Arc<CrawlerServices>,
        events: Arc<Mutex<Vec<CrawlerEvent>>>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_services(|_| {})
        }

        pub fn with_services(customize: impl FnOnce(&mut CrawlerServices)) -> Self {
            let engine: Arc<dyn DataStoreEngine> = Arc::new(SqliteDataStoreEngine::in_memory());
            engine
                .init(&RunContext::new("test", std::env::temp_dir()))
                .unwrap();
            let reference_store = ReferenceStore::open(&engine, ResumePolicy::Auto).unwrap();

            let events = Arc::new(Mutex::new(Vec::new()));
            let manager = Arc::new(EventManager::new());
            let sink = Arc::clone(&events);
            manager.add_listener(Arc::new(move |event: &CrawlerEvent| {
                sink.lock().push(event.clone());
            }));

            let mut services = CrawlerServices {
                crawler_id: "test".to_string(),
                config: Arc::new(Config::new("test", std::env::temp_dir())),
                events: manager,
                reference_store: Arc::new(reference_store),
                document_checksummer: None,
                metadata_checksummer: None,
                committer: None,
            };
            customize(&mut services);

            Self {
                services: Arc::new(services),
                events,
            }
        }

        pub fn kinds(&self) -> Vec<CrawlerEventKind> {
            self.events.lock().iter().map(|e| e.kind).collect()
        }
    }

    pub(crate) fn context(
        harness: &Harness,
        cached: Option<ReferenceRecord>,
    ) -> DocumentPipelineContext {
        DocumentPipelineContext::new(
            Document::new("ref", b"content".to_vec()),
            ReferenceRecord::new("ref"),
            cached,
            Arc::clone(&harness.services),
        )
    }
}
