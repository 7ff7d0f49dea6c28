//! Message parsing, triage views, ingestion, and the relay for SMS Triage.
//!
//! [`Engine`] wires a persistence medium into one record store, one
//! allow-list, and one ingestion pipeline. Build it once at startup and pass
//! the handles where they are needed.

#![forbid(unsafe_code)]

pub mod parser;
pub mod pipeline;
pub mod query;
pub mod relay;

use std::sync::Arc;

use sms_triage_core::config::TriageConfig;
use sms_triage_core::error::Result;
use sms_triage_store::{AllowList, FileMedium, Medium, MemoryMedium, RecordStore, StoreOptions};

pub use parser::{MessageForm, MessageParser, parse};
pub use pipeline::{AlertSummary, DropReason, IngestionPipeline, Outcome};
pub use query::{
    ReadFilter, SortOrder, SourceGroup, TriageView, filter_by_priority, filter_by_read_state,
    group_by_source, sort_by_recency, sort_by_severity,
};

/// Shared handles for one triage instance.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<RecordStore>,
    pub allow_list: Arc<AllowList>,
    pub pipeline: Arc<IngestionPipeline>,
}

impl Engine {
    /// Open over `medium` with limits from `config`.
    #[must_use]
    pub fn with_medium(medium: Arc<dyn Medium>, config: &TriageConfig) -> Self {
        let store = Arc::new(RecordStore::open(
            Arc::clone(&medium),
            StoreOptions::from(config),
        ));
        let allow_list = Arc::new(AllowList::open(medium));
        let pipeline = Arc::new(IngestionPipeline::new(
            MessageParser::from(config),
            Arc::clone(&allow_list),
            Arc::clone(&store),
        ));
        Self {
            store,
            allow_list,
            pipeline,
        }
    }

    /// Open the file-backed instance at `config.storage_root`.
    pub fn open(config: &TriageConfig) -> Result<Self> {
        let medium = FileMedium::open(config.storage_root.clone())?;
        tracing::debug!(root = %config.storage_root.display(), "[engine] opened");
        Ok(Self::with_medium(Arc::new(medium), config))
    }

    /// Process-local instance that persists nothing.
    #[must_use]
    pub fn in_memory(config: &TriageConfig) -> Self {
        Self::with_medium(Arc::new(MemoryMedium::new()), config)
    }
}
