//! Ingestion: parse → allow-list check → store.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use sms_triage_core::error::Result;
use sms_triage_core::models::{Priority, TriageRecord};
use sms_triage_store::{AllowList, RecordStore};

use crate::parser::MessageParser;

/// Why an incoming message produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    OriginNotAllowed,
}

impl DropReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OriginNotAllowed => "origin not allowed",
        }
    }

    /// Wire token used by the relay (`NOT_ALLOWED`).
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::OriginNotAllowed => "NOT_ALLOWED",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Stored(TriageRecord),
    Dropped(DropReason),
}

impl Outcome {
    #[must_use]
    pub const fn is_stored(&self) -> bool {
        matches!(self, Self::Stored(_))
    }

    #[must_use]
    pub const fn record(&self) -> Option<&TriageRecord> {
        match self {
            Self::Stored(record) => Some(record),
            Self::Dropped(_) => None,
        }
    }
}

/// What a user-facing alert for a stored record needs to carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub channel_id: &'static str,
    pub priority: Priority,
    pub source_label: String,
    pub title: String,
    pub body: String,
    pub vibrate: bool,
}

impl From<&TriageRecord> for AlertSummary {
    fn from(record: &TriageRecord) -> Self {
        Self {
            channel_id: record.priority.channel_id(),
            priority: record.priority,
            source_label: record.source_label.clone(),
            title: record.title.clone(),
            body: record.body.clone(),
            vibrate: record.priority.wants_vibration(),
        }
    }
}

/// Gate, parse, and persist incoming messages.
pub struct IngestionPipeline {
    parser: MessageParser,
    allow_list: Arc<AllowList>,
    store: Arc<RecordStore>,
}

impl IngestionPipeline {
    #[must_use]
    pub const fn new(
        parser: MessageParser,
        allow_list: Arc<AllowList>,
        store: Arc<RecordStore>,
    ) -> Self {
        Self {
            parser,
            allow_list,
            store,
        }
    }

    /// Ingest one message from `origin`.
    ///
    /// A disallowed origin leaves the store untouched. Storage failures
    /// propagate.
    pub fn ingest(&self, raw: &str, hint: &str, origin: &str) -> Result<Outcome> {
        let (draft, form) = self.parser.parse_with_form(raw, hint);
        tracing::debug!(
            form = form.as_str(),
            source = %draft.source_label,
            priority = %draft.priority,
            "[pipeline] parsed"
        );

        if !self.allow_list.is_allowed(origin) {
            tracing::debug!(origin, "[pipeline] dropped: origin not allowed");
            return Ok(Outcome::Dropped(DropReason::OriginNotAllowed));
        }

        let draft = draft.with_origin(origin.trim());
        let record = self.store.insert(draft)?;
        tracing::info!(
            id = %record.id,
            source = %record.source_label,
            priority = %record.priority,
            "[pipeline] stored"
        );
        Ok(Outcome::Stored(record))
    }

    #[must_use]
    pub const fn parser(&self) -> &MessageParser {
        &self.parser
    }

    #[must_use]
    pub fn allow_list(&self) -> &Arc<AllowList> {
        &self.allow_list
    }

    #[must_use]
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sms_triage_store::{Medium, MemoryMedium, StoreOptions};

    fn pipeline() -> IngestionPipeline {
        let medium: Arc<dyn Medium> = Arc::new(MemoryMedium::new());
        let allow_list = Arc::new(AllowList::open(Arc::clone(&medium)));
        let store = Arc::new(RecordStore::open(medium, StoreOptions::default()));
        IngestionPipeline::new(MessageParser::default(), allow_list, store)
    }

    #[test]
    fn stores_when_allow_list_empty() {
        let pipeline = pipeline();
        let outcome = pipeline
            .ingest("[APP:Server] URGENT: Disk low | /var at 98%", "SMS", "+40712345678")
            .unwrap();
        let record = outcome.record().unwrap();
        assert_eq!(record.source_label, "Server");
        assert_eq!(record.priority, Priority::Urgent);
        assert_eq!(record.title, "Disk low");
        assert_eq!(record.body, "/var at 98%");
        assert_eq!(record.origin_identifier, "+40712345678");
        assert!(!record.is_read);
        assert_eq!(pipeline.store().len(), 1);
    }

    #[test]
    fn drops_disallowed_origin_without_touching_store() {
        let pipeline = pipeline();
        pipeline.allow_list().add_entry("+40712345678").unwrap();
        let outcome = pipeline.ingest("hello", "SMS", "+40700000000").unwrap();
        assert_eq!(outcome, Outcome::Dropped(DropReason::OriginNotAllowed));
        assert!(pipeline.store().is_empty());
    }

    #[test]
    fn admits_listed_origin_in_other_formatting() {
        let pipeline = pipeline();
        pipeline.allow_list().add_entry("+1 (234) 567-8900").unwrap();
        assert!(pipeline.ingest("hi", "SMS", "12345678900").unwrap().is_stored());
    }

    #[test]
    fn blank_title_gets_fallback() {
        let pipeline = pipeline();
        let outcome = pipeline.ingest("", "SMS", "").unwrap();
        assert_eq!(outcome.record().unwrap().title, "New Message");
    }

    #[test]
    fn alert_summary_follows_priority() {
        let pipeline = pipeline();
        let outcome = pipeline.ingest("[APP:X] URGENT: y", "SMS", "1").unwrap();
        let alert = AlertSummary::from(outcome.record().unwrap());
        assert_eq!(alert.channel_id, "messages_urgent");
        assert!(alert.vibrate);

        let outcome = pipeline.ingest("[APP:X] LOW: y", "SMS", "1").unwrap();
        let alert = AlertSummary::from(outcome.record().unwrap());
        assert_eq!(alert.channel_id, "messages_low");
        assert!(!alert.vibrate);
    }

    #[test]
    fn drop_reason_renders() {
        assert_eq!(DropReason::OriginNotAllowed.to_string(), "origin not allowed");
        assert_eq!(DropReason::OriginNotAllowed.code(), "NOT_ALLOWED");
    }
}
