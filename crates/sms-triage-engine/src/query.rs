//! Pure views over a record snapshot: filter, sort, group.
//!
//! None of these touch the store; callers pass in `RecordStore::query()`
//! output (or any slice of records) and get an owned result back.

use std::cmp::Reverse;

use indexmap::IndexMap;
use serde::Serialize;
use sms_triage_core::models::{Priority, TriageRecord};

/// Read-state filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadFilter {
    #[default]
    All,
    UnreadOnly,
}

impl ReadFilter {
    #[must_use]
    pub const fn admits(self, record: &TriageRecord) -> bool {
        match self {
            Self::All => true,
            Self::UnreadOnly => !record.is_read,
        }
    }
}

/// Records matching `filter`, order preserved.
#[must_use]
pub fn filter_by_read_state(records: &[TriageRecord], filter: ReadFilter) -> Vec<TriageRecord> {
    records
        .iter()
        .filter(|r| filter.admits(r))
        .cloned()
        .collect()
}

/// Records with exactly `priority`; `None` keeps everything.
#[must_use]
pub fn filter_by_priority(
    records: &[TriageRecord],
    priority: Option<Priority>,
) -> Vec<TriageRecord> {
    records
        .iter()
        .filter(|r| priority.is_none_or(|p| r.priority == p))
        .cloned()
        .collect()
}

/// Newest first. Stable, so equal timestamps keep their input order.
#[must_use]
pub fn sort_by_recency(mut records: Vec<TriageRecord>) -> Vec<TriageRecord> {
    records.sort_by_key(|r| Reverse(r.created_at));
    records
}

/// Most severe first, newest first within a priority.
#[must_use]
pub fn sort_by_severity(mut records: Vec<TriageRecord>) -> Vec<TriageRecord> {
    records.sort_by_key(|r| (Reverse(r.priority.weight()), Reverse(r.created_at)));
    records
}

/// One row of the by-source grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceGroup {
    pub source_label: String,
    pub total: usize,
    pub unread: usize,
}

/// Group by source label. Largest groups first; ties by label ascending.
#[must_use]
pub fn group_by_source(records: &[TriageRecord]) -> Vec<SourceGroup> {
    let mut groups: IndexMap<&str, SourceGroup> = IndexMap::new();
    for record in records {
        let group = groups
            .entry(record.source_label.as_str())
            .or_insert_with(|| SourceGroup {
                source_label: record.source_label.clone(),
                total: 0,
                unread: 0,
            });
        group.total += 1;
        if !record.is_read {
            group.unread += 1;
        }
    }
    let mut groups: Vec<SourceGroup> = groups.into_values().collect();
    groups.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| a.source_label.cmp(&b.source_label))
    });
    groups
}

/// Ordering applied by [`TriageView::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Recency,
    Severity,
}

/// A combined filter + sort, as a UI list would request it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriageView {
    pub read: ReadFilter,
    pub priority: Option<Priority>,
    pub source_label: Option<String>,
    pub order: SortOrder,
}

impl TriageView {
    #[must_use]
    pub fn apply(&self, records: &[TriageRecord]) -> Vec<TriageRecord> {
        let filtered: Vec<TriageRecord> = records
            .iter()
            .filter(|r| self.read.admits(r))
            .filter(|r| self.priority.is_none_or(|p| r.priority == p))
            .filter(|r| {
                self.source_label
                    .as_deref()
                    .is_none_or(|s| r.source_label == s)
            })
            .cloned()
            .collect();
        match self.order {
            SortOrder::Recency => sort_by_recency(filtered),
            SortOrder::Severity => sort_by_severity(filtered),
        }
    }
}
