//! Bounded, ordered record store.
//!
//! Records are kept newest-first. Every mutation is one load → modify →
//! store unit inside [`Medium::update`], taken while holding the store's
//! write lock, so other stores sharing the medium never interleave with it.
//! The in-memory snapshot is only replaced after the medium accepted the new
//! state, so a failed write leaves readers on the previous state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use sms_triage_core::config::{DEFAULT_MAX_RECORDS, DEFAULT_TITLE_MAX_CHARS, TriageConfig};
use sms_triage_core::error::{Error, Result};
use sms_triage_core::lock_order::{LockLevel, OrderedRwLock};
use sms_triage_core::models::{
    Priority, RecordDraft, RecordId, TriageRecord, now_millis, resolve_title,
};

use crate::medium::Medium;

/// Medium key the record collection is persisted under.
pub const RECORDS_KEY: &str = "records";

/// Limits applied by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Retention cap; the oldest records are evicted beyond it.
    pub max_records: usize,
    /// Display bound for stored titles, in characters.
    pub title_max_chars: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            title_max_chars: DEFAULT_TITLE_MAX_CHARS,
        }
    }
}

impl From<&TriageConfig> for StoreOptions {
    fn from(config: &TriageConfig) -> Self {
        Self {
            max_records: config.max_records.max(1),
            title_max_chars: config.title_max_chars.max(1),
        }
    }
}

/// Per-source totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub total: usize,
    pub unread: usize,
}

/// Summary figures for a statistics panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: usize,
    pub unread: usize,
    pub by_source: IndexMap<String, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
}

/// Owner of all triage records.
pub struct RecordStore {
    medium: Arc<dyn Medium>,
    options: StoreOptions,
    records: OrderedRwLock<Vec<TriageRecord>>,
}

impl RecordStore {
    /// Open the store over `medium`. Missing or corrupt data yields an empty
    /// store; an over-long persisted collection is cut to the cap.
    #[must_use]
    pub fn open(medium: Arc<dyn Medium>, options: StoreOptions) -> Self {
        let options = StoreOptions {
            max_records: options.max_records.max(1),
            title_max_chars: options.title_max_chars.max(1),
        };
        let mut records = read_records(medium.as_ref());
        records.truncate(options.max_records);
        tracing::debug!(count = records.len(), "[store] opened");
        Self {
            medium,
            options,
            records: OrderedRwLock::new(LockLevel::StoreRecords, records),
        }
    }

    #[must_use]
    pub const fn options(&self) -> StoreOptions {
        self.options
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Store a draft as a new record at the head of the collection.
    pub fn insert(&self, draft: RecordDraft) -> Result<TriageRecord> {
        let title_max_chars = self.options.title_max_chars;
        let max_records = self.options.max_records;
        let mut draft = Some(draft);
        self.mutate(|next| {
            let draft = draft.take().ok_or_else(rewrite_repeated)?;
            let mut id = RecordId::generate()?;
            while next.iter().any(|r| r.id == id) {
                id = RecordId::generate()?;
            }
            let now = now_millis();
            let created_at = next.first().map_or(now, |newest| now.max(newest.created_at));

            let mut record = TriageRecord::from_draft(id, draft, created_at);
            record.title = resolve_title(&record.title, &record.body, title_max_chars);

            next.insert(0, record.clone());
            if next.len() > max_records {
                let evicted = next.len() - max_records;
                next.truncate(max_records);
                tracing::debug!(evicted, "[store] retention cap reached");
            }
            Ok((record, true))
        })
    }

    /// Replace the record at `id` with `mutator`'s result.
    ///
    /// The store keeps ownership of `id` and `created_at` and re-applies the
    /// title rule. Returns `Ok(None)` when no record has that id.
    pub fn update<F>(&self, id: &RecordId, mutator: F) -> Result<Option<TriageRecord>>
    where
        F: FnOnce(TriageRecord) -> TriageRecord,
    {
        let title_max_chars = self.options.title_max_chars;
        let mut mutator = Some(mutator);
        self.mutate(|next| {
            let Some(index) = next.iter().position(|r| &r.id == id) else {
                return Ok((None, false));
            };
            let mutator = mutator.take().ok_or_else(rewrite_repeated)?;
            let current = next[index].clone();
            let mut updated = mutator(current.clone());
            updated.id = current.id;
            updated.created_at = current.created_at;
            updated.title = resolve_title(&updated.title, &updated.body, title_max_chars);
            next[index] = updated.clone();
            Ok((Some(updated), true))
        })
    }

    /// Remove the record at `id`. Returns whether one was removed.
    pub fn delete(&self, id: &RecordId) -> Result<bool> {
        self.mutate(|next| {
            let before = next.len();
            next.retain(|r| &r.id != id);
            let removed = next.len() != before;
            Ok((removed, removed))
        })
    }

    /// Mark one record read. Returns whether the record exists.
    pub fn mark_read(&self, id: &RecordId) -> Result<bool> {
        self.mutate(|next| match next.iter_mut().find(|r| &r.id == id) {
            Some(record) if !record.is_read => {
                record.is_read = true;
                Ok((true, true))
            }
            Some(_) => Ok((true, false)),
            None => Ok((false, false)),
        })
    }

    /// Mark every record read. Returns how many changed state.
    pub fn mark_all_read(&self) -> Result<usize> {
        self.mutate(|next| {
            let mut changed = 0usize;
            for record in next.iter_mut().filter(|r| !r.is_read) {
                record.is_read = true;
                changed += 1;
            }
            Ok((changed, changed > 0))
        })
    }

    /// Remove every record.
    pub fn clear_all(&self) -> Result<()> {
        let mut snapshot = self.records.write();
        self.medium.remove(RECORDS_KEY)?;
        snapshot.clear();
        tracing::info!("[store] cleared");
        Ok(())
    }

    /// Re-read the medium into the snapshot (picks up writes made by another
    /// process sharing the same medium).
    pub fn refresh(&self) {
        let mut snapshot = self.records.write();
        let mut next = read_records(self.medium.as_ref());
        next.truncate(self.options.max_records);
        *snapshot = next;
    }

    /// Run `change` over the persisted collection inside the medium's
    /// read-modify-write section. `change` returns its result and whether the
    /// collection must be written back. The snapshot is swapped only once the
    /// medium accepted the write.
    fn mutate<T>(
        &self,
        mut change: impl FnMut(&mut Vec<TriageRecord>) -> Result<(T, bool)>,
    ) -> Result<T> {
        let mut snapshot = self.records.write();
        let mut applied = None;
        self.medium.update(RECORDS_KEY, &mut |current| {
            let mut next = current.map(decode_records).unwrap_or_default();
            let (value, dirty) = change(&mut next)?;
            let bytes = if dirty {
                Some(serde_json::to_vec(&next)?)
            } else {
                None
            };
            applied = Some((value, next));
            Ok(bytes)
        })?;
        let (value, next) = applied.ok_or_else(|| {
            Error::Internal("medium finished an update without running it".to_string())
        })?;
        *snapshot = next;
        Ok(value)
    }

    // -------------------------------------------------------------------------
    // Reads (snapshot copies, never live views)
    // -------------------------------------------------------------------------

    /// All records, newest first.
    #[must_use]
    pub fn query(&self) -> Vec<TriageRecord> {
        self.records.read().clone()
    }

    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<TriageRecord> {
        self.records.read().iter().find(|r| &r.id == id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.records.read().iter().filter(|r| !r.is_read).count()
    }

    /// Records whose `source_label` equals `label`, newest first.
    #[must_use]
    pub fn by_source(&self, label: &str) -> Vec<TriageRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.source_label == label)
            .cloned()
            .collect()
    }

    /// Distinct source labels, sorted ascending.
    #[must_use]
    pub fn source_labels(&self) -> Vec<String> {
        self.records
            .read()
            .iter()
            .map(|r| r.source_label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// `source_label → (total, unread)`, in first-seen (newest-first) order.
    #[must_use]
    pub fn aggregate_by_source(&self) -> IndexMap<String, SourceCounts> {
        source_counts_of(&self.records.read())
    }

    /// `priority → count` for priorities present in the store.
    #[must_use]
    pub fn aggregate_by_priority(&self) -> BTreeMap<Priority, usize> {
        priority_counts_of(&self.records.read())
    }

    /// Totals and breakdowns, all taken from the same snapshot.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        let records = self.records.read();
        Statistics {
            total: records.len(),
            unread: records.iter().filter(|r| !r.is_read).count(),
            by_source: source_counts_of(&records)
                .into_iter()
                .map(|(label, counts)| (label, counts.total))
                .collect(),
            by_priority: priority_counts_of(&records),
        }
    }
}

fn source_counts_of(records: &[TriageRecord]) -> IndexMap<String, SourceCounts> {
    let mut out: IndexMap<String, SourceCounts> = IndexMap::new();
    for record in records {
        let counts = out.entry(record.source_label.clone()).or_default();
        counts.total += 1;
        if !record.is_read {
            counts.unread += 1;
        }
    }
    out
}

fn priority_counts_of(records: &[TriageRecord]) -> BTreeMap<Priority, usize> {
    let mut out = BTreeMap::new();
    for record in records {
        *out.entry(record.priority).or_insert(0) += 1;
    }
    out
}

fn rewrite_repeated() -> Error {
    Error::Internal("medium ran a record rewrite twice".to_string())
}

/// Read path: every failure degrades to an empty collection.
fn read_records(medium: &dyn Medium) -> Vec<TriageRecord> {
    match medium.load(RECORDS_KEY) {
        Ok(bytes) => bytes.map(|bytes| decode_records(&bytes)).unwrap_or_default(),
        Err(e) => {
            tracing::warn!("[store] load failed, treating as empty: {e}");
            Vec::new()
        }
    }
}

fn decode_records(bytes: &[u8]) -> Vec<TriageRecord> {
    serde_json::from_slice(bytes).unwrap_or_else(|e| {
        tracing::warn!("[store] corrupt record data, treating as empty: {e}");
        Vec::new()
    })
}
