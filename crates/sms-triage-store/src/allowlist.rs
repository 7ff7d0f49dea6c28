//! Origin allow-list.
//!
//! An empty list admits every origin. Once any entry exists, only origins
//! whose normalized digits match an entry are admitted.

use std::sync::Arc;

use sms_triage_core::error::{Error, Result};
use sms_triage_core::lock_order::{LockLevel, OrderedRwLock};

use crate::medium::Medium;

/// Medium key the entries are persisted under.
pub const ALLOW_LIST_KEY: &str = "allow_list";

/// Normalize an origin identifier: keep a leading `+` and every ASCII digit,
/// drop everything else (spaces, dashes, parentheses, letters, inner `+`).
#[must_use]
pub fn normalize_origin(raw: &str) -> String {
    let trimmed = raw.trim_start();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(char::is_ascii_digit));
    out
}

/// Digits used for matching; the leading `+` is presentation only.
fn match_key(normalized: &str) -> &str {
    normalized.strip_prefix('+').unwrap_or(normalized)
}

/// Persisted set of permitted origin identifiers.
pub struct AllowList {
    medium: Arc<dyn Medium>,
    entries: OrderedRwLock<Vec<String>>,
}

impl AllowList {
    /// Load the allow-list from `medium`. Missing or corrupt data yields an
    /// empty (allow-all) list.
    #[must_use]
    pub fn open(medium: Arc<dyn Medium>) -> Self {
        let entries = load_entries(medium.as_ref());
        Self {
            medium,
            entries: OrderedRwLock::new(LockLevel::StoreAllowList, entries),
        }
    }

    /// Whether `origin` may produce a stored record.
    ///
    /// Re-reads the medium first, so entries changed through another handle
    /// (another process) apply to the next message.
    #[must_use]
    pub fn is_allowed(&self, origin: &str) -> bool {
        let entries = self.current();
        if entries.is_empty() {
            return true;
        }
        let normalized = normalize_origin(origin);
        let key = match_key(&normalized);
        if key.is_empty() {
            return false;
        }
        entries.iter().any(|entry| match_key(entry) == key)
    }

    /// Add an origin. Returns `false` if an equivalent entry already exists.
    pub fn add_entry(&self, origin: &str) -> Result<bool> {
        let normalized = normalize_origin(origin);
        let key = match_key(&normalized);
        if key.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "origin {origin:?} contains no digits"
            )));
        }
        self.rewrite(|entries| {
            if entries.iter().any(|e| match_key(e) == key) {
                return false;
            }
            entries.push(normalized.clone());
            true
        })
    }

    /// Remove an origin. Returns whether an entry was removed.
    pub fn remove_entry(&self, origin: &str) -> Result<bool> {
        let normalized = normalize_origin(origin);
        let key = match_key(&normalized);
        self.rewrite(|entries| {
            let before = entries.len();
            entries.retain(|e| match_key(e) != key);
            entries.len() != before
        })
    }

    /// Drop every entry, returning to allow-all.
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write();
        self.medium.remove(ALLOW_LIST_KEY)?;
        entries.clear();
        Ok(())
    }

    /// Normalized entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.current()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Reload from the medium into the cached copy. A failed read keeps the
    /// cached entries rather than opening the gate.
    fn current(&self) -> Vec<String> {
        let mut cached = self.entries.write();
        match self.medium.load(ALLOW_LIST_KEY) {
            Ok(bytes) => *cached = bytes.map(|b| decode_entries(&b)).unwrap_or_default(),
            Err(e) => tracing::warn!("[allow-list] reload failed, keeping cached entries: {e}"),
        }
        cached.clone()
    }

    /// Apply `change` to the persisted entries under the medium's
    /// read-modify-write section; writes back only when it reports a change.
    fn rewrite(&self, mut change: impl FnMut(&mut Vec<String>) -> bool) -> Result<bool> {
        let mut cached = self.entries.write();
        let mut applied = None;
        self.medium.update(ALLOW_LIST_KEY, &mut |current| {
            let mut entries = current.map(decode_entries).unwrap_or_default();
            let changed = change(&mut entries);
            let bytes = if changed {
                Some(serde_json::to_vec(&entries)?)
            } else {
                None
            };
            applied = Some((changed, entries));
            Ok(bytes)
        })?;
        let (changed, entries) = applied.ok_or_else(|| {
            Error::Internal("medium finished an update without running it".to_string())
        })?;
        *cached = entries;
        Ok(changed)
    }
}

fn load_entries(medium: &dyn Medium) -> Vec<String> {
    match medium.load(ALLOW_LIST_KEY) {
        Ok(bytes) => bytes.map(|b| decode_entries(&b)).unwrap_or_default(),
        Err(e) => {
            tracing::warn!("[allow-list] load failed, treating as empty: {e}");
            Vec::new()
        }
    }
}

fn decode_entries(bytes: &[u8]) -> Vec<String> {
    let raw: Vec<String> = match serde_json::from_slice(bytes) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("[allow-list] corrupt data, treating as empty: {e}");
            return Vec::new();
        }
    };
    // Re-normalize and dedupe in case the blob was written by hand.
    let mut entries: Vec<String> = Vec::with_capacity(raw.len());
    for entry in raw {
        let normalized = normalize_origin(&entry);
        let key = match_key(&normalized);
        if !key.is_empty() && !entries.iter().any(|e| match_key(e) == key) {
            entries.push(normalized);
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MemoryMedium;
    use proptest::prelude::*;

    fn list() -> (Arc<MemoryMedium>, AllowList) {
        let medium = Arc::new(MemoryMedium::new());
        let list = AllowList::open(medium.clone());
        (medium, list)
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize_origin("+1 (234) 567-8900"), "+12345678900");
        assert_eq!(normalize_origin("0712 345 678"), "0712345678");
        assert_eq!(normalize_origin("  +40-7+12"), "+40712");
        assert_eq!(normalize_origin("Unknown"), "");
    }

    #[test]
    fn empty_list_allows_everything() {
        let (_, list) = list();
        assert!(list.is_allowed("+40712345678"));
        assert!(list.is_allowed(""));
        assert!(list.is_allowed("Unknown"));
    }

    #[test]
    fn exact_match_after_normalization() {
        let (_, list) = list();
        assert!(list.add_entry("+1 (234) 567-8900").unwrap());
        assert!(list.is_allowed("12345678900"));
        assert!(list.is_allowed("+1-234-567-8900"));
        assert!(!list.is_allowed("+1234567899"));
        assert!(!list.is_allowed("123456789000"));
        assert!(!list.is_allowed(""));
    }

    #[test]
    fn add_is_idempotent() {
        let (_, list) = list();
        assert!(list.add_entry("+40712345678").unwrap());
        assert!(!list.add_entry("+40 712 345 678").unwrap());
        assert!(!list.add_entry("40712345678").unwrap());
        assert_eq!(list.entries(), vec!["+40712345678".to_string()]);
    }

    #[test]
    fn add_rejects_digitless_origin() {
        let (_, list) = list();
        let err = list.add_entry("Unknown").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(list.is_empty());
    }

    #[test]
    fn remove_uses_normalized_form() {
        let (_, list) = list();
        list.add_entry("+40712345678").unwrap();
        list.add_entry("+40700000000").unwrap();
        assert!(list.remove_entry("+40 712-345-678").unwrap());
        assert!(!list.remove_entry("+40712345678").unwrap());
        assert_eq!(list.entries(), vec!["+40700000000".to_string()]);
    }

    #[test]
    fn entries_survive_reopen() {
        let (medium, list) = list();
        list.add_entry("+40712345678").unwrap();
        drop(list);
        let reopened = AllowList::open(medium);
        assert!(reopened.is_allowed("+40712345678"));
        assert!(!reopened.is_allowed("+40700000000"));
    }

    #[test]
    fn clear_restores_allow_all() {
        let (medium, list) = list();
        list.add_entry("+40712345678").unwrap();
        list.clear().unwrap();
        assert!(list.is_allowed("+1"));
        assert!(!medium.contains(ALLOW_LIST_KEY));
    }

    #[test]
    fn changes_through_another_handle_apply_immediately() {
        let medium = Arc::new(MemoryMedium::new());
        let server = AllowList::open(medium.clone());
        let admin = AllowList::open(medium);
        assert!(server.is_allowed("+40712345678"));

        admin.add_entry("+40700000000").unwrap();
        assert!(!server.is_allowed("+40712345678"));
        assert!(server.is_allowed("+40700000000"));

        admin.clear().unwrap();
        assert!(server.is_allowed("+40712345678"));
    }

    #[test]
    fn concurrent_admins_keep_each_others_entries() {
        let medium = Arc::new(MemoryMedium::new());
        let first = AllowList::open(medium.clone());
        let second = AllowList::open(medium.clone());
        assert!(first.add_entry("+40711111111").unwrap());
        assert!(second.add_entry("+40722222222").unwrap());
        assert!(!first.add_entry("+40722222222").unwrap());
        assert!(first.remove_entry("+40711111111").unwrap());

        let reopened = AllowList::open(medium);
        assert_eq!(reopened.entries(), vec!["+40722222222".to_string()]);
    }

    #[test]
    fn corrupt_blob_is_treated_as_empty() {
        let medium = Arc::new(MemoryMedium::new());
        medium.put_raw(ALLOW_LIST_KEY, "{not json");
        let list = AllowList::open(medium);
        assert!(list.is_empty());
        assert!(list.is_allowed("+40712345678"));
    }

    #[test]
    fn hand_written_blob_is_renormalized() {
        let medium = Arc::new(MemoryMedium::new());
        medium.put_raw(ALLOW_LIST_KEY, r#"["+40 712 345 678", "40712345678", "junk"]"#);
        let list = AllowList::open(medium);
        assert_eq!(list.entries(), vec!["+40712345678".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_normalized_form_is_plus_and_digits(raw in ".{0,40}") {
            let normalized = normalize_origin(&raw);
            let digits = normalized.strip_prefix('+').unwrap_or(&normalized);
            prop_assert!(digits.chars().all(|c| c.is_ascii_digit()));
            prop_assert_eq!(normalize_origin(&normalized), normalized.clone());
        }

        #[test]
        fn prop_added_entry_admits_its_own_formatting(
            digits in "[0-9]{4,15}",
            sep in "[ ()-]{0,3}",
        ) {
            let (_, list) = list();
            let formatted = format!("+{}{sep}{}", &digits[..2], &digits[2..]);
            list.add_entry(&formatted).unwrap();
            prop_assert!(list.is_allowed(&digits));
            prop_assert!(list.is_allowed(&formatted));
        }
    }
}
