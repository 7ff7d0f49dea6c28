//! Data models for SMS Triage
//!
//! Records are serialized as JSON objects inside a single ordered array, so
//! field names here are part of the persisted format.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Title used when neither the message nor its body supplies one.
pub const FALLBACK_TITLE: &str = "New Message";

// =============================================================================
// Priority
// =============================================================================

/// Triage priority of a record.
///
/// Ordering follows severity weight, so `Low < Normal < High < Urgent`.
///
/// # Severity Weights
/// - `Low` = 1, `Normal` = 3, `High` = 5, `Urgent` = 8
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// All priorities from least to most severe.
    pub const ALL: [Self; 4] = [Self::Low, Self::Normal, Self::High, Self::Urgent];

    /// Lenient lookup used by the parser: unknown tokens map to `Normal`.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        Self::lookup(token).unwrap_or_default()
    }

    fn lookup(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "NORMAL" => Some(Self::Normal),
            "HIGH" => Some(Self::High),
            "URGENT" => Some(Self::Urgent),
            _ => None,
        }
    }

    /// Numeric severity used for sorting and tie-breaks.
    #[must_use]
    pub const fn weight(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 3,
            Self::High => 5,
            Self::Urgent => 8,
        }
    }

    /// Canonical uppercase token (`"HIGH"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    /// Human-facing label (`"High"`).
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Normal => "Normal",
            Self::High => "High",
            Self::Urgent => "Urgent",
        }
    }

    /// Notification channel a delivery collaborator should post to.
    #[must_use]
    pub const fn channel_id(self) -> &'static str {
        match self {
            Self::Low => "messages_low",
            Self::Normal => "messages_normal",
            Self::High => "messages_high",
            Self::Urgent => "messages_urgent",
        }
    }

    /// Only urgent alerts vibrate.
    #[must_use]
    pub const fn wants_vibration(self) -> bool {
        matches!(self, Self::Urgent)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse for user-supplied arguments.
impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::lookup(s).ok_or_else(|| Error::InvalidPriority(s.to_string()))
    }
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        Self::from_token(&value)
    }
}

impl From<Priority> for String {
    fn from(value: Priority) -> Self {
        value.as_str().to_string()
    }
}

// =============================================================================
// RecordId
// =============================================================================

/// Opaque record identifier: 32 lowercase hex characters (128 random bits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| Error::Internal(format!("RNG failure: {e}")))?;
        Ok(Self(hex::encode(bytes)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.trim().to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

// =============================================================================
// RecordDraft
// =============================================================================

/// A parsed, not yet stored, candidate record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub source_label: String,
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub origin_identifier: String,
}

impl RecordDraft {
    #[must_use]
    pub fn with_origin(mut self, origin_identifier: impl Into<String>) -> Self {
        self.origin_identifier = origin_identifier.into();
        self
    }
}

// =============================================================================
// TriageRecord
// =============================================================================

/// A stored, triaged notification.
///
/// # Constraints
/// - `id`: unique, immutable for the lifetime of the store.
/// - `title`: never empty, bounded by the store's configured display length.
/// - `created_at`: epoch milliseconds, non-decreasing in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageRecord {
    pub id: RecordId,
    pub source_label: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: i64,
    #[serde(default)]
    pub origin_identifier: String,
    #[serde(default)]
    pub is_read: bool,
}

impl TriageRecord {
    /// Build a record from a draft. The caller is responsible for the title
    /// invariant; see [`resolve_title`].
    #[must_use]
    pub fn from_draft(id: RecordId, draft: RecordDraft, created_at: i64) -> Self {
        Self {
            id,
            source_label: draft.source_label,
            title: draft.title,
            body: draft.body,
            priority: draft.priority,
            created_at,
            origin_identifier: draft.origin_identifier,
            is_read: false,
        }
    }

    /// Creation time as a UTC datetime, if the millisecond value is in range.
    #[must_use]
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_at)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// First `max_chars` characters of `s` (by `char`, never splitting a code point).
#[must_use]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Apply the stored-title rule: trimmed title, else the first non-empty body
/// line, else [`FALLBACK_TITLE`]; bounded to `max_chars`.
#[must_use]
pub fn resolve_title(title: &str, body: &str, max_chars: usize) -> String {
    let max_chars = max_chars.max(1);
    let trimmed = title.trim();
    if !trimmed.is_empty() {
        return truncate_chars(trimmed, max_chars);
    }
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map_or_else(
            || truncate_chars(FALLBACK_TITLE, max_chars),
            |line| truncate_chars(line, max_chars),
        )
}
