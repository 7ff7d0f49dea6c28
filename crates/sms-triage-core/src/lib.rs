//! Core types, configuration, and errors for SMS Triage
//!
//! This crate provides:
//! - Configuration management (`TriageConfig`, environment parsing)
//! - Data models (`TriageRecord`, `RecordDraft`, `Priority`, `RecordId`)
//! - The workspace lock hierarchy (`OrderedMutex`, `OrderedRwLock`)
//! - Common error types

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod lock_order;
pub mod models;

// Re-export key types for convenience
pub use config::TriageConfig;
pub use error::{Error as TriageError, Result as TriageResult};
pub use lock_order::{LockLevel, OrderedMutex, OrderedRwLock};
pub use models::{
    FALLBACK_TITLE, Priority, RecordDraft, RecordId, TriageRecord, now_millis, resolve_title,
    truncate_chars,
};
