//! Record store, allow-list, and persistence media for SMS Triage
//!
//! Both the [`RecordStore`] and the [`AllowList`] persist through a shared
//! [`Medium`] under independent keys, so one directory (or one in-memory
//! map) backs a whole engine instance.

#![forbid(unsafe_code)]

pub mod allowlist;
pub mod medium;
pub mod store;

pub use allowlist::{ALLOW_LIST_KEY, AllowList, normalize_origin};
pub use medium::{FileMedium, Medium, MemoryMedium, Rewrite};
pub use store::{RECORDS_KEY, RecordStore, SourceCounts, Statistics, StoreOptions};
