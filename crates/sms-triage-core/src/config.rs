//! Configuration management for SMS Triage
//!
//! Configuration is loaded from `TRIAGE_*` environment variables on top of
//! compiled-in defaults. Unparseable values fall back to the default rather
//! than failing startup.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default retention cap for the record store.
pub const DEFAULT_MAX_RECORDS: usize = 1000;
/// Default display bound for stored titles.
pub const DEFAULT_TITLE_MAX_CHARS: usize = 120;
/// Title length taken from the first line of an unstructured message.
pub const DEFAULT_UNSTRUCTURED_TITLE_CHARS: usize = 50;
/// Source label used when the message does not name an app.
pub const DEFAULT_SOURCE_LABEL: &str = "SMS";
/// Port the relay listens on.
pub const DEFAULT_RELAY_PORT: u16 = 5555;

/// Main configuration struct for SMS Triage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageConfig {
    // Storage
    pub storage_root: PathBuf,
    pub max_records: usize,

    // Parsing
    pub title_max_chars: usize,
    pub unstructured_title_chars: usize,
    pub default_source_label: String,

    // Relay
    pub relay_host: String,
    pub relay_port: u16,
    pub relay_workers: usize,
    pub relay_queue_depth: usize,
    pub relay_timeout_ms: u64,
    pub relay_max_line_bytes: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            max_records: DEFAULT_MAX_RECORDS,
            title_max_chars: DEFAULT_TITLE_MAX_CHARS,
            unstructured_title_chars: DEFAULT_UNSTRUCTURED_TITLE_CHARS,
            default_source_label: DEFAULT_SOURCE_LABEL.to_string(),
            relay_host: "127.0.0.1".to_string(),
            relay_port: DEFAULT_RELAY_PORT,
            relay_workers: 4,
            relay_queue_depth: 64,
            relay_timeout_ms: 2_000,
            relay_max_line_bytes: 1024,
        }
    }
}

impl TriageConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Storage
        if let Some(v) = env_value("TRIAGE_STORAGE_ROOT")
            && !v.trim().is_empty()
        {
            config.storage_root = PathBuf::from(v.trim());
        }
        config.max_records = env_usize("TRIAGE_MAX_RECORDS", config.max_records);

        // Parsing
        config.title_max_chars = env_usize("TRIAGE_TITLE_MAX_CHARS", config.title_max_chars);
        config.unstructured_title_chars = env_usize(
            "TRIAGE_UNSTRUCTURED_TITLE_CHARS",
            config.unstructured_title_chars,
        );
        if let Some(v) = env_value("TRIAGE_DEFAULT_SOURCE")
            && !v.trim().is_empty()
        {
            config.default_source_label = v.trim().to_string();
        }

        // Relay
        if let Some(v) = env_value("TRIAGE_RELAY_HOST")
            && !v.trim().is_empty()
        {
            config.relay_host = v.trim().to_string();
        }
        config.relay_port = env_u16("TRIAGE_RELAY_PORT", config.relay_port);
        config.relay_workers = env_usize("TRIAGE_RELAY_WORKERS", config.relay_workers);
        config.relay_queue_depth = env_usize("TRIAGE_RELAY_QUEUE_DEPTH", config.relay_queue_depth);
        config.relay_timeout_ms = env_u64("TRIAGE_RELAY_TIMEOUT_MS", config.relay_timeout_ms);
        config.relay_max_line_bytes =
            env_usize("TRIAGE_RELAY_MAX_LINE_BYTES", config.relay_max_line_bytes);

        config.clamp_limits();
        config
    }

    /// Zero limits would make the store or the relay unusable; raise them to 1.
    pub fn clamp_limits(&mut self) {
        self.max_records = self.max_records.max(1);
        self.title_max_chars = self.title_max_chars.max(1);
        self.unstructured_title_chars = self.unstructured_title_chars.max(1);
        self.relay_workers = self.relay_workers.max(1);
        self.relay_queue_depth = self.relay_queue_depth.max(1);
        self.relay_max_line_bytes = self.relay_max_line_bytes.max(16);
    }

    /// `host:port` the relay server binds and the client dials.
    #[must_use]
    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.relay_host, self.relay_port)
    }

    #[must_use]
    pub const fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }
}

fn default_storage_root() -> PathBuf {
    dirs::data_local_dir().map_or_else(
        || PathBuf::from(".sms-triage"),
        |dir| dir.join("sms-triage"),
    )
}

#[cfg(test)]
thread_local! {
    static TEST_ENV_OVERRIDES: std::cell::RefCell<HashMap<String, String>> =
        std::cell::RefCell::new(HashMap::new());
}

#[cfg(test)]
fn test_env_override_value(key: &str) -> Option<String> {
    TEST_ENV_OVERRIDES.with(|cell| cell.borrow().get(key).cloned())
}

/// Read a value from the process environment.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    #[cfg(test)]
    if let Some(v) = test_env_override_value(key) {
        return Some(v);
    }
    env::var(key).ok()
}

/// Collected `TRIAGE_*` variables, for diagnostics output.
#[must_use]
pub fn triage_env_snapshot() -> HashMap<String, String> {
    env::vars()
        .filter(|(k, _)| k.starts_with("TRIAGE_"))
        .collect()
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
