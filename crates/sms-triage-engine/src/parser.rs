//! Raw message text → [`RecordDraft`].
//!
//! Three forms are recognized, tried in order:
//!
//! 1. **Structured**: `[APP:<name>] <PRIORITY>: <title> | <body>`. The
//!    priority prefix is optional and case-insensitive; so is the `|` split.
//! 2. **Unstructured**: any text not starting with `[APP:`. The first line
//!    (cut to the configured width) is the title, the remaining lines are the
//!    body.
//! 3. **Fallback**: a `[APP:` prefix without a usable closing bracket. The
//!    text is split at the configured width, title first.
//!
//! Parsing never fails; every input yields a draft.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sms_triage_core::config::{
    DEFAULT_SOURCE_LABEL, DEFAULT_UNSTRUCTURED_TITLE_CHARS, TriageConfig,
};
use sms_triage_core::models::{Priority, RecordDraft, truncate_chars};

const APP_PREFIX: &str = "[APP:";

static PRIORITY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(LOW|NORMAL|HIGH|URGENT):").expect("priority prefix regex")
});

/// Which rule produced a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageForm {
    Structured,
    Unstructured,
    Fallback,
}

impl MessageForm {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Unstructured => "unstructured",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for MessageForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless parser over the unstructured title width and the label used
/// when a caller passes a blank hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageParser {
    title_chars: usize,
    default_label: String,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(DEFAULT_UNSTRUCTURED_TITLE_CHARS)
    }
}

impl From<&TriageConfig> for MessageParser {
    fn from(config: &TriageConfig) -> Self {
        Self::new(config.unstructured_title_chars)
            .with_default_label(&config.default_source_label)
    }
}

impl MessageParser {
    #[must_use]
    pub fn new(title_chars: usize) -> Self {
        Self {
            title_chars: title_chars.max(1),
            default_label: DEFAULT_SOURCE_LABEL.to_string(),
        }
    }

    /// Label for blank hints. A blank `label` keeps the built-in default.
    #[must_use]
    pub fn with_default_label(mut self, label: &str) -> Self {
        if !label.trim().is_empty() {
            self.default_label = label.trim().to_string();
        }
        self
    }

    #[must_use]
    pub const fn title_chars(&self) -> usize {
        self.title_chars
    }

    #[must_use]
    pub fn default_label(&self) -> &str {
        &self.default_label
    }

    /// Parse `raw`; `hint` becomes the source label unless the message names
    /// its own app.
    #[must_use]
    pub fn parse(&self, raw: &str, hint: &str) -> RecordDraft {
        self.parse_with_form(raw, hint).0
    }

    /// Like [`parse`](Self::parse), also reporting which form matched.
    #[must_use]
    pub fn parse_with_form(&self, raw: &str, hint: &str) -> (RecordDraft, MessageForm) {
        let hint = if hint.trim().is_empty() {
            self.default_label.as_str()
        } else {
            hint.trim()
        };

        if !raw.starts_with(APP_PREFIX) {
            return (self.parse_unstructured(raw, hint), MessageForm::Unstructured);
        }
        match raw.find(']') {
            Some(end) if end > APP_PREFIX.len() => {
                (parse_structured(raw, end, hint), MessageForm::Structured)
            }
            _ => (self.parse_fallback(raw, hint), MessageForm::Fallback),
        }
    }

    fn parse_unstructured(&self, raw: &str, hint: &str) -> RecordDraft {
        let mut lines = split_lines(raw);
        let title = lines
            .next()
            .map(|first| truncate_chars(first, self.title_chars))
            .unwrap_or_default();
        let body = lines.collect::<Vec<_>>().join("\n");
        RecordDraft {
            source_label: hint.to_string(),
            title,
            body,
            priority: Priority::Normal,
            origin_identifier: String::new(),
        }
    }

    fn parse_fallback(&self, raw: &str, hint: &str) -> RecordDraft {
        let split = raw
            .char_indices()
            .nth(self.title_chars)
            .map_or(raw.len(), |(idx, _)| idx);
        RecordDraft {
            source_label: hint.to_string(),
            title: raw[..split].to_string(),
            body: raw[split..].to_string(),
            priority: Priority::Normal,
            origin_identifier: String::new(),
        }
    }
}

/// Lines ended by `\r\n`, `\n`, or a lone `\r`. A trailing terminator
/// yields a final empty line.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(text);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.find(['\n', '\r']) {
            Some(idx) => {
                let width = if current[idx..].starts_with("\r\n") { 2 } else { 1 };
                rest = Some(&current[idx + width..]);
                Some(&current[..idx])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}

/// `end` is the byte index of the first `]`, known to lie past the prefix.
fn parse_structured(raw: &str, end: usize, hint: &str) -> RecordDraft {
    let name = raw[APP_PREFIX.len()..end].trim();
    let source_label = if name.is_empty() { hint } else { name };

    let remaining = raw[end + 1..].trim();
    let (priority, content) = match PRIORITY_PREFIX.captures(remaining) {
        Some(caps) => {
            let whole = caps.get(0).map_or(0, |m| m.end());
            let token = caps.get(1).map_or("", |m| m.as_str());
            (Priority::from_token(token), remaining[whole..].trim())
        }
        None => (Priority::Normal, remaining),
    };

    let (title, body) = match content.split_once('|') {
        Some((title, body)) => (title.trim(), body.trim()),
        None => (content, ""),
    };

    RecordDraft {
        source_label: source_label.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        priority,
        origin_identifier: String::new(),
    }
}

/// Parse with the default title width.
#[must_use]
pub fn parse(raw: &str, hint: &str) -> RecordDraft {
    MessageParser::default().parse(raw, hint)
}
