//! Relay line protocol.
//!
//! One request line per connection, one reply line back. Fields are
//! separated by `|`. The message text of an `INGEST` is the last field and
//! may itself contain `|`; its line breaks and backslashes are escaped
//! (`\n`, `\r`, `\\`) so the request stays on one line.

use std::fmt;

use sms_triage_core::error::{Error, Result};
use sms_triage_core::models::RecordId;

/// Source-label hint applied to relayed messages.
pub const RELAY_HINT: &str = "RELAY";

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRequest {
    Ingest { origin: String, text: String },
    Delete(RecordId),
    MarkRead(RecordId),
    Shake,
}

impl RelayRequest {
    /// Command token (`INGEST`, `DELETE`, …).
    #[must_use]
    pub const fn command(&self) -> &'static str {
        match self {
            Self::Ingest { .. } => "INGEST",
            Self::Delete(_) => "DELETE",
            Self::MarkRead(_) => "MARK_READ",
            Self::Shake => "SHAKE",
        }
    }

    /// Encode as a single line, without the trailing newline.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Ingest { origin, text } => {
                format!("INGEST|{}|{}", sanitize_field(origin), escape_text(text))
            }
            Self::Delete(id) => format!("DELETE|{}", sanitize_field(id.as_str())),
            Self::MarkRead(id) => format!("MARK_READ|{}", sanitize_field(id.as_str())),
            Self::Shake => "SHAKE".to_string(),
        }
    }

    /// Decode one request line. A trailing `\r\n` or `\n` is ignored.
    pub fn decode(line: &str) -> std::result::Result<Self, DecodeError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (command, rest) = line.split_once('|').unwrap_or((line, ""));
        match command {
            "INGEST" => {
                let (origin, text) = rest.split_once('|').ok_or(DecodeError::Malformed)?;
                Ok(Self::Ingest {
                    origin: origin.trim().to_string(),
                    text: unescape_text(text),
                })
            }
            "DELETE" => required_id(rest).map(Self::Delete),
            "MARK_READ" => required_id(rest).map(Self::MarkRead),
            // Trailing fields after SHAKE are ignored.
            "SHAKE" => Ok(Self::Shake),
            _ => Err(DecodeError::Unknown),
        }
    }
}

fn required_id(field: &str) -> std::result::Result<RecordId, DecodeError> {
    let id = field.trim();
    if id.is_empty() || id.contains('|') {
        return Err(DecodeError::Malformed);
    }
    Ok(RecordId::from(id))
}

/// Why a request line could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Unknown,
    Malformed,
}

impl From<DecodeError> for ErrorCode {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Unknown => Self::Unknown,
            DecodeError::Malformed => Self::Malformed,
        }
    }
}

/// Codes carried by `ERROR|<code>` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Unknown,
    Malformed,
    TooLong,
    Busy,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Malformed => "MALFORMED",
            Self::TooLong => "TOO_LONG",
            Self::Busy => "BUSY",
            Self::Internal => "INTERNAL",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "UNKNOWN" => Some(Self::Unknown),
            "MALFORMED" => Some(Self::Malformed),
            "TOO_LONG" => Some(Self::TooLong),
            "BUSY" => Some(Self::Busy),
            "INTERNAL" => Some(Self::Internal),
            _ => None,
        }
    }
}

/// A reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayReply {
    /// `OK|<command>[|<detail>]`
    Ok {
        command: String,
        detail: Option<String>,
    },
    /// `NOT_FOUND|<command>`
    NotFound { command: String },
    /// `DROPPED|<command>|<reason>`
    Dropped { command: String, reason: String },
    /// `ERROR|<code>`
    Error(ErrorCode),
}

impl RelayReply {
    #[must_use]
    pub fn ok(command: &str) -> Self {
        Self::Ok {
            command: command.to_string(),
            detail: None,
        }
    }

    #[must_use]
    pub fn ok_with(command: &str, detail: impl Into<String>) -> Self {
        Self::Ok {
            command: command.to_string(),
            detail: Some(detail.into()),
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Detail field of an `OK` reply (the new id for `INGEST`, the changed
    /// count for `SHAKE`).
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Ok { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Ok {
                command,
                detail: Some(detail),
            } => format!("OK|{command}|{}", sanitize_field(detail)),
            Self::Ok {
                command,
                detail: None,
            } => format!("OK|{command}"),
            Self::NotFound { command } => format!("NOT_FOUND|{command}"),
            Self::Dropped { command, reason } => {
                format!("DROPPED|{command}|{}", sanitize_field(reason))
            }
            Self::Error(code) => format!("ERROR|{}", code.as_str()),
        }
    }

    /// Decode a reply line; anything unrecognized is a protocol error.
    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut fields = line.splitn(3, '|');
        let status = fields.next().unwrap_or_default();
        let command = fields.next().filter(|c| !c.is_empty());
        let detail = fields.next();
        let reply = match (status, command) {
            ("OK", Some(command)) => Self::Ok {
                command: command.to_string(),
                detail: detail.map(str::to_string),
            },
            ("NOT_FOUND", Some(command)) => Self::NotFound {
                command: command.to_string(),
            },
            ("DROPPED", Some(command)) => Self::Dropped {
                command: command.to_string(),
                reason: detail.unwrap_or_default().to_string(),
            },
            ("ERROR", Some(code)) => Self::Error(ErrorCode::parse(code).ok_or_else(|| {
                Error::Protocol(format!("unknown relay error code {code:?}"))
            })?),
            _ => {
                return Err(Error::Protocol(format!("unrecognized relay reply {line:?}")));
            }
        };
        Ok(reply)
    }
}

impl fmt::Display for RelayReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Replace separators and line breaks with spaces.
fn sanitize_field(field: &str) -> String {
    field
        .chars()
        .map(|c| if matches!(c, '|' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_text`]. Unknown escapes are kept verbatim.
fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_known_commands() {
        assert_eq!(
            RelayRequest::decode("INGEST|+40712345678|[APP:X] HIGH: a | b\r\n").unwrap(),
            RelayRequest::Ingest {
                origin: "+40712345678".into(),
                text: "[APP:X] HIGH: a | b".into(),
            }
        );
        assert_eq!(
            RelayRequest::decode("DELETE|abc123").unwrap(),
            RelayRequest::Delete(RecordId::from("abc123"))
        );
        assert_eq!(
            RelayRequest::decode("MARK_READ| abc123 \n").unwrap(),
            RelayRequest::MarkRead(RecordId::from("abc123"))
        );
        assert_eq!(RelayRequest::decode("SHAKE").unwrap(), RelayRequest::Shake);
        assert_eq!(RelayRequest::decode("SHAKE|x=1").unwrap(), RelayRequest::Shake);
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert_eq!(RelayRequest::decode("CREATE|a|b"), Err(DecodeError::Unknown));
        assert_eq!(RelayRequest::decode(""), Err(DecodeError::Unknown));
        assert_eq!(RelayRequest::decode("shake"), Err(DecodeError::Unknown));
        assert_eq!(RelayRequest::decode("DELETE|"), Err(DecodeError::Malformed));
        assert_eq!(RelayRequest::decode("DELETE"), Err(DecodeError::Malformed));
        assert_eq!(RelayRequest::decode("INGEST|only-origin"), Err(DecodeError::Malformed));
    }

    #[test]
    fn ingest_text_keeps_line_breaks() {
        let request = RelayRequest::Ingest {
            origin: "+1|2\n3".into(),
            text: "line one\nline two \\ end".into(),
        };
        let line = request.encode();
        assert!(!line.contains('\n'));
        assert_eq!(line, "INGEST|+1 2 3|line one\\nline two \\\\ end");
        assert_eq!(
            RelayRequest::decode(&line).unwrap(),
            RelayRequest::Ingest {
                origin: "+1 2 3".into(),
                text: "line one\nline two \\ end".into(),
            }
        );
    }

    #[test]
    fn reply_lines() {
        assert_eq!(RelayReply::ok("DELETE").encode(), "OK|DELETE");
        assert_eq!(RelayReply::ok_with("SHAKE", "3").encode(), "OK|SHAKE|3");
        assert_eq!(
            RelayReply::NotFound { command: "MARK_READ".into() }.encode(),
            "NOT_FOUND|MARK_READ"
        );
        assert_eq!(RelayReply::Error(ErrorCode::Unknown).encode(), "ERROR|UNKNOWN");
        assert_eq!(
            RelayReply::decode("DROPPED|INGEST|NOT_ALLOWED\n").unwrap(),
            RelayReply::Dropped {
                command: "INGEST".into(),
                reason: "NOT_ALLOWED".into(),
            }
        );
        assert_eq!(RelayReply::decode("OK|SHAKE|2").unwrap().detail(), Some("2"));
        assert_eq!(
            RelayReply::decode("ERROR|BUSY").unwrap(),
            RelayReply::Error(ErrorCode::Busy)
        );
    }

    #[test]
    fn reply_decode_rejects_garbage() {
        for line in ["", "OK", "HELLO|X", "ERROR|NOPE"] {
            let err = RelayReply::decode(line).unwrap_err();
            assert!(matches!(err, Error::Protocol(_)), "{line:?}");
        }
    }

    proptest! {
        #[test]
        fn prop_ingest_text_survives_encoding(
            origin in "[+0-9 ()-]{0,16}",
            text in any::<String>(),
        ) {
            let request = RelayRequest::Ingest { origin: origin.trim().to_string(), text };
            let line = request.encode();
            prop_assert!(!line.contains('\n'));
            prop_assert_eq!(RelayRequest::decode(&line).unwrap(), request);
        }
    }
}
