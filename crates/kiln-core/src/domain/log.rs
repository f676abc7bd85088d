//! Log entries recorded per request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::RequestId;

/// Separator used when a request's lines are read back as one text.
pub const LINE_SEPARATOR: &str = "\n";

/// Prefix that marks a line produced from an error.
pub const ERROR_PREFIX: &str = "ERROR: ";

/// One immutable line in a request's log.
///
/// For a fixed `request`, `position` grows by one per append and is the
/// order readers must observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub request: RequestId,
    pub position: u64,
    pub line: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(request: RequestId, position: u64, line: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            request,
            position,
            line: line.into(),
            timestamp,
        }
    }

    pub fn is_error(&self) -> bool {
        self.line.starts_with(ERROR_PREFIX)
    }
}

/// Format an error the way it is stored: a single `ERROR: ` line.
pub fn error_line(error: &dyn fmt::Display) -> String {
    let message = error.to_string();
    // 1 エラー = 1 行
    let flattened = message.lines().collect::<Vec<_>>().join(" ");
    format!("{ERROR_PREFIX}{flattened}")
}

/// Join lines with `LINE_SEPARATOR`, oldest first.
pub fn join_lines(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(|e| e.line.as_str())
        .collect::<Vec<_>>()
        .join(LINE_SEPARATOR)
}
