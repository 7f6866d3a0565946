//! Classified server output.

use chrono::NaiveDateTime;
use serde::Serialize;

/// One line of server output matching the primary log grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedLogRecord {
    /// Date exactly as printed
    pub date: String,
    /// Parsed date, when it matches the server's timestamp format
    pub timestamp: Option<NaiveDateTime>,
    pub level: String,
    /// Logger section with the server package prefix stripped (`n.Node`)
    pub section: String,
    pub node: Option<String>,
    pub message: String,
    pub is_started_confirmation: bool,
    pub is_port_announcement: bool,
}

/// Result of classifying a raw output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifiedLine {
    Record(ParsedLogRecord),
    /// `Caused by: <exception>: <message>`
    CausedBy { exception: String, message: String },
    /// `at <frame>` line of a stack trace
    StackFrame { frame: String },
    Unclassified { raw: String },
}

impl ClassifiedLine {
    pub const fn record(&self) -> Option<&ParsedLogRecord> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// A line of node output handed to a console sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub node: String,
    pub raw: String,
    pub classified: ClassifiedLine,
    /// Whether the line came from stderr
    pub is_error: bool,
}
