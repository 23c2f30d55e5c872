//! Parse-layer errors. Returned as values — the parser never panics.

use std::fmt;

/// What part of a log line failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    /// Field count is neither the v1 (30) nor v2 (32+) shape.
    FieldCount,
    /// An integer or float field failed strict parsing.
    Numeric,
    /// A timestamp field is not valid RFC-3339.
    Timestamp,
    /// A `host:port` field is malformed.
    AddressPort,
    /// The quoted HTTP request field is not `verb url protocol`.
    HttpRequest,
    /// The line tokenized but the resulting record violates an invariant.
    Validation,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FieldCount => "field count",
            Self::Numeric => "numeric",
            Self::Timestamp => "timestamp",
            Self::AddressPort => "address/port",
            Self::HttpRequest => "http request",
            Self::Validation => "validation",
        };
        f.write_str(name)
    }
}

/// A single log line that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn field_count(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::FieldCount, message)
    }

    pub fn numeric(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Numeric, message)
    }

    pub fn timestamp(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Timestamp, message)
    }

    pub fn address_port(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::AddressPort, message)
    }

    pub fn http_request(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::HttpRequest, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Validation, message)
    }
}
