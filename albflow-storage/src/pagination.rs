//! Safety limits and the keyset cursor codec.

use albflow_core::errors::StorageError;
use chrono::{DateTime, SecondsFormat, Utc};

/// Hard cap applied to every `query`; requested limits are clamped.
pub const MAX_QUERY_ROWS: usize = 50_000;
/// `query_paginated` page size ceiling.
pub const MAX_PAGE_SIZE: usize = 1_000;
/// `query_cursor` limit ceiling.
pub const MAX_CURSOR_LIMIT: usize = 1_000;

/// A decoded cursor position: the `(timestamp, id)` key of the last row
/// the client has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorKey {
    pub timestamp_micros: i64,
    pub id: i64,
}

/// Encode a `(timestamp, id)` key as the opaque `"<rfc3339>|<id>"` form.
pub fn encode_cursor(timestamp: DateTime<Utc>, id: i64) -> String {
    format!(
        "{}|{id}",
        timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    )
}

/// Decode a cursor produced by `encode_cursor`. Any malformed input is an
/// `InvalidCursor` error, surfaced to the caller rather than swallowed.
pub fn decode_cursor(cursor: &str) -> Result<CursorKey, StorageError> {
    let invalid = || StorageError::InvalidCursor {
        cursor: cursor.to_string(),
    };

    let (ts, id) = cursor.rsplit_once('|').ok_or_else(invalid)?;
    let timestamp = DateTime::parse_from_rfc3339(ts).map_err(|_| invalid())?;
    let id: i64 = id.parse().map_err(|_| invalid())?;
    Ok(CursorKey {
        timestamp_micros: timestamp.with_timezone(&Utc).timestamp_micros(),
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cursor_round_trip() {
        let ts = Utc.with_ymd_and_hms(2023, 12, 1, 10, 30, 45).unwrap()
            + chrono::Duration::microseconds(123_456);
        let cursor = encode_cursor(ts, 42);
        let key = decode_cursor(&cursor).unwrap();
        assert_eq!(key.timestamp_micros, ts.timestamp_micros());
        assert_eq!(key.id, 42);
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        for bad in ["", "nope", "2023-12-01T00:00:00Z", "notadate|5", "2023-12-01T00:00:00Z|x"] {
            assert!(matches!(
                decode_cursor(bad),
                Err(StorageError::InvalidCursor { .. })
            ));
        }
    }
}
