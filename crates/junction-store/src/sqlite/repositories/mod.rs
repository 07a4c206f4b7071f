//! Stateless repositories — every method takes `&Connection`.

pub mod attachment;
pub mod event;
pub mod stream;

use chrono::{DateTime, Utc};

/// Parse a stored RFC 3339 timestamp inside a row-mapping closure.
pub(crate) fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Parse stored JSON inside a row-mapping closure.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}
