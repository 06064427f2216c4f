//! Dynamic SQLite row decoding for view and ad-hoc query results.

use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Decode a row into a JSON object by column declaration, without a typed
/// row struct. Blob columns are hex-encoded; unknown types fall back to
/// their text rendering.
pub fn row_to_json(row: &SqliteRow) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(row.len());
    for column in row.columns() {
        let idx = column.ordinal();
        let value = match row.try_get_raw(idx) {
            Err(_) => serde_json::Value::Null,
            Ok(raw) if raw.is_null() => serde_json::Value::Null,
            Ok(raw) => match raw.type_info().name() {
                "INTEGER" => row
                    .try_get::<i64, _>(idx)
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null),
                "REAL" => row
                    .try_get::<f64, _>(idx)
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null),
                "BLOB" => row
                    .try_get::<Vec<u8>, _>(idx)
                    .map(|b| serde_json::Value::String(hex::encode(b)))
                    .unwrap_or(serde_json::Value::Null),
                _ => row
                    .try_get::<String, _>(idx)
                    .map(serde_json::Value::String)
                    .unwrap_or(serde_json::Value::Null),
            },
        };
        map.insert(column.name().to_string(), value);
    }
    serde_json::Value::Object(map)
}
