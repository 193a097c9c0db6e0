//! ID generation utilities.

use uuid::Uuid;

/// Generate a new UUID v4.
pub fn uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a short random ID (8 characters).
pub fn short_id() -> String {
    let bytes: [u8; 4] = rand::random();
    hex::encode(bytes)
}

/// Generate a prefixed, timestamp-ordered ID such as `data_1718000000000_1a2b3c4d`.
///
/// Used for offline queue operations so that ids sort by enqueue time.
pub fn prefixed_timestamp_id(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("{}_{}_{}", prefix, millis, short_id())
}
