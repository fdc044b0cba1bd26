//! Serde helpers for rendering stored records over the control plane.

use std::time::SystemTime;

use serde::Serializer;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub fn timestamp<S: Serializer>(value: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_rfc3339(*value))
}

pub fn optional_timestamp<S: Serializer>(
    value: &Option<SystemTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => timestamp(value, serializer),
        None => serializer.serialize_none(),
    }
}

/// Opaque payloads are JSON in practice; anything else is shown as lossy text.
pub fn opaque_bytes<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_empty() {
        return serializer.serialize_none();
    }
    match serde_json::from_slice::<Value>(value) {
        Ok(json) => serializer.serialize_some(&json),
        Err(_) => serializer.serialize_str(&String::from_utf8_lossy(value)),
    }
}

pub fn optional_opaque_bytes<S: Serializer>(
    value: &Option<Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => opaque_bytes(value, serializer),
        None => serializer.serialize_none(),
    }
}

pub fn format_rfc3339(value: SystemTime) -> String {
    OffsetDateTime::from(value)
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("invalid-timestamp"))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::format_rfc3339;

    #[test]
    fn formats_unix_epoch_offsets_as_utc() {
        let value = UNIX_EPOCH + Duration::from_secs(86_400);
        assert_eq!(format_rfc3339(value), "1970-01-02T00:00:00Z");
    }
}
