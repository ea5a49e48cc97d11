//! Backup document encoding
//!
//! Documents are written as pretty-printed UTF-8 JSON with every object's keys
//! in sorted order, so identical documents always produce identical bytes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::record::BackupDocument;

/// Default prefix for backup file names
pub const DEFAULT_FILE_PREFIX: &str = "bcba_backup_";

/// File extension for backup files
pub const BACKUP_EXTENSION: &str = ".json";

/// Encode a document as canonical pretty-printed JSON
pub fn encode_document(document: &BackupDocument) -> Result<Vec<u8>, serde_json::Error> {
    let value = canonicalize(serde_json::to_value(document)?);
    serde_json::to_vec_pretty(&value)
}

/// Decode a document from JSON bytes
pub fn decode_document(bytes: &[u8]) -> Result<BackupDocument, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Rebuild every object with its keys inserted in sorted order.
///
/// Holds regardless of whether `serde_json` was built with `preserve_order`.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Build a backup file name: `{prefix}{ISO8601 timestamp}.json`
pub fn backup_filename(prefix: &str, created_at: DateTime<Utc>) -> String {
    format!(
        "{prefix}{}{BACKUP_EXTENSION}",
        created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Recover the creation timestamp encoded in a backup file name
pub fn parse_backup_filename(prefix: &str, filename: &str) -> Option<DateTime<Utc>> {
    let stamp = filename
        .strip_prefix(prefix)?
        .strip_suffix(BACKUP_EXTENSION)?;
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_canonicalize_sorts_nested_keys() {
        let value = serde_json::json!({
            "zeta": 1,
            "alpha": { "b": true, "a": [ { "y": 1, "x": 2 } ] }
        });

        let text = serde_json::to_string(&canonicalize(value)).unwrap();
        assert_eq!(text, r#"{"alpha":{"a":[{"x":2,"y":1}],"b":true},"zeta":1}"#);
    }

    #[test]
    fn test_backup_filename_round_trip() {
        let created = Utc.with_ymd_and_hms(2024, 3, 2, 17, 45, 9).unwrap();
        let name = backup_filename(DEFAULT_FILE_PREFIX, created);

        assert_eq!(name, "bcba_backup_2024-03-02T17:45:09Z.json");
        assert_eq!(parse_backup_filename(DEFAULT_FILE_PREFIX, &name), Some(created));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(parse_backup_filename(DEFAULT_FILE_PREFIX, "notes.txt"), None);
        assert_eq!(
            parse_backup_filename(DEFAULT_FILE_PREFIX, "bcba_backup_yesterday.json"),
            None
        );
    }
}
