//! Tolerant field lookup for third-party JSON responses.
//!
//! The storage and analysis services are not consistent about field names, so
//! callers pass an ordered list of candidates and take the first usable one.

use serde_json::Value;

/// Storage upload response: `Key`, then `key`, then `name`.
pub const STORAGE_KEY_FIELDS: &[&str] = &["Key", "key", "name"];

/// Analysis submission response: `history_id`, then `historyId`, then `id`.
pub const JOB_ID_FIELDS: &[&str] = &["history_id", "historyId", "id"];

/// Returns the first field in `names` (in order) holding a non-empty string
/// or a number. Nulls, empty strings and other JSON types are skipped.
pub fn first_field(value: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match value.get(*name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn respects_precedence() {
        let body = json!({"name": "c", "key": "b", "Key": "a"});
        assert_eq!(first_field(&body, STORAGE_KEY_FIELDS), Some("a".into()));

        let body = json!({"name": "c", "key": "b"});
        assert_eq!(first_field(&body, STORAGE_KEY_FIELDS), Some("b".into()));
    }

    #[test]
    fn skips_null_and_empty_values() {
        let body = json!({"history_id": null, "historyId": "", "id": "job-9"});
        assert_eq!(first_field(&body, JOB_ID_FIELDS), Some("job-9".into()));
    }

    #[test]
    fn numeric_ids_are_stringified() {
        let body = json!({"id": 4711});
        assert_eq!(first_field(&body, JOB_ID_FIELDS), Some("4711".into()));
    }

    #[test]
    fn missing_fields_yield_none() {
        assert_eq!(first_field(&json!({"status": "ok"}), JOB_ID_FIELDS), None);
        assert_eq!(first_field(&json!([1, 2]), JOB_ID_FIELDS), None);
    }
}
