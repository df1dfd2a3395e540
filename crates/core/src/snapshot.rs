//! The unit of storage for one source.
//!
//! A snapshot bundles the records, the response headers and the indexes of
//! one successful refresh. It is committed as a single value and replaced
//! whole by the next refresh, so records and indexes always travel together.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::index::Indexes;

/// Shared, immutable record sequence.
pub type Records = Arc<Vec<Value>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub source_name: String,
    pub records: Records,
    /// Response headers of the fetch, lower-cased names.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub indexes: Indexes,
    /// RFC 3339 time the payload was fetched.
    pub fetched_at: String,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Select the record array inside a fetched payload.
///
/// `items_path` is a dotted path (`data.items`, `pages.0.rows`); without one
/// the payload itself must be the array.
///
/// # Errors
///
/// Returns a human-readable reason when a path segment is missing or the
/// selected value is not an array.
pub fn extract_records(body: Value, items_path: Option<&str>) -> Result<Vec<Value>, String> {
    let path = items_path.map(str::trim).filter(|p| !p.is_empty());

    let selected = match path {
        None => body,
        Some(path) => {
            let mut current = body;
            for segment in path.split('.') {
                current = match current {
                    Value::Object(mut map) => map
                        .remove(segment)
                        .ok_or_else(|| format!("items path '{path}': no field '{segment}'"))?,
                    Value::Array(mut items) => {
                        let pos: usize = segment
                            .parse()
                            .map_err(|_| format!("items path '{path}': '{segment}' is not an array position"))?;
                        if pos >= items.len() {
                            return Err(format!("items path '{path}': position {pos} out of range"));
                        }
                        items.swap_remove(pos)
                    }
                    other => {
                        return Err(format!(
                            "items path '{path}': cannot descend into {} at '{segment}'",
                            kind(&other)
                        ));
                    }
                };
            }
            current
        }
    };

    match selected {
        Value::Array(records) => Ok(records),
        other => Err(format!("expected an array of records, found {}", kind(&other))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_top_level_array() {
        let records = extract_records(json!([{ "id": 1 }, { "id": 2 }]), None).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_extract_blank_path_means_root() {
        let records = extract_records(json!([1, 2, 3]), Some("  ")).unwrap();
        assert_eq!(records, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_extract_nested_path() {
        let body = json!({ "data": { "items": [{ "id": "a" }] }, "total": 1 });
        let records = extract_records(body, Some("data.items")).unwrap();
        assert_eq!(records, vec![json!({ "id": "a" })]);
    }

    #[test]
    fn test_extract_path_through_array() {
        let body = json!({ "pages": [{ "rows": [1] }, { "rows": [2, 3] }] });
        let records = extract_records(body, Some("pages.1.rows")).unwrap();
        assert_eq!(records, vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_extract_missing_segment() {
        let err = extract_records(json!({ "data": {} }), Some("data.items")).unwrap_err();
        assert!(err.contains("no field 'items'"));
    }

    #[test]
    fn test_extract_non_array() {
        let err = extract_records(json!({ "id": 1 }), None).unwrap_err();
        assert!(err.contains("found an object"));
    }

    #[test]
    fn test_snapshot_roundtrips_through_json() {
        let snapshot = Snapshot {
            source_name: "users".into(),
            records: Arc::new(vec![json!({ "user": "barney" })]),
            headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            indexes: Indexes::from([(
                "user".to_string(),
                BTreeMap::from([("barney".to_string(), vec![0])]),
            )]),
            fetched_at: "2024-05-01T12:00:00+00:00".into(),
        };

        let decoded: Snapshot = serde_json::from_str(&serde_json::to_string(&snapshot).unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.len(), 1);
        assert!(!decoded.is_empty());
    }
}
