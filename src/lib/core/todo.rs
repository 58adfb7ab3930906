use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::error::{TITLE_EMPTY, TITLE_REQUIRED, TITLE_TOO_LONG, TodoError};

/// Column width of `todos.title`.
pub const TITLE_MAX_CHARS: usize = 255;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub completed: bool,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

/// A trimmed, non-empty title that fits the column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Title(String);

impl Title {
    /// Trims `raw` and checks it. `empty` is the message reported when
    /// nothing is left after trimming, since create and update word it
    /// differently.
    pub fn parse(raw: &str, empty: &'static str) -> Result<Self, TodoError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TodoError::Validation(empty));
        }
        if trimmed.chars().count() > TITLE_MAX_CHARS {
            return Err(TodoError::Validation(TITLE_TOO_LONG));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Title of a create request body. Missing or non-string titles count
    /// as empty.
    pub fn from_create_body(body: &Map<String, Value>) -> Result<Self, TodoError> {
        let raw = body.get("title").and_then(Value::as_str).unwrap_or_default();
        Self::parse(raw, TITLE_REQUIRED)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Partial update as sent by the client. Absent fields stay `None` and are
/// left untouched. The title is kept raw until [`TodoPatch::validate`] so
/// that an unknown id can be reported before a bad title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub completed: Option<bool>,
}

/// A patch whose title, if any, has passed validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidPatch {
    pub title: Option<Title>,
    pub completed: Option<bool>,
}

impl TodoPatch {
    pub fn from_body(body: &Map<String, Value>) -> Self {
        Self {
            title: body
                .get("title")
                .map(|v| v.as_str().unwrap_or_default().to_string()),
            completed: body.get("completed").map(truthy),
        }
    }

    pub fn validate(self) -> Result<ValidPatch, TodoError> {
        let title = match self.title {
            Some(raw) => Some(Title::parse(&raw, TITLE_EMPTY)?),
            None => None,
        };
        Ok(ValidPatch {
            title,
            completed: self.completed,
        })
    }
}

impl ValidPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.completed.is_none()
    }
}

/// JSON truthiness: `null`, `false`, zero, and empty strings, arrays and
/// objects are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Parses a request body leniently: anything that is not a JSON object is
/// treated as an empty one.
pub fn json_object(body: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn title_is_trimmed() {
        let title = Title::parse("  buy milk \n", TITLE_REQUIRED).unwrap();
        assert_eq!(title.as_str(), "buy milk");
    }

    #[test]
    fn blank_title_reports_given_message() {
        match Title::parse("   ", TITLE_EMPTY) {
            Err(TodoError::Validation(msg)) => assert_eq!(msg, TITLE_EMPTY),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn title_length_counts_chars() {
        let max = "é".repeat(TITLE_MAX_CHARS);
        assert!(Title::parse(&max, TITLE_REQUIRED).is_ok());
        let over = "a".repeat(TITLE_MAX_CHARS + 1);
        assert!(matches!(
            Title::parse(&over, TITLE_REQUIRED),
            Err(TodoError::Validation(TITLE_TOO_LONG))
        ));
    }

    #[test]
    fn create_body_without_string_title_is_rejected() {
        for body in [json!({}), json!({"title": null}), json!({"title": 42})] {
            assert!(matches!(
                Title::from_create_body(&object(body)),
                Err(TodoError::Validation(TITLE_REQUIRED))
            ));
        }
    }

    #[test]
    fn patch_keeps_absent_fields_absent() {
        let patch = TodoPatch::from_body(&object(json!({"completed": true, "id": 9})));
        assert_eq!(
            patch,
            TodoPatch {
                title: None,
                completed: Some(true)
            }
        );
    }

    #[test]
    fn patch_with_null_title_fails_validation() {
        let patch = TodoPatch::from_body(&object(json!({"title": null})));
        assert!(matches!(
            patch.validate(),
            Err(TodoError::Validation(TITLE_EMPTY))
        ));
    }

    #[test]
    fn truthiness_follows_json_values() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!truthy(&falsy), "{falsy} should be false");
        }
        for true_ish in [json!(true), json!(1), json!(-2.5), json!("no"), json!([0]), json!({"a": 1})] {
            assert!(truthy(&true_ish), "{true_ish} should be true");
        }
    }

    #[test]
    fn malformed_body_is_empty_object() {
        assert!(json_object(b"").is_empty());
        assert!(json_object(b"{not json").is_empty());
        assert!(json_object(b"[1, 2]").is_empty());
        assert_eq!(json_object(br#"{"title":"x"}"#).len(), 1);
    }

    #[test]
    fn serialized_todo_hides_created_at() {
        let todo = Todo {
            id: 1,
            title: "a".into(),
            completed: false,
            created_at: Utc::now(),
        };
        assert_eq!(
            serde_json::to_value(&todo).unwrap(),
            json!({"id": 1, "title": "a", "completed": false})
        );
    }
}
