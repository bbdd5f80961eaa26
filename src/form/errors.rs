use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use super::controller::{FormError, FormResult};
use super::path::{PathKeys, flat_key};
use super::validation::{ValidationFailure, ValidationFailures};
use crate::i18n::MessageTable;

/// Messages recorded for one key, by error code, in insertion order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ErrorEntry {
    messages: IndexMap<String, String>,
}

impl ErrorEntry {
    pub fn get(&self, code: &str) -> Option<&str> {
        self.messages.get(code).map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        self.messages.values().next().map(String::as_str)
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.messages.values().map(String::as_str)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn insert(&mut self, code: &str, message: String) {
        self.messages.insert(code.to_string(), message);
    }
}

/// Errors keyed by flat and wildcard path, localized on insertion.
#[derive(Clone, Debug)]
pub struct ErrorStore {
    locale: String,
    messages: Arc<MessageTable>,
    entries: BTreeMap<String, ErrorEntry>,
}

impl ErrorStore {
    pub fn new(locale: impl Into<String>, messages: Arc<MessageTable>) -> Self {
        Self {
            locale: locale.into(),
            messages,
            entries: BTreeMap::new(),
        }
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Records `code` for `path`. The flat key prefers a message registered for the concrete path,
    /// the wildcard key prefers one registered for the collection-wide path.
    pub fn push_error(&mut self, path: &str, code: &str, message: Option<&str>) {
        let path = path.trim();
        let code = code.trim();
        if path.is_empty() || code.is_empty() {
            return;
        }
        let keys = PathKeys::new(path);
        if keys.flat.is_empty() {
            return;
        }
        let explicit = message.filter(|message| !message.trim().is_empty());

        let flat_message = self.localize(explicit, [&keys.flat, &keys.wildcard], code);
        trace!(key = %keys.flat, code, "recording field error");
        self.entries
            .entry(keys.flat.clone())
            .or_default()
            .insert(code, flat_message);

        if keys.is_indexed() {
            let wildcard_message = self.localize(explicit, [&keys.wildcard, &keys.flat], code);
            trace!(key = %keys.wildcard, code, "recording wildcard error");
            self.entries
                .entry(keys.wildcard)
                .or_default()
                .insert(code, wildcard_message);
        }
    }

    pub fn clear_error(&mut self, path: &str) {
        let keys = PathKeys::new(path.trim());
        self.entries.remove(&keys.flat);
        self.entries.remove(&keys.wildcard);
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Replaces the errors of `field` with every code of `failure`. The failure's own path is not
    /// consulted: a field reports under its registered name.
    pub fn set_field_failure(&mut self, field: &str, failure: &ValidationFailure) {
        self.clear_error(field);
        for code in &failure.errors {
            self.push_error(field, code, None);
        }
    }

    /// Rebuilds the store from schema failures, each one recorded under its own path.
    pub fn import_validation_failures(&mut self, failures: &ValidationFailures) {
        self.reset();
        for failure in failures.iter() {
            self.set_field_failure(&failure.path, failure);
        }
    }

    /// Rebuilds the store from a backend error payload.
    pub fn import_server_errors(&mut self, errors: &ServerErrors) {
        self.reset();
        for (field, field_errors) in &errors.fields {
            match field_errors {
                ServerFieldErrors::Coded(codes) => {
                    for (code, message) in codes {
                        self.push_error(field, code, Some(message.trim()));
                    }
                }
                ServerFieldErrors::Messages(messages) => {
                    for message in messages.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
                        self.push_error(field, message, None);
                    }
                }
                ServerFieldErrors::Message(message) => {
                    if let Some(message) = scalar_message(message) {
                        self.push_error(field, &message, None);
                    }
                }
            }
        }
    }

    pub fn entry(&self, key: &str) -> Option<&ErrorEntry> {
        self.entries.get(key).filter(|entry| !entry.is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn errors_for(&self, field: &str) -> Vec<String> {
        self.field_entry(field)
            .map(|entry| entry.messages().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn first_error_for(&self, field: &str) -> Option<&str> {
        self.field_entry(field).and_then(ErrorEntry::first)
    }

    pub fn is_failed(&self, field: &str) -> bool {
        self.field_entry(field).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(ErrorEntry::is_empty)
    }

    pub fn len(&self) -> usize {
        self.entries.values().filter(|entry| !entry.is_empty()).count()
    }

    fn field_entry(&self, field: &str) -> Option<&ErrorEntry> {
        self.entry(&flat_key(field.trim()))
    }

    fn localize(&self, explicit: Option<&str>, keys: [&str; 2], code: &str) -> String {
        explicit
            .or_else(|| {
                keys.into_iter()
                    .find_map(|key| self.messages.find_message(&self.locale, key, code))
            })
            .unwrap_or(code)
            .to_string()
    }
}

fn scalar_message(value: &Value) -> Option<String> {
    match value {
        Value::String(message) => {
            let message = message.trim();
            (!message.is_empty()).then(|| message.to_string())
        }
        Value::Number(number) => (number.as_f64() != Some(0.0)).then(|| number.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        Value::Bool(false) | Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// The errors a backend reported for one field.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ServerFieldErrors {
    /// `{"taken": "Already registered"}`: code to message.
    Coded(IndexMap<String, String>),
    /// `["Too short", "Not unique"]`: each message doubles as its code.
    Messages(Vec<String>),
    /// `"Too short"` or any other scalar.
    Message(Value),
}

/// A backend validation payload: field name to that field's errors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerErrors {
    fields: IndexMap<String, ServerFieldErrors>,
}

impl ServerErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: impl Into<String>, errors: ServerFieldErrors) -> Self {
        self.fields.insert(field.into(), errors);
        self
    }

    /// Decodes each field independently. Fields whose errors match no known shape are skipped and
    /// a payload that is not an object decodes as empty.
    pub fn from_json_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let fields = object
            .iter()
            .filter_map(|(field, errors)| {
                ServerFieldErrors::deserialize(errors)
                    .ok()
                    .map(|errors| (field.clone(), errors))
            })
            .collect();
        Self { fields }
    }

    pub fn from_json_str(source: &str) -> FormResult<Self> {
        let value = serde_json::from_str::<Value>(source)
            .map_err(|error| FormError::Decode(format!("server errors: {error}")))?;
        Ok(Self::from_json_value(&value))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Value> for ServerErrors {
    fn from(value: Value) -> Self {
        Self::from_json_value(&value)
    }
}

impl From<&Value> for ServerErrors {
    fn from(value: &Value) -> Self {
        Self::from_json_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(table: MessageTable, locale: &str) -> ErrorStore {
        ErrorStore::new(locale, Arc::new(table))
    }

    #[test]
    fn plain_path_creates_single_entry() {
        let mut errors = store(MessageTable::new(), "*");
        errors.push_error("email", "required", None);
        assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["email"]);
        assert_eq!(errors.first_error_for("email"), Some("required"));
    }

    #[test]
    fn indexed_path_creates_independent_flat_and_wildcard_entries() {
        let table = MessageTable::new()
            .with_message("en", "items.2.email", "email", "Third email is broken")
            .with_message("en", "items.*.email", "email", "An item email is broken");
        let mut errors = store(table, "en");
        errors.push_error("items[2].email", "email", None);

        assert_eq!(
            errors.entry("items.2.email").and_then(|e| e.get("email")),
            Some("Third email is broken")
        );
        assert_eq!(
            errors.entry("items.*.email").and_then(|e| e.get("email")),
            Some("An item email is broken")
        );
    }

    #[test]
    fn flat_entry_falls_back_to_wildcard_message() {
        let table = MessageTable::new().with_message("en", "items.*.email", "email", "Bad email");
        let mut errors = store(table, "en");
        errors.push_error("items.0.email", "email", None);
        assert_eq!(errors.first_error_for("items.0.email"), Some("Bad email"));
        assert_eq!(errors.first_error_for("items[0].email"), Some("Bad email"));
    }

    #[test]
    fn explicit_message_wins_and_blank_input_is_ignored() {
        let table = MessageTable::new().with_locale_fallback("*", "Invalid");
        let mut errors = store(table, "*");
        errors.push_error("  ", "required", None);
        errors.push_error("email", "  ", None);
        errors.push_error("...", "required", None);
        assert!(errors.is_empty());

        errors.push_error(" email ", " taken ", Some("Already registered"));
        errors.push_error("email", "min", Some("   "));
        assert_eq!(
            errors.errors_for("email"),
            vec!["Already registered".to_string(), "Invalid".to_string()]
        );
    }

    #[test]
    fn same_code_overwrites_in_place() {
        let mut errors = store(MessageTable::new(), "*");
        errors.push_error("name", "min", Some("first"));
        errors.push_error("name", "required", None);
        errors.push_error("name", "min", Some("second"));
        assert_eq!(
            errors.errors_for("name"),
            vec!["second".to_string(), "required".to_string()]
        );
    }

    #[test]
    fn clear_removes_both_keys() {
        let mut errors = store(MessageTable::new(), "*");
        errors.push_error("items[1].name", "required", None);
        errors.push_error("title", "required", None);
        errors.clear_error("items[1].name");
        assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["title"]);
    }

    #[test]
    fn validation_import_replaces_previous_state() {
        let mut errors = store(MessageTable::new(), "*");
        errors.push_error("stale", "required", None);
        errors.import_validation_failures(&ValidationFailures::Many(vec![
            ValidationFailure::new("email", ["required", "email"]),
            ValidationFailure::code("items[0].qty", "min"),
        ]));

        assert!(!errors.is_failed("stale"));
        assert_eq!(errors.errors_for("email").len(), 2);
        assert!(errors.is_failed("items.0.qty"));
        assert!(errors.entry("items.*.qty").is_some());
    }

    #[test]
    fn server_payload_shapes_are_normalized() {
        let payload = ServerErrors::from_json_value(&json!({
            "email": { "taken": "Already registered", "format": "  " },
            "name": ["  Too short ", "", "Not unique"],
            "age": "Must be an adult",
            "count": 0,
            "flag": false,
            "nested": { "deep": { "x": 1 } }
        }));
        let table = MessageTable::new().with_message("*", "email", "format", "Bad format");
        let mut errors = store(table, "*");
        errors.push_error("stale", "required", None);
        errors.import_server_errors(&payload);

        assert!(!errors.is_failed("stale"));
        assert_eq!(
            errors.errors_for("email"),
            vec!["Already registered".to_string(), "Bad format".to_string()]
        );
        assert_eq!(
            errors.errors_for("name"),
            vec!["Too short".to_string(), "Not unique".to_string()]
        );
        assert_eq!(errors.first_error_for("age"), Some("Must be an adult"));
        assert!(!errors.is_failed("count"));
        assert!(!errors.is_failed("flag"));
        assert!(!errors.is_failed("nested"));
    }

    #[test]
    fn locale_catchall_shadows_uncoded_server_messages() {
        let payload = ServerErrors::from_json_value(&json!({
            "email": ["Email already taken"],
            "name": "Too short",
            "age": { "min": "At least 18" }
        }));
        assert!(!payload.is_empty());
        let table = MessageTable::new().with_locale_fallback("en", "Something is wrong");
        let mut errors = store(table, "en");
        errors.import_server_errors(&payload);

        assert_eq!(errors.first_error_for("email"), Some("Something is wrong"));
        assert_eq!(errors.first_error_for("name"), Some("Something is wrong"));
        assert_eq!(errors.first_error_for("age"), Some("At least 18"));

        let email = errors.entry("email").expect("email entry");
        assert_eq!(email.len(), 1);
        assert_eq!(email.codes().collect::<Vec<_>>(), vec!["Email already taken"]);
    }

    #[test]
    fn non_object_server_payload_only_resets() {
        let mut errors = store(MessageTable::new(), "*");
        errors.push_error("email", "required", None);
        let payload = ServerErrors::from(json!(["oops"]));
        assert!(payload.is_empty());
        errors.import_server_errors(&payload);
        assert!(errors.is_empty());
    }
}
