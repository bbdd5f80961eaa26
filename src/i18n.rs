use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::form::{FormError, FormResult};

/// Table key matching every locale, every field, or every error code depending on its level.
pub const WILDCARD: &str = "*";

#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub enum Locale {
    #[default]
    Any,
    System,
    Tag(String),
}

impl From<String> for Locale {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == WILDCARD {
            return Self::Any;
        }
        if trimmed.eq_ignore_ascii_case("system") {
            return Self::System;
        }
        Self::Tag(trimmed.to_string())
    }
}

impl From<&str> for Locale {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl<'de> Deserialize<'de> for Locale {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::from)
    }
}

impl Locale {
    /// The concrete tag this locale asks for, `None` meaning "any locale".
    pub fn requested(&self) -> Option<String> {
        match self {
            Self::Any => None,
            #[cfg(feature = "i18n")]
            Self::System => sys_locale::get_locale(),
            #[cfg(not(feature = "i18n"))]
            Self::System => None,
            Self::Tag(tag) => Some(tag.clone()),
        }
    }
}

/// Messages registered for one field inside a locale.
///
/// Fields map error codes to messages, the `*` code applying to every code of the field. The `*`
/// field of a locale is its catch-all: a plain string, or a code map whose `*` entry is used.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldMessages {
    Catchall(String),
    Codes(BTreeMap<String, String>),
}

/// Immutable `locale -> field -> code -> message` lookup table with `*` wildcards at every level.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct MessageTable {
    locales: BTreeMap<String, BTreeMap<String, FieldMessages>>,
}

impl MessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(
        mut self,
        locale: impl Into<String>,
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let fields = self.locales.entry(locale.into()).or_default();
        let entry = fields
            .entry(field.into())
            .or_insert_with(|| FieldMessages::Codes(BTreeMap::new()));
        if let FieldMessages::Catchall(_) = entry {
            *entry = FieldMessages::Codes(BTreeMap::new());
        }
        if let FieldMessages::Codes(codes) = entry {
            codes.insert(code.into(), message.into());
        }
        self
    }

    pub fn with_field_fallback(
        self,
        locale: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.with_message(locale, field, WILDCARD, message)
    }

    pub fn with_locale_fallback(
        mut self,
        locale: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.locales
            .entry(locale.into())
            .or_default()
            .insert(WILDCARD.to_string(), FieldMessages::Catchall(message.into()));
        self
    }

    pub fn from_json_str(source: &str) -> FormResult<Self> {
        let value = serde_json::from_str::<Value>(source)
            .map_err(|error| FormError::Decode(format!("message table: {error}")))?;
        Ok(Self::from_json_value(&value))
    }

    /// Lenient decoding: anything that is not shaped like a table entry is skipped.
    pub fn from_json_value(value: &Value) -> Self {
        let mut table = Self::default();
        let Some(locales) = value.as_object() else {
            return table;
        };
        for (locale, fields) in locales {
            let Some(fields) = fields.as_object() else {
                continue;
            };
            let mut decoded = BTreeMap::new();
            for (field, messages) in fields {
                match messages {
                    Value::String(message) => {
                        decoded.insert(field.clone(), FieldMessages::Catchall(message.clone()));
                    }
                    Value::Object(codes) => {
                        let codes = codes
                            .iter()
                            .filter_map(|(code, message)| {
                                message.as_str().map(|m| (code.clone(), m.to_string()))
                            })
                            .collect();
                        decoded.insert(field.clone(), FieldMessages::Codes(codes));
                    }
                    _ => {}
                }
            }
            table.locales.insert(locale.clone(), decoded);
        }
        table
    }

    pub fn from_toml_str(source: &str) -> FormResult<Self> {
        toml::from_str(source).map_err(|error| FormError::Decode(format!("message table: {error}")))
    }

    pub fn is_empty(&self) -> bool {
        self.locales.is_empty()
    }

    pub fn locales(&self) -> impl Iterator<Item = &str> {
        self.locales.keys().map(String::as_str)
    }

    /// Walks the lookup chain, most specific first:
    /// field+code in the locale, field+code in `*`, field fallback in the locale, field fallback
    /// in `*`, the locale catch-all, and finally the global catch-all.
    pub fn find_message(&self, locale: &str, field: &str, code: &str) -> Option<&str> {
        self.coded(locale, field, code)
            .or_else(|| self.coded(WILDCARD, field, code))
            .or_else(|| self.coded(locale, field, WILDCARD))
            .or_else(|| self.coded(WILDCARD, field, WILDCARD))
            .or_else(|| self.catchall(locale))
            .or_else(|| self.catchall(WILDCARD))
    }

    /// Picks the table locale serving `locale`: the exact key, a key equal after tag
    /// normalization, or the only key sharing its language. Unmatched tags are returned verbatim.
    pub fn resolve_locale(&self, locale: &Locale) -> String {
        let Some(requested) = locale.requested() else {
            return WILDCARD.to_string();
        };
        if requested.trim().is_empty() {
            return WILDCARD.to_string();
        }
        if self.locales.contains_key(&requested) {
            return requested;
        }

        let normalized = normalize_locale_tag(&requested);
        let concrete = || self.locales.keys().filter(|key| key.as_str() != WILDCARD);
        if let Some(key) = concrete().find(|key| normalize_locale_tag(key) == normalized) {
            return key.clone();
        }

        let language = normalized.split('-').next().unwrap_or_default();
        let mut same_language =
            concrete().filter(|key| normalize_locale_tag(key).split('-').next() == Some(language));
        match (same_language.next(), same_language.next()) {
            (Some(only), None) => only.clone(),
            _ => requested,
        }
    }

    fn coded(&self, locale: &str, field: &str, code: &str) -> Option<&str> {
        match self.locales.get(locale)?.get(field)? {
            FieldMessages::Codes(codes) => codes
                .get(code)
                .map(String::as_str)
                .filter(|message| is_usable(message)),
            FieldMessages::Catchall(_) => None,
        }
    }

    fn catchall(&self, locale: &str) -> Option<&str> {
        let message = match self.locales.get(locale)?.get(WILDCARD)? {
            FieldMessages::Catchall(message) => message,
            FieldMessages::Codes(codes) => codes.get(WILDCARD)?,
        };
        Some(message.as_str()).filter(|m| is_usable(m))
    }
}

fn is_usable(message: &str) -> bool {
    !message.trim().is_empty()
}

fn normalize_locale_tag(tag: &str) -> String {
    let trimmed = tag.trim();
    let without_encoding = trimmed.split('.').next().unwrap_or(trimmed);
    let without_variant = without_encoding
        .split('@')
        .next()
        .unwrap_or(without_encoding);
    without_variant
        .replace('_', "-")
        .split('-')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}
