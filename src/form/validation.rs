use std::fmt::{Display, Formatter};
use std::future::{self, Future};
use std::pin::Pin;

use serde::Deserialize;
use serde_json::Value;

use super::controller::{FormError, FormResult};

pub type BoxedValidationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), SchemaError>> + Send + 'a>>;

/// A structured failure reported by a schema: the offending path and its error codes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct ValidationFailure {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationFailure {
    pub fn new<I, C>(path: impl Into<String>, errors: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self {
            path: path.into(),
            errors: errors.into_iter().map(Into::into).collect(),
        }
    }

    pub fn code(path: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(path, [code.into()])
    }
}

impl Display for ValidationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.errors.join(", "))
    }
}

/// One failure or an ordered batch of them, as produced by whole-object schema validation.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ValidationFailures {
    Many(Vec<ValidationFailure>),
    One(ValidationFailure),
}

impl ValidationFailures {
    pub fn from_json_value(value: Value) -> FormResult<Self> {
        serde_json::from_value(value)
            .map_err(|error| FormError::Decode(format!("validation failures: {error}")))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationFailure> {
        match self {
            Self::Many(failures) => failures.iter(),
            Self::One(failure) => std::slice::from_ref(failure).iter(),
        }
    }
}

impl From<ValidationFailure> for ValidationFailures {
    fn from(value: ValidationFailure) -> Self {
        Self::One(value)
    }
}

impl From<Vec<ValidationFailure>> for ValidationFailures {
    fn from(value: Vec<ValidationFailure>) -> Self {
        Self::Many(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The value was checked and rejected. Recorded as field errors.
    #[error("validation failed: {0}")]
    Invalid(ValidationFailure),
    /// The check itself could not run. Surfaced to the submission boundary.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ValidationFailure> for SchemaError {
    fn from(value: ValidationFailure) -> Self {
        Self::Invalid(value)
    }
}

/// The validation capability a field delegates to.
pub trait Schema: Send + Sync {
    /// Coerces a raw value before validation; only called for fields created with `cast`.
    fn cast(&self, value: Value) -> Value {
        value
    }

    fn validate<'a>(&'a self, value: &'a Value) -> BoxedValidationFuture<'a>;
}

impl<F> Schema for F
where
    F: Fn(&Value) -> Result<(), ValidationFailure> + Send + Sync,
{
    fn validate<'a>(&'a self, value: &'a Value) -> BoxedValidationFuture<'a> {
        let result = (self)(value).map_err(SchemaError::Invalid);
        Box::pin(future::ready(result))
    }
}
