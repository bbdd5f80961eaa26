use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{AbortHandle, Abortable};
use futures_timer::Delay;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::controller::{FormError, FormResult, read_lock, write_lock};
use super::validation::{Schema, SchemaError, ValidationFailure};

pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

static FIELD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Generation counter of a field's validations. Only the latest ticket may commit a result.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

impl ValidationTicket {
    fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationTrigger {
    #[serde(alias = "change")]
    OnChange,
    #[default]
    #[serde(alias = "submit")]
    OnSubmit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldStatus {
    Clean,
    Dirty,
    Validating,
    Valid,
    Invalid,
}

pub type Transformer = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct FieldOptions {
    pub trigger: ValidationTrigger,
    pub debounce_ms: u64,
    pub cast: bool,
    pub initial_value: Value,
    #[serde(skip)]
    pub transformer: Option<Transformer>,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            trigger: ValidationTrigger::OnSubmit,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            cast: false,
            initial_value: Value::Null,
            transformer: None,
        }
    }
}

impl Debug for FieldOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldOptions")
            .field("trigger", &self.trigger)
            .field("debounce_ms", &self.debounce_ms)
            .field("cast", &self.cast)
            .field("initial_value", &self.initial_value)
            .field("transformer", &self.transformer.is_some())
            .finish()
    }
}

impl FieldOptions {
    pub fn with_transformer(
        mut self,
        transformer: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.transformer = Some(Arc::new(transformer));
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// What a field needs from its form: somewhere to record and read its errors.
pub trait FieldContext: Send + Sync {
    fn form_name(&self) -> &str;
    fn clear_errors(&self, field: &str) -> FormResult<()>;
    fn set_errors(&self, field: &str, failure: &ValidationFailure) -> FormResult<()>;
    fn errors(&self, field: &str) -> FormResult<Vec<String>>;
    fn error(&self, field: &str) -> FormResult<Option<String>>;
    fn is_failed(&self, field: &str) -> FormResult<bool>;
}

/// A debounced on-change validation. Resolves to `None` when a newer edit or a reset cancelled
/// the timer, otherwise to the validation verdict. Dropping it before the timer fires cancels it.
#[must_use = "the debounced validation only runs while polled"]
pub struct PendingValidation {
    field: Field,
    generation: u64,
    inner: Pin<Box<dyn Future<Output = FormResult<Option<bool>>> + Send>>,
}

impl Future for PendingValidation {
    type Output = FormResult<Option<bool>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl Drop for PendingValidation {
    fn drop(&mut self) {
        if self.field.disarm_debounce(self.generation) {
            trace!(field = %self.field.name(), generation = self.generation, "debounce dropped");
        }
    }
}

struct DebounceTimer {
    generation: u64,
    handle: AbortHandle,
}

struct FieldState {
    value: Value,
    dirty: bool,
    ticket: ValidationTicket,
    validating: bool,
    verdict: Option<bool>,
    debounce: Option<DebounceTimer>,
    debounce_generation: u64,
}

struct FieldInner {
    id: String,
    name: String,
    options: FieldOptions,
    schema: Arc<dyn Schema>,
    context: Arc<dyn FieldContext>,
    state: RwLock<FieldState>,
}

#[derive(Clone)]
pub struct Field {
    inner: Arc<FieldInner>,
}

impl Debug for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Field {
    pub fn new(
        name: impl Into<String>,
        schema: Arc<dyn Schema>,
        options: FieldOptions,
        context: Arc<dyn FieldContext>,
    ) -> Self {
        let name = name.into();
        let id = field_id(context.form_name(), &name);
        let value = options.initial_value.clone();
        Self {
            inner: Arc::new(FieldInner {
                id,
                name,
                options,
                schema,
                context,
                state: RwLock::new(FieldState {
                    value,
                    dirty: false,
                    ticket: ValidationTicket::default(),
                    validating: false,
                    verdict: None,
                    debounce: None,
                    debounce_generation: 0,
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &FieldOptions {
        &self.inner.options
    }

    pub fn value(&self) -> FormResult<Value> {
        Ok(read_lock(&self.inner.state, "reading field value")?
            .value
            .clone())
    }

    /// Assigns a new value. Equal values are ignored. For on-change fields the returned future
    /// owns the debounce timer and must be polled for the validation to happen.
    pub fn set_value(&self, value: impl Into<Value>) -> FormResult<Option<PendingValidation>> {
        let value = value.into();
        let (generation, registration) = {
            let mut state = write_lock(&self.inner.state, "writing field value")?;
            if state.value == value {
                return Ok(None);
            }
            state.value = value;
            state.dirty = true;
            state.verdict = None;
            if self.inner.options.trigger != ValidationTrigger::OnChange {
                return Ok(None);
            }
            if let Some(previous) = state.debounce.take() {
                trace!(field = %self.inner.name, generation = previous.generation, "debounce superseded");
                previous.handle.abort();
            }
            state.debounce_generation = state.debounce_generation.wrapping_add(1);
            let generation = state.debounce_generation;
            let (handle, registration) = AbortHandle::new_pair();
            state.debounce = Some(DebounceTimer { generation, handle });
            (generation, registration)
        };

        let timer = Abortable::new(Delay::new(self.inner.options.debounce()), registration);
        let field = self.clone();
        Ok(Some(PendingValidation {
            field: self.clone(),
            generation,
            inner: Box::pin(async move {
                if timer.await.is_err() {
                    return Ok(None);
                }
                field.disarm_debounce(generation);
                field.validate().await.map(Some)
            }),
        }))
    }

    /// Runs the schema against the current value. A result is committed only while this call
    /// holds the latest ticket; superseded calls resolve `false` without touching any state.
    pub async fn validate(&self) -> FormResult<bool> {
        let (ticket, value) = self.begin_validation()?;
        let result = self.inner.schema.validate(&value).await;
        self.commit_validation(ticket, result)
    }

    /// Clears dirtiness and errors, cancels a pending debounce and restores `value` (or the
    /// initial value when `None` or null). In-flight validations keep their ticket and still
    /// commit, so the field stays `Validating` until they do.
    pub fn reset(&self, value: Option<Value>) -> FormResult<()> {
        let mut state = write_lock(&self.inner.state, "resetting field")?;
        state.value = value
            .filter(|value| !value.is_null())
            .unwrap_or_else(|| self.inner.options.initial_value.clone());
        state.dirty = false;
        state.verdict = None;
        if let Some(timer) = state.debounce.take() {
            trace!(field = %self.inner.name, generation = timer.generation, "debounce cancelled by reset");
            timer.handle.abort();
        }
        self.inner.context.clear_errors(&self.inner.name)
    }

    pub fn transform(&self) -> FormResult<Value> {
        let value = self.value()?;
        Ok(match &self.inner.options.transformer {
            Some(transformer) => transformer(&value),
            None => value,
        })
    }

    pub fn is_dirty(&self) -> FormResult<bool> {
        Ok(read_lock(&self.inner.state, "reading field dirty flag")?.dirty)
    }

    pub fn is_validating(&self) -> FormResult<bool> {
        Ok(read_lock(&self.inner.state, "reading field validating flag")?.validating)
    }

    pub fn is_failed(&self) -> FormResult<bool> {
        self.inner.context.is_failed(&self.inner.name)
    }

    pub fn is_valid(&self) -> FormResult<bool> {
        Ok(!self.is_failed()?)
    }

    pub fn error(&self) -> FormResult<Option<String>> {
        self.inner.context.error(&self.inner.name)
    }

    pub fn errors(&self) -> FormResult<Vec<String>> {
        self.inner.context.errors(&self.inner.name)
    }

    pub fn ticket(&self) -> FormResult<ValidationTicket> {
        Ok(read_lock(&self.inner.state, "reading field ticket")?.ticket)
    }

    pub fn status(&self) -> FormResult<FieldStatus> {
        let state = read_lock(&self.inner.state, "reading field status")?;
        Ok(if state.validating {
            FieldStatus::Validating
        } else {
            match state.verdict {
                Some(true) => FieldStatus::Valid,
                Some(false) => FieldStatus::Invalid,
                None if state.dirty => FieldStatus::Dirty,
                None => FieldStatus::Clean,
            }
        })
    }

    pub fn has_pending_debounce(&self) -> FormResult<bool> {
        Ok(read_lock(&self.inner.state, "reading field debounce")?
            .debounce
            .is_some())
    }

    fn begin_validation(&self) -> FormResult<(ValidationTicket, Value)> {
        let mut state = write_lock(&self.inner.state, "starting field validation")?;
        state.ticket = state.ticket.next();
        state.validating = true;
        if self.inner.options.cast {
            let raw = std::mem::take(&mut state.value);
            state.value = self.inner.schema.cast(raw);
        }
        trace!(field = %self.inner.name, ticket = state.ticket.0, "validation started");
        Ok((state.ticket, state.value.clone()))
    }

    fn commit_validation(
        &self,
        ticket: ValidationTicket,
        result: Result<(), SchemaError>,
    ) -> FormResult<bool> {
        let mut state = write_lock(&self.inner.state, "committing field validation")?;
        if state.ticket != ticket {
            debug!(
                field = %self.inner.name,
                ticket = ticket.0,
                current = state.ticket.0,
                "discarding superseded validation result"
            );
            return Ok(false);
        }
        state.validating = false;
        match result {
            Ok(()) => {
                state.verdict = Some(true);
                self.inner.context.clear_errors(&self.inner.name)?;
                Ok(true)
            }
            Err(SchemaError::Invalid(failure)) => {
                state.verdict = Some(false);
                self.inner.context.set_errors(&self.inner.name, &failure)?;
                Ok(false)
            }
            Err(SchemaError::Internal(error)) => {
                state.verdict = None;
                Err(FormError::Validator {
                    field: self.inner.name.clone(),
                    message: format!("{error:#}"),
                })
            }
        }
    }

    /// Aborts and forgets the debounce timer if it is still `generation`. Runs from `Drop`, so a
    /// poisoned lock is recovered rather than reported.
    fn disarm_debounce(&self, generation: u64) -> bool {
        let mut state = match self.inner.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !state
            .debounce
            .as_ref()
            .is_some_and(|timer| timer.generation == generation)
        {
            return false;
        }
        if let Some(timer) = state.debounce.take() {
            timer.handle.abort();
        }
        true
    }
}

fn field_id(form: &str, field: &str) -> String {
    let sequence = FIELD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let seed = format!("{form}:{field}:{sequence}");
    let mut hash = fnv1a64(seed.as_bytes());
    let mut suffix = String::with_capacity(6);
    for _ in 0..6 {
        let digit = (hash % 36) as u32;
        suffix.push(char::from_digit(digit, 36).unwrap_or('0'));
        hash /= 36;
    }
    [form, field, suffix.as_str()].join("-")
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x00000100000001b3;

    let mut hash = OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
