use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::binding::FocusHandler;
use super::errors::{ErrorStore, ServerErrors};
use super::field::{Field, FieldContext, FieldOptions};
use super::validation::{Schema, ValidationFailure, ValidationFailures};
use crate::i18n::{Locale, MessageTable};

/// Field name to value, in field registration order.
pub type FormValues = IndexMap<String, Value>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Submitting,
    Passed,
    Failed,
}

/// How a call to [`FormController::submit`] ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    /// Another submission was still running; nothing happened.
    Skipped,
    Passed,
    Failed,
    /// A schema could not run. The fail callback received the same error.
    Errored(FormError),
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub locale: Locale,
    pub focus_on_error: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            locale: Locale::Any,
            focus_on_error: true,
        }
    }
}

impl FormOptions {
    pub fn from_toml_str(source: &str) -> FormResult<Self> {
        toml::from_str(source).map_err(|error| FormError::Decode(format!("form options: {error}")))
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FormError {
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("invalid submit state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    #[error("validator for field `{field}` failed: {message}")]
    Validator { field: String, message: String },
    #[error("failed to decode {0}")]
    Decode(String),
}

pub type FormResult<T> = Result<T, FormError>;

pub(super) type PassCallback = Arc<dyn Fn(&FormValues) + Send + Sync>;
pub(super) type FailCallback = Arc<dyn Fn(Option<&FormError>) + Send + Sync>;

/// Shared handle to a form's error store, handed to each of its fields.
#[derive(Clone)]
pub struct FormContext {
    name: Arc<str>,
    errors: Arc<RwLock<ErrorStore>>,
}

impl FormContext {
    pub fn new(name: impl Into<Arc<str>>, store: ErrorStore) -> Self {
        Self {
            name: name.into(),
            errors: Arc::new(RwLock::new(store)),
        }
    }

    pub fn read(&self, context: &'static str) -> FormResult<RwLockReadGuard<'_, ErrorStore>> {
        read_lock(&self.errors, context)
    }

    pub fn write(&self, context: &'static str) -> FormResult<RwLockWriteGuard<'_, ErrorStore>> {
        write_lock(&self.errors, context)
    }
}

impl FieldContext for FormContext {
    fn form_name(&self) -> &str {
        &self.name
    }

    fn clear_errors(&self, field: &str) -> FormResult<()> {
        self.write("clearing field errors")?.clear_error(field);
        Ok(())
    }

    fn set_errors(&self, field: &str, failure: &ValidationFailure) -> FormResult<()> {
        self.write("recording field failure")?
            .set_field_failure(field, failure);
        Ok(())
    }

    fn errors(&self, field: &str) -> FormResult<Vec<String>> {
        Ok(self.read("reading field errors")?.errors_for(field))
    }

    fn error(&self, field: &str) -> FormResult<Option<String>> {
        Ok(self
            .read("reading first field error")?
            .first_error_for(field)
            .map(str::to_string))
    }

    fn is_failed(&self, field: &str) -> FormResult<bool> {
        Ok(self.read("reading field failure")?.is_failed(field))
    }
}

pub(super) struct FormState {
    pub(super) submit_state: SubmitState,
    pub(super) submit_count: u32,
}

#[derive(Clone)]
pub struct FormController {
    pub(super) name: Arc<str>,
    pub(super) options: FormOptions,
    pub(super) context: FormContext,
    pub(super) state: Arc<RwLock<FormState>>,
    pub(super) fields: Arc<RwLock<IndexMap<String, Field>>>,
    pub(super) pass_callback: Arc<RwLock<Option<PassCallback>>>,
    pub(super) fail_callback: Arc<RwLock<Option<FailCallback>>>,
    pub(super) focus_handler: Arc<RwLock<Option<FocusHandler>>>,
}

impl FormController {
    pub fn new(name: impl Into<String>, messages: MessageTable, options: FormOptions) -> Self {
        let name: String = name.into();
        let name: Arc<str> = Arc::from(name);
        let locale = messages.resolve_locale(&options.locale);
        debug!(form = %name, %locale, "creating form");
        let store = ErrorStore::new(locale, Arc::new(messages));
        Self {
            context: FormContext::new(name.clone(), store),
            name,
            options,
            state: Arc::new(RwLock::new(FormState {
                submit_state: SubmitState::Idle,
                submit_count: 0,
            })),
            fields: Arc::new(RwLock::new(IndexMap::new())),
            pass_callback: Arc::new(RwLock::new(None)),
            fail_callback: Arc::new(RwLock::new(None)),
            focus_handler: Arc::new(RwLock::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &FormOptions {
        &self.options
    }

    pub fn locale(&self) -> FormResult<String> {
        Ok(self.context.read("reading form locale")?.locale().to_string())
    }

    pub fn context(&self) -> &FormContext {
        &self.context
    }

    /// Creates a field bound to this form. Registering a name twice replaces the earlier field in
    /// its original position.
    pub fn register_field<S>(
        &self,
        name: impl Into<String>,
        schema: S,
        options: FieldOptions,
    ) -> FormResult<Field>
    where
        S: Schema + 'static,
    {
        let field = Field::new(
            name,
            Arc::new(schema),
            options,
            Arc::new(self.context.clone()),
        );
        debug!(form = %self.name, field = %field.name(), id = %field.id(), "registering field");
        write_lock(&self.fields, "registering field")?
            .insert(field.name().to_string(), field.clone());
        Ok(field)
    }

    pub fn field(&self, name: &str) -> FormResult<Option<Field>> {
        Ok(read_lock(&self.fields, "looking up field")?.get(name).cloned())
    }

    pub fn field_names(&self) -> FormResult<Vec<String>> {
        Ok(read_lock(&self.fields, "listing field names")?
            .keys()
            .cloned()
            .collect())
    }

    pub fn on_pass(&self, callback: impl Fn(&FormValues) + Send + Sync + 'static) -> FormResult<()> {
        *write_lock(&self.pass_callback, "registering pass callback")? = Some(Arc::new(callback));
        Ok(())
    }

    pub fn on_fail(
        &self,
        callback: impl Fn(Option<&FormError>) + Send + Sync + 'static,
    ) -> FormResult<()> {
        *write_lock(&self.fail_callback, "registering fail callback")? = Some(Arc::new(callback));
        Ok(())
    }

    pub fn values(&self) -> FormResult<FormValues> {
        let mut values = FormValues::new();
        for field in self.registered_fields()? {
            values.insert(field.name().to_string(), field.value()?);
        }
        Ok(values)
    }

    /// Submission-ready values: each field's transformer applied to its current value.
    pub fn transformed(&self) -> FormResult<FormValues> {
        let mut values = FormValues::new();
        for field in self.registered_fields()? {
            values.insert(field.name().to_string(), field.transform()?);
        }
        Ok(values)
    }

    pub fn is_valid(&self) -> FormResult<bool> {
        Ok(self.context.read("reading form validity")?.is_empty())
    }

    pub fn is_failed(&self) -> FormResult<bool> {
        Ok(!self.is_valid()?)
    }

    pub fn is_dirty(&self) -> FormResult<bool> {
        for field in self.registered_fields()? {
            if field.is_dirty()? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn submit_state(&self) -> FormResult<SubmitState> {
        Ok(read_lock(&self.state, "reading submit state")?.submit_state)
    }

    pub fn is_submitting(&self) -> FormResult<bool> {
        Ok(self.submit_state()? == SubmitState::Submitting)
    }

    pub fn submission_count(&self) -> FormResult<u32> {
        Ok(read_lock(&self.state, "reading submission count")?.submit_count)
    }

    pub fn is_submitted(&self) -> FormResult<bool> {
        Ok(self.submission_count()? > 0)
    }

    pub fn error(&self, field: &str) -> FormResult<Option<String>> {
        self.context.error(field)
    }

    pub fn errors(&self, field: &str) -> FormResult<Vec<String>> {
        self.context.errors(field)
    }

    pub fn is_field_failed(&self, field: &str) -> FormResult<bool> {
        self.context.is_failed(field)
    }

    /// Validates every field concurrently and dispatches to the pass or fail callback.
    ///
    /// Returns [`SubmitOutcome::Skipped`] without side effects while a previous submission is
    /// still running. Any error once the submission started, whether from a schema or from
    /// poisoned state, reaches the fail callback and comes back as [`SubmitOutcome::Errored`].
    /// The submitting flag is cleared on every exit path, including cancellation.
    pub async fn submit(&self) -> FormResult<SubmitOutcome> {
        let Some(mut guard) = self.begin_submit()? else {
            debug!(form = %self.name, "submit already in progress, ignoring");
            return Ok(SubmitOutcome::Skipped);
        };

        let fields = match self.prepare_submit() {
            Ok(fields) => fields,
            Err(error) => return self.interrupt_submit(error),
        };
        debug!(form = %self.name, fields = fields.len(), "submitting");
        let results = join_all(fields.iter().map(|field| field.validate())).await;

        let mut passed = true;
        let mut internal = None;
        for result in results {
            match result {
                Ok(valid) => passed &= valid,
                Err(error) => {
                    if internal.is_none() {
                        internal = Some(error);
                    }
                }
            }
        }

        if let Some(error) = internal {
            return self.interrupt_submit(error);
        }

        if !passed {
            debug!(form = %self.name, "submit failed validation");
            self.scroll_to_first_error()?;
            self.emit_fail(None)?;
            return Ok(SubmitOutcome::Failed);
        }

        let data = match self.transformed() {
            Ok(data) => data,
            Err(error) => return self.interrupt_submit(error),
        };
        debug!(form = %self.name, "submit passed validation");
        guard.finish(SubmitState::Passed);
        self.emit_pass(&data)?;
        Ok(SubmitOutcome::Passed)
    }

    /// Resets every field, taking its new value from `values` when present.
    pub fn reset(&self, values: &FormValues) -> FormResult<()> {
        for field in self.registered_fields()? {
            field.reset(values.get(field.name()).cloned())?;
        }
        Ok(())
    }

    pub fn reset_to_initial(&self) -> FormResult<()> {
        self.reset(&FormValues::new())
    }

    /// Records `code` against `field` outside of schema validation.
    pub fn invalidate(&self, field: &str, code: &str) -> FormResult<()> {
        self.context
            .write("invalidating field")?
            .push_error(field, code, None);
        Ok(())
    }

    /// Replaces all errors with the ones a backend reported.
    pub fn parse_error_response(&self, payload: impl Into<ServerErrors>) -> FormResult<()> {
        let payload = payload.into();
        self.context
            .write("importing server errors")?
            .import_server_errors(&payload);
        Ok(())
    }

    /// Replaces all errors with structured schema failures, each under its own path.
    pub fn import_validation_failures(
        &self,
        failures: impl Into<ValidationFailures>,
    ) -> FormResult<()> {
        let failures = failures.into();
        self.context
            .write("importing validation failures")?
            .import_validation_failures(&failures);
        Ok(())
    }

    pub fn clear_errors(&self) -> FormResult<()> {
        self.context.write("clearing all errors")?.reset();
        Ok(())
    }

    pub(super) fn registered_fields(&self) -> FormResult<Vec<Field>> {
        Ok(read_lock(&self.fields, "reading registered fields")?
            .values()
            .cloned()
            .collect())
    }

    fn begin_submit(&self) -> FormResult<Option<SubmitGuard>> {
        let mut state = write_lock(&self.state, "preparing submit")?;
        if state.submit_state == SubmitState::Submitting {
            return Ok(None);
        }
        transition_submit_state(&mut state, SubmitState::Submitting)?;
        state.submit_count = state.submit_count.saturating_add(1);
        Ok(Some(SubmitGuard {
            state: self.state.clone(),
            outcome: SubmitState::Failed,
        }))
    }

    fn prepare_submit(&self) -> FormResult<Vec<Field>> {
        self.context.write("clearing errors before submit")?.reset();
        self.registered_fields()
    }

    /// Reports an error raised after the submission started to the fail callback.
    fn interrupt_submit(&self, error: FormError) -> FormResult<SubmitOutcome> {
        warn!(form = %self.name, %error, "submit interrupted");
        self.emit_fail(Some(&error))?;
        Ok(SubmitOutcome::Errored(error))
    }

    fn emit_pass(&self, data: &FormValues) -> FormResult<()> {
        let callback = read_lock(&self.pass_callback, "reading pass callback")?.clone();
        if let Some(callback) = callback {
            callback(data);
        }
        Ok(())
    }

    fn emit_fail(&self, cause: Option<&FormError>) -> FormResult<()> {
        let callback = read_lock(&self.fail_callback, "reading fail callback")?.clone();
        if let Some(callback) = callback {
            callback(cause);
        }
        Ok(())
    }
}

/// Leaves the submitting state when dropped.
struct SubmitGuard {
    state: Arc<RwLock<FormState>>,
    outcome: SubmitState,
}

impl SubmitGuard {
    fn finish(&mut self, outcome: SubmitState) {
        self.outcome = outcome;
    }
}

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(error) = transition_submit_state(&mut state, self.outcome) {
            warn!(%error, "forcing submit state back to idle");
            state.submit_state = SubmitState::Idle;
        }
    }
}

pub(super) fn transition_submit_state(
    state: &mut FormState,
    next: SubmitState,
) -> FormResult<()> {
    let current = state.submit_state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Submitting)
            | (SubmitState::Passed, SubmitState::Submitting)
            | (SubmitState::Failed, SubmitState::Submitting)
            | (SubmitState::Submitting, SubmitState::Passed)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    state.submit_state = next;
    Ok(())
}

pub(crate) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(crate) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
