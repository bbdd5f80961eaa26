use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::controller::{FormController, FormResult, SubmitState, read_lock, write_lock};
use super::field::{Field, FieldStatus};

/// Request for the presentation layer to bring a field into view and focus it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FocusRequest {
    pub form: String,
    pub field: String,
    pub id: String,
}

pub(super) type FocusHandler = Arc<dyn Fn(&FocusRequest) + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSnapshot {
    pub id: String,
    pub name: String,
    pub value: Value,
    pub status: FieldStatus,
    pub is_dirty: bool,
    pub is_valid: bool,
    pub error: Option<String>,
    pub errors: Vec<String>,
}

impl FieldSnapshot {
    pub fn capture(field: &Field) -> FormResult<Self> {
        let errors = field.errors()?;
        Ok(Self {
            id: field.id().to_string(),
            name: field.name().to_string(),
            value: field.value()?,
            status: field.status()?,
            is_dirty: field.is_dirty()?,
            is_valid: errors.is_empty(),
            error: errors.first().cloned(),
            errors,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormSnapshot {
    pub name: String,
    pub submit_state: SubmitState,
    pub submit_count: u32,
    pub is_valid: bool,
    pub is_dirty: bool,
    pub fields: Vec<FieldSnapshot>,
}

impl FormSnapshot {
    pub fn is_submitting(&self) -> bool {
        self.submit_state == SubmitState::Submitting
    }

    pub fn is_submitted(&self) -> bool {
        self.submit_count > 0
    }

    pub fn field(&self, name: &str) -> Option<&FieldSnapshot> {
        self.fields.iter().find(|field| field.name == name)
    }
}

impl FormController {
    pub fn on_focus(
        &self,
        handler: impl Fn(&FocusRequest) + Send + Sync + 'static,
    ) -> FormResult<()> {
        *write_lock(&self.focus_handler, "registering focus handler")? = Some(Arc::new(handler));
        Ok(())
    }

    /// Finds the first failed field in registration order. The focus handler is only notified
    /// when `focus_on_error` is enabled; the request is returned either way.
    pub fn scroll_to_first_error(&self) -> FormResult<Option<FocusRequest>> {
        let mut first_failed = None;
        for field in self.registered_fields()? {
            if field.is_failed()? {
                first_failed = Some(field);
                break;
            }
        }
        let Some(field) = first_failed else {
            return Ok(None);
        };

        let request = FocusRequest {
            form: self.name.to_string(),
            field: field.name().to_string(),
            id: field.id().to_string(),
        };
        if self.options.focus_on_error {
            let handler = read_lock(&self.focus_handler, "reading focus handler")?.clone();
            if let Some(handler) = handler {
                debug!(form = %self.name, field = %request.field, "requesting focus");
                handler(&request);
            }
        }
        Ok(Some(request))
    }

    /// The first error of `field`, hidden until the field was edited or the form submitted.
    pub fn field_error_for_display(&self, field: &str) -> FormResult<Option<String>> {
        let edited = match self.field(field)? {
            Some(registered) => registered.is_dirty()?,
            None => false,
        };
        if !edited && self.submission_count()? == 0 {
            return Ok(None);
        }
        self.error(field)
    }

    pub fn field_snapshot(&self, field: &str) -> FormResult<Option<FieldSnapshot>> {
        self.field(field)?
            .map(|field| FieldSnapshot::capture(&field))
            .transpose()
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot> {
        let fields = self
            .registered_fields()?
            .iter()
            .map(FieldSnapshot::capture)
            .collect::<FormResult<Vec<_>>>()?;
        let (submit_state, submit_count) = {
            let state = read_lock(&self.state, "creating form snapshot")?;
            (state.submit_state, state.submit_count)
        };
        Ok(FormSnapshot {
            name: self.name.to_string(),
            submit_state,
            submit_count,
            is_valid: self.is_valid()?,
            is_dirty: fields.iter().any(|field| field.is_dirty),
            fields,
        })
    }
}
