pub use crate::form::{
    Field, FieldOptions, FieldStatus, FocusRequest, FormController, FormError, FormOptions,
    FormResult, FormValues, Schema, SchemaError, ServerErrors, SubmitOutcome, SubmitState,
    ValidationFailure, ValidationFailures, ValidationTrigger,
};
pub use crate::i18n::{Locale, MessageTable};
