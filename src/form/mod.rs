mod binding;
mod controller;
mod errors;
mod field;
mod path;
mod validation;


pub use binding::{FieldSnapshot, FocusRequest, FormSnapshot};
pub use controller::{
    FormContext, FormController, FormError, FormOptions, FormResult, FormValues, SubmitOutcome,
    SubmitState,
};
pub use errors::{ErrorEntry, ErrorStore, ServerErrors, ServerFieldErrors};
pub use field::{
    DEFAULT_DEBOUNCE_MS, Field, FieldContext, FieldOptions, FieldStatus, PendingValidation,
    Transformer, ValidationTicket, ValidationTrigger,
};
pub use path::{PathKeys, flat_key, wildcard_key};
pub use validation::{
    BoxedValidationFuture, Schema, SchemaError, ValidationFailure, ValidationFailures,
};
