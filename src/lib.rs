pub mod form;
pub mod i18n;
pub mod prelude;

pub use form::{FormController, FormError, FormOptions, FormResult};
pub use i18n::{Locale, MessageTable};
