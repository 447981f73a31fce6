//! Wizard session preservation.
//!
//! Multi-step wizards snapshot their partial form state here so a failure or
//! navigation away never loses user input. Sessions expire; an expired
//! session is logically absent and evicted lazily on read.

mod form;
mod store;

pub use form::{BinaryBlob, FileDescriptor, FormData, FormValue, sanitize_form_data};
pub use store::{SessionStore, WizardSession};
