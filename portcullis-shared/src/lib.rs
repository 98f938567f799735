//! Shared error taxonomy and IPC wire types for portcullis.

pub mod errors;
pub mod wire;

pub use errors::{FieldError, PortcullisError, PortcullisResult, RuleError};
