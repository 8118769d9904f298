//! # Error Types
//!
//! Error handling for the codec, the module framework and the connection layer.
//!
//! ## Error Categories
//! - **I/O Errors**: socket and file system failures
//! - **Schema Errors**: programmer errors while defining a packet schema
//! - **Encode Errors**: values that do not fit the schema or the output buffer
//! - **Decode Errors**: malformed, truncated or adversarial input
//! - **Wiring Errors**: duplicate modules, missing dependencies, exhausted capacities
//! - **Config Errors**: unreadable or invalid configuration
//!
//! Decode errors carry a reason for local diagnostics only. Callers drop the
//! offending message and never answer it on the wire.
//!
//! ## Example Usage
//! ```rust
//! use realm_core::error::{CoreError, Result};
//! use tracing::{info, error};
//!
//! fn read_config(path: &str) -> Result<String> {
//!     std::fs::read_to_string(path).map_err(CoreError::Io)
//! }
//!
//! match read_config("realm.toml") {
//!     Ok(contents) => info!(len = contents.len(), "Loaded config"),
//!     Err(e) => error!(error = %e, "Failed to load config"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to keep error paths free of formatting work.
pub mod constants {
    /// Schema definition errors
    pub const ERR_NO_FIELDS_ALLOWED: &str = "Flag word has no room for another field";
    pub const ERR_ZERO_COUNT: &str = "Field repeat count must be greater than zero";
    pub const ERR_TOO_MANY_FIELDS: &str = "Schema exceeds the maximum field count";

    /// Encode errors
    pub const ERR_VALUE_MISMATCH: &str = "Field value does not match the field type";
    pub const ERR_VALUE_TOO_LONG: &str = "Field value is longer than the field allows";
    pub const ERR_BAD_SUB_PACKET: &str = "Sub-packet is missing or has a bad length prefix";
    pub const ERR_ARRAY_TOO_LONG: &str = "Packet array exceeds the declared capacity";

    /// Module wiring errors
    pub const ERR_NAME_TOO_LONG: &str = "Module name exceeds the maximum length";
    pub const ERR_LAYOUT_SEALED: &str = "Record layouts are sealed after initialization";
    pub const ERR_NO_RECORD_LAYOUT: &str = "Record kind has no layout on its owner";
    pub const ERR_RECORD_MISMATCH: &str = "Record does not belong to this layout";
}

/// Reason a buffer was rejected by the decoder.
///
/// The reason exists for logs and tests. It never changes what the caller
/// does with the message: the whole message is dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ends before the header, the flag word or a field.
    #[error("truncated")]
    Truncated,
    /// Front or rear guard byte does not match.
    #[error("bad guard byte")]
    BadGuard,
    /// Declared length is smaller than the fixed part of the message.
    #[error("bad declared length")]
    BadLength,
    /// Packet array carries more elements than its declared capacity.
    #[error("packet array overflow")]
    ArrayOverflow,
}

// CoreError is the primary error type for every substrate operation
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Schema error: {0}")]
    Schema(&'static str),

    #[error("Invalid flag word width: {0} bytes")]
    InvalidFlagWidth(u8),

    #[error("Encode error on field {field}: {reason}")]
    Encode { field: usize, reason: &'static str },

    #[error("Field index {0} is outside the schema")]
    FieldOutOfRange(usize),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Module already registered: {0}")]
    DuplicateModule(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Module {module} depends on unknown module {dependency}")]
    MissingDependency { module: String, dependency: String },

    #[error("Dependency cycle involving module {0}")]
    DependencyCycle(String),

    #[error("Module {module} cannot move from {from} to {to}")]
    InvalidTransition {
        module: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Module {module} failed in {hook} hook: {reason}")]
    HookFailed {
        module: String,
        hook: &'static str,
        reason: String,
    },

    #[error("Module {module} has no state of the requested type")]
    StateTypeMismatch { module: String },

    #[error("Callback capacity exhausted on {module} for id {id}")]
    CallbackCapacity { module: String, id: u32 },

    #[error("Callback id {0} out of range")]
    CallbackIdOutOfRange(u32),

    #[error("Record kind {kind} is not available on module {module}")]
    RecordKindOutOfRange { module: String, kind: u32 },

    #[error("Attachment capacity exhausted on {module} for record kind {kind}")]
    AttachmentCapacity { module: String, kind: u32 },

    #[error("Wiring error: {0}")]
    Wiring(&'static str),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err: CoreError = DecodeError::Truncated.into();
        assert_eq!(err.to_string(), "Decode error: truncated");
        assert_eq!(DecodeError::ArrayOverflow.to_string(), "packet array overflow");
    }

    #[test]
    fn test_transition_display() {
        let err = CoreError::InvalidTransition {
            module: "character".into(),
            from: "Created",
            to: "Running",
        };
        assert!(err.to_string().contains("character"));
    }
}
