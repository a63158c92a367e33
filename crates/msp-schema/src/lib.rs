//! ---
//! msp_section: "02-message-registry"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Command registry and positional payload codec."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
//! Message registry for MSP commands.
//!
//! Every known command maps a symbolic name (`MSP_RAW_GPS`) to a numeric
//! [`CommandCode`] and a positional [`Schema`]: an ordered list of
//! fixed-width little-endian integer fields. The registry is built once and
//! shared immutably between the engine and its callers.
#![warn(missing_docs)]

pub mod builtin;
pub mod field;
pub mod payload;
pub mod record;
pub mod registry;

pub use builtin::codes;
pub use field::{FieldDef, FieldKind, Schema};
pub use payload::{decode_payload, decode_payload_strict, encode_payload, DecodedPayload, FieldValues};
pub use record::Record;
pub use registry::{CommandDef, CommandSpec, FieldEntry, Registry, RegistryBuilder};

use msp_wire::CommandCode;

/// Shared result alias for registry operations.
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Errors raised while resolving commands or converting payloads.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// No command with this name is registered.
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    /// No command with this code is registered.
    #[error("unknown command code {0}")]
    UnknownCode(CommandCode),
    /// A value was supplied for a field the schema does not declare.
    #[error("schema has no field `{0}`")]
    UnknownField(String),
    /// A value does not fit the declared field width.
    #[error("value {value} for field `{field}` outside [{min}, {max}]")]
    FieldRange {
        /// Field name.
        field: String,
        /// Rejected value.
        value: i64,
        /// Smallest accepted value.
        min: i64,
        /// Largest accepted value.
        max: i64,
    },
    /// Fewer payload bytes than the schema requires (strict decoding only).
    #[error("payload truncated: expected {expected} bytes, got {actual}")]
    TruncatedPayload {
        /// Bytes required by the schema.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },
    /// Two registry entries share a name or a code.
    #[error("duplicate command definition `{0}`")]
    Duplicate(String),
    /// A custom command definition could not be turned into a schema.
    #[error("invalid definition for `{command}`: {reason}")]
    InvalidDefinition {
        /// Command being defined.
        command: String,
        /// What was wrong with it.
        reason: String,
    },
}
