//! ---
//! msp_section: "02-message-registry"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Decoded command payloads."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use msp_wire::CommandCode;
use serde::Serialize;

use crate::payload::FieldValues;
use crate::registry::CommandSpec;

/// Structured value produced by applying a schema to a payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Command code.
    pub code: CommandCode,
    /// Symbolic command name.
    pub name: String,
    /// Raw field values in schema order.
    pub values: FieldValues,
    /// The payload was shorter than the schema.
    pub partial: bool,
    /// Payload bytes as received.
    #[serde(skip)]
    pub raw: Bytes,
    /// Wall-clock time of decoding.
    pub received_at: DateTime<Utc>,
    #[serde(skip)]
    spec: Arc<CommandSpec>,
}

impl Record {
    pub(crate) fn new(spec: Arc<CommandSpec>, values: FieldValues, partial: bool, raw: Bytes) -> Self {
        Self {
            code: spec.code,
            name: spec.name.clone(),
            values,
            partial,
            raw,
            received_at: Utc::now(),
            spec,
        }
    }

    /// Raw integer value of a field.
    pub fn get(&self, field: &str) -> Option<i64> {
        self.values.get(field).copied()
    }

    /// Field value converted with the schema scale.
    pub fn scaled(&self, field: &str) -> Option<f64> {
        let scale = self.spec.schema.field(field)?.scale;
        self.get(field).map(|raw| raw as f64 * scale)
    }

    /// Payload as text, trailing NULs removed. Used by string replies such
    /// as `MSP_FC_VARIANT` or `MSP_NAME`.
    pub fn text(&self) -> String {
        let end = self
            .raw
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |last| last + 1);
        String::from_utf8_lossy(&self.raw[..end]).into_owned()
    }

    /// Definition the record was decoded with.
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }
}
