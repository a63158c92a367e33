//! ---
//! msp_section: "02-message-registry"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Name and code lookup over command definitions."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use msp_wire::CommandCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::field::{FieldDef, FieldKind, Schema};
use crate::payload::{decode_payload, decode_payload_strict, encode_payload, FieldValues};
use crate::record::Record;
use crate::{Result, SchemaError};

/// A registered command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Numeric code.
    pub code: CommandCode,
    /// Canonical upper-case name.
    pub name: String,
    /// Payload layout.
    pub schema: Schema,
}

impl CommandSpec {
    /// Define a command.
    pub fn new(code: impl Into<CommandCode>, name: impl Into<String>, schema: Schema) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            schema,
        }
    }
}

/// Field entry of a [`CommandDef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    /// Field name.
    pub name: String,
    /// Width; optional when the command gives a `layout` string.
    #[serde(default)]
    pub kind: Option<FieldKind>,
    /// Scale factor, defaults to 1.
    #[serde(default)]
    pub scale: Option<f64>,
}

/// Serializable command definition, as found in `[[registry.commands]]`.
///
/// ```toml
/// [[registry.commands]]
/// name = "MSP2_SENSOR_RANGEFINDER"
/// code = 7937
/// layout = "<Bi"
/// fields = [{ name = "quality" }, { name = "distance_mm", scale = 0.001 }]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDef {
    /// Command name.
    pub name: String,
    /// Numeric code.
    pub code: u16,
    /// Packed layout string; when absent every field must carry a `kind`.
    #[serde(default)]
    pub layout: Option<String>,
    /// Fields in wire order.
    #[serde(default)]
    pub fields: Vec<FieldEntry>,
}

impl CommandDef {
    /// Turn the definition into a registry entry.
    pub fn into_spec(self) -> Result<CommandSpec> {
        let invalid = |reason: String| SchemaError::InvalidDefinition {
            command: self.name.clone(),
            reason,
        };
        let kinds: Vec<FieldKind> = match &self.layout {
            Some(layout) => {
                let names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
                let schema = Schema::from_layout(layout, &names).map_err(invalid)?;
                let kinds: Vec<FieldKind> = schema.fields().iter().map(|f| f.kind).collect();
                for (entry, kind) in self.fields.iter().zip(&kinds) {
                    if entry.kind.is_some_and(|declared| declared != *kind) {
                        return Err(invalid(format!(
                            "field `{}` declared {} but layout says {kind}",
                            entry.name,
                            entry.kind.map(|k| k.to_string()).unwrap_or_default()
                        )));
                    }
                }
                kinds
            }
            None => self
                .fields
                .iter()
                .map(|entry| {
                    entry
                        .kind
                        .ok_or_else(|| invalid(format!("field `{}` has no kind", entry.name)))
                })
                .collect::<Result<_>>()?,
        };
        let fields = self
            .fields
            .iter()
            .zip(kinds)
            .map(|(entry, kind)| {
                FieldDef::new(entry.name.clone(), kind).scaled(entry.scale.unwrap_or(1.0))
            })
            .collect();
        Ok(CommandSpec::new(
            self.code,
            self.name.to_ascii_uppercase(),
            Schema::new(fields),
        ))
    }
}

/// Immutable command table keyed by code and by name.
#[derive(Debug, Default)]
pub struct Registry {
    by_code: BTreeMap<CommandCode, Arc<CommandSpec>>,
    by_name: HashMap<String, CommandCode>,
}

impl Registry {
    /// Start an empty builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Shared registry holding the built-in command table.
    pub fn builtin() -> Arc<Registry> {
        crate::builtin::shared()
    }

    /// Resolve a command name (case-insensitive) to its code.
    pub fn lookup_by_name(&self, name: &str) -> Result<CommandCode> {
        self.by_name
            .get(&name.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| SchemaError::UnknownCommand(name.to_string()))
    }

    /// Resolve a code to its definition.
    pub fn lookup_by_code(&self, code: CommandCode) -> Result<&CommandSpec> {
        self.get(code)
            .map(Arc::as_ref)
            .ok_or(SchemaError::UnknownCode(code))
    }

    /// Definition for a name.
    pub fn spec_by_name(&self, name: &str) -> Result<&CommandSpec> {
        self.lookup_by_code(self.lookup_by_name(name)?)
    }

    /// Shared handle to a definition, if registered.
    pub fn get(&self, code: CommandCode) -> Option<&Arc<CommandSpec>> {
        self.by_code.get(&code)
    }

    /// Whether a code is known.
    pub fn contains(&self, code: CommandCode) -> bool {
        self.by_code.contains_key(&code)
    }

    /// Definitions ordered by code.
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.by_code.values().map(Arc::as_ref)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    /// Whether the registry holds no commands.
    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Encode a payload for a named command.
    pub fn encode(&self, name: &str, values: &FieldValues) -> Result<(CommandCode, Bytes)> {
        let spec = self.spec_by_name(name)?;
        Ok((spec.code, encode_payload(&spec.schema, values)?))
    }

    /// Decode a payload leniently; short payloads yield a partial record.
    pub fn decode(&self, code: CommandCode, payload: Bytes) -> Result<Record> {
        let spec = self.get(code).ok_or(SchemaError::UnknownCode(code))?;
        let decoded = decode_payload(&spec.schema, &payload);
        if decoded.partial {
            warn!(
                command = %spec.name,
                code = code.get(),
                expected = spec.schema.wire_len(),
                actual = payload.len(),
                "short payload, missing fields zero-filled"
            );
        }
        Ok(Record::new(
            Arc::clone(spec),
            decoded.values,
            decoded.partial,
            payload,
        ))
    }

    /// Decode a payload, failing on truncation.
    pub fn decode_strict(&self, code: CommandCode, payload: Bytes) -> Result<Record> {
        let spec = self.get(code).ok_or(SchemaError::UnknownCode(code))?;
        let values = decode_payload_strict(&spec.schema, &payload)?;
        Ok(Record::new(Arc::clone(spec), values, false, payload))
    }
}

/// Collects command definitions and validates them into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    commands: Vec<CommandSpec>,
}

impl RegistryBuilder {
    /// Seed the builder with the built-in command table.
    pub fn with_builtin(mut self) -> Self {
        self.commands
            .extend(crate::builtin::shared().iter().cloned());
        self
    }

    /// Add one definition.
    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }

    /// Add a serialized definition.
    pub fn define(self, def: CommandDef) -> Result<Self> {
        Ok(self.command(def.into_spec()?))
    }

    /// Validate and freeze. Duplicate names or codes are rejected.
    pub fn build(self) -> Result<Registry> {
        let mut registry = Registry::default();
        for spec in self.commands {
            let key = spec.name.to_ascii_uppercase();
            if registry.by_name.contains_key(&key) {
                return Err(SchemaError::Duplicate(spec.name));
            }
            if registry.by_code.contains_key(&spec.code) {
                return Err(SchemaError::Duplicate(format!("{} (code {})", spec.name, spec.code)));
            }
            registry.by_name.insert(key, spec.code);
            registry.by_code.insert(spec.code, Arc::new(spec));
        }
        Ok(registry)
    }
}
