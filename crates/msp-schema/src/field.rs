//! ---
//! msp_section: "02-message-registry"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Field kinds and positional schemas."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{Result, SchemaError};

/// Width and signedness of a single payload field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FieldKind {
    /// Unsigned 8-bit.
    U8,
    /// Unsigned 16-bit.
    U16,
    /// Unsigned 32-bit.
    U32,
    /// Signed 8-bit.
    I8,
    /// Signed 16-bit.
    I16,
    /// Signed 32-bit.
    I32,
}

impl FieldKind {
    /// Bytes occupied on the wire.
    pub const fn width(self) -> usize {
        match self {
            FieldKind::U8 | FieldKind::I8 => 1,
            FieldKind::U16 | FieldKind::I16 => 2,
            FieldKind::U32 | FieldKind::I32 => 4,
        }
    }

    /// Whether the field is two's complement.
    pub const fn is_signed(self) -> bool {
        matches!(self, FieldKind::I8 | FieldKind::I16 | FieldKind::I32)
    }

    /// Inclusive value range.
    pub const fn range(self) -> (i64, i64) {
        match self {
            FieldKind::U8 => (0, u8::MAX as i64),
            FieldKind::U16 => (0, u16::MAX as i64),
            FieldKind::U32 => (0, u32::MAX as i64),
            FieldKind::I8 => (i8::MIN as i64, i8::MAX as i64),
            FieldKind::I16 => (i16::MIN as i64, i16::MAX as i64),
            FieldKind::I32 => (i32::MIN as i64, i32::MAX as i64),
        }
    }

    /// Map a packed-layout character (`B`, `H`, `I`, `b`, `h`, `i`).
    pub fn from_layout_char(c: char) -> Option<Self> {
        match c {
            'B' => Some(FieldKind::U8),
            'H' => Some(FieldKind::U16),
            'I' | 'L' => Some(FieldKind::U32),
            'b' => Some(FieldKind::I8),
            'h' => Some(FieldKind::I16),
            'i' | 'l' => Some(FieldKind::I32),
            _ => None,
        }
    }

    /// Read one little-endian value; `bytes` must hold at least `width()` bytes.
    pub(crate) fn read(self, bytes: &[u8]) -> i64 {
        match self {
            FieldKind::U8 => i64::from(bytes[0]),
            FieldKind::I8 => i64::from(bytes[0] as i8),
            FieldKind::U16 => i64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            FieldKind::I16 => i64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            FieldKind::U32 => {
                i64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            FieldKind::I32 => {
                i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        }
    }
}

/// One named field of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name used in value maps.
    pub name: String,
    /// Wire width and signedness.
    pub kind: FieldKind,
    /// Multiplier from the raw integer to engineering units.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl FieldDef {
    /// Unscaled field.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            scale: 1.0,
        }
    }

    /// Attach a scale factor.
    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Check that `value` fits the field width.
    pub fn check(&self, value: i64) -> Result<()> {
        let (min, max) = self.kind.range();
        if value < min || value > max {
            return Err(SchemaError::FieldRange {
                field: self.name.clone(),
                value,
                min,
                max,
            });
        }
        Ok(())
    }
}

/// Ordered field list describing a payload layout.
///
/// An empty schema marks a command whose payload is opaque (text or a
/// variable-length blob); such payloads are exposed through
/// [`Record::text`](crate::Record::text) and the raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    /// Build from an explicit field list.
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// Build from a packed layout string such as `<BHI` and matching names.
    ///
    /// A leading `<` or `=` is accepted; other byte orders are not.
    pub fn from_layout(layout: &str, names: &[&str]) -> std::result::Result<Self, String> {
        let body = layout
            .strip_prefix('<')
            .or_else(|| layout.strip_prefix('='))
            .unwrap_or(layout);
        let kinds = body
            .chars()
            .map(|c| FieldKind::from_layout_char(c).ok_or_else(|| format!("unsupported layout character `{c}`")))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if kinds.len() != names.len() {
            return Err(format!(
                "layout declares {} fields but {} names were given",
                kinds.len(),
                names.len()
            ));
        }
        Ok(Self::new(
            names
                .iter()
                .zip(kinds)
                .map(|(name, kind)| FieldDef::new(*name, kind))
                .collect(),
        ))
    }

    /// Fields in wire order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Look a field up by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Total bytes a complete payload occupies.
    pub fn wire_len(&self) -> usize {
        self.fields.iter().map(|field| field.kind.width()).sum()
    }

    /// Whether the payload is opaque.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Override the scale of a named field.
    pub fn with_scale(mut self, name: &str, scale: f64) -> Self {
        if let Some(field) = self.fields.iter_mut().find(|field| field.name == name) {
            field.scale = scale;
        }
        self
    }
}
