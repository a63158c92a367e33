//! ---
//! msp_section: "02-message-registry"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Positional little-endian payload encoding and decoding."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use bytes::{BufMut, Bytes, BytesMut};
use indexmap::IndexMap;

use crate::field::{FieldKind, Schema};
use crate::{Result, SchemaError};

/// Field name to raw integer value, in schema order once decoded.
pub type FieldValues = IndexMap<String, i64>;

/// Outcome of lenient decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    /// One entry per schema field.
    pub values: FieldValues,
    /// Set when the payload was shorter than the schema; missing fields are zero.
    pub partial: bool,
}

/// Pack `values` in schema order. Absent fields encode as zero.
pub fn encode_payload(schema: &Schema, values: &FieldValues) -> Result<Bytes> {
    if let Some(unknown) = values.keys().find(|name| schema.field(name).is_none()) {
        return Err(SchemaError::UnknownField(unknown.clone()));
    }
    let mut buf = BytesMut::with_capacity(schema.wire_len());
    for field in schema.fields() {
        let value = values.get(&field.name).copied().unwrap_or(0);
        field.check(value)?;
        // Range was checked above, the narrowing casts are lossless.
        match field.kind {
            FieldKind::U8 => buf.put_u8(value as u8),
            FieldKind::I8 => buf.put_i8(value as i8),
            FieldKind::U16 => buf.put_u16_le(value as u16),
            FieldKind::I16 => buf.put_i16_le(value as i16),
            FieldKind::U32 => buf.put_u32_le(value as u32),
            FieldKind::I32 => buf.put_i32_le(value as i32),
        }
    }
    Ok(buf.freeze())
}

/// Unpack `bytes` against `schema`, zero-filling fields past the end of a
/// short payload. Extra trailing bytes are ignored.
pub fn decode_payload(schema: &Schema, bytes: &[u8]) -> DecodedPayload {
    let mut values = FieldValues::with_capacity(schema.fields().len());
    let mut offset = 0;
    let mut partial = false;
    for field in schema.fields() {
        let width = field.kind.width();
        let value = match bytes.get(offset..offset + width) {
            Some(slice) => field.kind.read(slice),
            None => {
                partial = true;
                0
            }
        };
        values.insert(field.name.clone(), value);
        offset += width;
    }
    DecodedPayload { values, partial }
}

/// Like [`decode_payload`] but rejects short payloads.
pub fn decode_payload_strict(schema: &Schema, bytes: &[u8]) -> Result<FieldValues> {
    let expected = schema.wire_len();
    if bytes.len() < expected {
        return Err(SchemaError::TruncatedPayload {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(decode_payload(schema, bytes).values)
}
