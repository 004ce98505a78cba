//! MessagePack value envelope wrapping every TLV body.
//!
//! The body of a TLV is a MessagePack map with the encoded primary record
//! under key `e`. When a record carries bulk payload (a block's data) the
//! payload travels as a raw secondary part appended after the envelope map,
//! described by the `s` array. Key `c` marks zstd compression and `z`
//! encryption; neither is produced here and both are rejected on read.

use crate::error::{RestoreError, Result};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Cursor;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "e", with = "serde_bytes")]
    encoded: Vec<u8>,

    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    compression: Option<i64>,

    #[serde(rename = "s", default, skip_serializing_if = "Vec::is_empty")]
    secondary: Vec<SecondaryPart>,

    #[serde(rename = "z", default, skip_serializing_if = "Option::is_none")]
    crypt: Option<OpaqueMarker>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SecondaryPart {
    #[serde(rename = "l")]
    len: u64,

    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    compression: Option<i64>,
}

/// Placeholder for envelope keys whose content we never interpret.
#[derive(Debug)]
struct OpaqueMarker;

impl Serialize for OpaqueMarker {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

impl<'de> Deserialize<'de> for OpaqueMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        IgnoredAny::deserialize(deserializer)?;
        Ok(OpaqueMarker)
    }
}

fn to_msgpack<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = rmp_serde::Serializer::new(&mut buf).with_struct_map();
    value
        .serialize(&mut ser)
        .map_err(|e| RestoreError::codec(format!("msgpack encode: {}", e)))?;
    Ok(buf)
}

/// Encode a primary record (already MessagePack bytes) and an optional
/// secondary payload into one TLV body.
pub fn encode_value(primary: Vec<u8>, secondary: Option<&[u8]>) -> Result<Vec<u8>> {
    let envelope = Envelope {
        encoded: primary,
        compression: None,
        secondary: secondary
            .map(|data| {
                vec![SecondaryPart {
                    len: data.len() as u64,
                    compression: None,
                }]
            })
            .unwrap_or_default(),
        crypt: None,
    };
    let mut body = to_msgpack(&envelope)?;
    if let Some(data) = secondary {
        body.extend_from_slice(data);
    }
    Ok(body)
}

/// Encode a serializable record as the primary part of a value envelope.
pub fn encode_record<T: Serialize>(record: &T, secondary: Option<&[u8]>) -> Result<Vec<u8>> {
    encode_value(to_msgpack(record)?, secondary)
}

pub struct DecodedValue {
    pub primary: Vec<u8>,
    pub secondary: Vec<u8>,
}

/// Split a TLV body into primary record bytes and secondary payload.
pub fn decode_value(body: &[u8]) -> Result<DecodedValue> {
    let mut de = rmp_serde::Deserializer::new(Cursor::new(body));
    let envelope = Envelope::deserialize(&mut de)
        .map_err(|e| RestoreError::codec(format!("value envelope decode: {}", e)))?;

    if envelope.crypt.is_some() {
        return Err(RestoreError::codec("encrypted values are not supported"));
    }
    if envelope.compression == Some(1) {
        return Err(RestoreError::codec("compressed values are not supported"));
    }

    let secondary = match envelope.secondary.first() {
        Some(part) => {
            if part.compression.or(envelope.compression) == Some(1) {
                return Err(RestoreError::codec(
                    "compressed secondary parts are not supported",
                ));
            }
            let len = part.len as usize;
            if len > body.len() {
                return Err(RestoreError::codec(format!(
                    "secondary part of {} bytes exceeds {}-byte body",
                    len,
                    body.len()
                )));
            }
            body[body.len() - len..].to_vec()
        }
        None => Vec::new(),
    };

    Ok(DecodedValue {
        primary: envelope.encoded,
        secondary,
    })
}

/// Decode the primary record of a value envelope into a concrete type.
pub fn decode_record<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<(T, Vec<u8>)> {
    let value = decode_value(body)?;
    let record = rmp_serde::from_slice(&value.primary)
        .map_err(|e| RestoreError::codec(format!("record decode: {}", e)))?;
    Ok((record, value.secondary))
}
