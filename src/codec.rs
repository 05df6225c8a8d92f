#![forbid(unsafe_code)]

use crate::config::SerializerKind;
use crate::error::{Error, Result};
use crate::schema::ResolvedSchema;
use apache_avro::{from_avro_datum, from_value, to_avro_datum, to_value, Schema};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Built-in schema used when a route declares no subject. The JSON-by-schema
/// round trip still runs, so only `{}`-shaped bodies pass.
pub const EMPTY_RECORD_SCHEMA: &str =
    r#"{"type": "record", "name": "CausewayEmptyRecord", "fields": []}"#;

const CONFLUENT_MAGIC: u8 = 0;
const CONFLUENT_HEADER_LEN: usize = 5;

/// Per-channel payload codec. Encoding decodes the raw HTTP body as JSON
/// against the schema and re-encodes the canonical binary form, which is both
/// the validation step and the wire encoding.
#[derive(Clone)]
pub enum PayloadCodec {
    Avro(AvroCodec),
    /// `json` serializer: payloads are validated as JSON and carried verbatim.
    Json,
}

impl PayloadCodec {
    pub fn for_channel(
        serializer: SerializerKind,
        resolved: Option<&Arc<ResolvedSchema>>,
    ) -> Result<Self> {
        match serializer {
            SerializerKind::Json => Ok(PayloadCodec::Json),
            SerializerKind::Avro => match resolved {
                Some(resolved) => Ok(PayloadCodec::Avro(AvroCodec::new(
                    resolved.schema.clone(),
                    Some(resolved.id),
                ))),
                None => Ok(PayloadCodec::Avro(AvroCodec::empty_record()?)),
            },
        }
    }

    pub fn encode(&self, path: &str, raw: &[u8]) -> Result<Vec<u8>> {
        match self {
            PayloadCodec::Avro(codec) => codec.encode(path, raw),
            PayloadCodec::Json => {
                serde_json::from_slice::<JsonValue>(raw).map_err(|err| Error::InvalidPayload {
                    path: path.to_string(),
                    reason: format!("body is not valid JSON: {err}"),
                })?;
                Ok(raw.to_vec())
            }
        }
    }

    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<JsonValue> {
        match self {
            PayloadCodec::Avro(codec) => codec.decode(topic, payload),
            PayloadCodec::Json => {
                serde_json::from_slice(payload).map_err(|err| Error::InvalidPayload {
                    path: topic.to_string(),
                    reason: format!("reply is not valid JSON: {err}"),
                })
            }
        }
    }
}

#[derive(Clone)]
pub struct AvroCodec {
    schema: Schema,
    schema_id: Option<i32>,
}

impl AvroCodec {
    pub fn new(schema: Schema, schema_id: Option<i32>) -> Self {
        Self { schema, schema_id }
    }

    pub fn empty_record() -> Result<Self> {
        let schema = Schema::parse_str(EMPTY_RECORD_SCHEMA)
            .map_err(|err| Error::Config(format!("built-in empty-record schema: {err}")))?;
        Ok(Self {
            schema,
            schema_id: None,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// JSON-by-schema decode followed by canonical binary encode. Framed in
    /// the Confluent wire format (magic byte plus big-endian schema id) when
    /// the schema came from a registry.
    pub fn encode(&self, path: &str, raw: &[u8]) -> Result<Vec<u8>> {
        let json: JsonValue =
            serde_json::from_slice(raw).map_err(|err| Error::InvalidPayload {
                path: path.to_string(),
                reason: format!("body is not valid JSON: {err}"),
            })?;

        let avro_value = to_value(&json).map_err(|err| Error::InvalidPayload {
            path: path.to_string(),
            reason: format!("failed to convert body to an Avro value: {err}"),
        })?;

        let resolved = avro_value
            .resolve(&self.schema)
            .map_err(|err| Error::InvalidPayload {
                path: path.to_string(),
                reason: format!("body does not match schema: {err}"),
            })?;

        let bytes = to_avro_datum(&self.schema, resolved).map_err(|err| Error::InvalidPayload {
            path: path.to_string(),
            reason: format!("failed to encode Avro datum: {err}"),
        })?;

        match self.schema_id {
            Some(id) => {
                let mut framed = Vec::with_capacity(bytes.len() + CONFLUENT_HEADER_LEN);
                framed.push(CONFLUENT_MAGIC);
                framed.extend_from_slice(&(id as u32).to_be_bytes());
                framed.extend_from_slice(&bytes);
                Ok(framed)
            }
            None => Ok(bytes),
        }
    }

    /// Decode a binary datum back to JSON, tolerating an optional Confluent
    /// wire header.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<JsonValue> {
        let datum = strip_confluent_header(payload);

        let mut reader = datum;
        let value =
            from_avro_datum(&self.schema, &mut reader, None).map_err(|err| {
                Error::InvalidPayload {
                    path: topic.to_string(),
                    reason: format!("failed to decode Avro datum: {err}"),
                }
            })?;

        from_value::<JsonValue>(&value).map_err(|err| Error::InvalidPayload {
            path: topic.to_string(),
            reason: format!("failed to render decoded record as JSON: {err}"),
        })
    }
}

/// Text rendering of a decoded reply, used as the HTTP response body.
pub fn to_text_form(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn strip_confluent_header(payload: &[u8]) -> &[u8] {
    if payload.len() >= CONFLUENT_HEADER_LEN && payload[0] == CONFLUENT_MAGIC {
        &payload[CONFLUENT_HEADER_LEN..]
    } else {
        payload
    }
}
