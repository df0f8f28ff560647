//! Wire codec for task and result messages.
//!
//! The task schema evolved from a loosely-typed map to the strict shape
//! below, and publisher versions still skew. Decoding therefore tries the
//! strict schema first and falls back to a permissive field-by-field
//! extraction; that evolution logic lives here and nowhere else.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// Inbound task descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Identifier of the intended worker; doubles as the routing filter.
    pub region: String,
    /// Hostname or address to trace.
    pub target: String,
    /// Command-line arguments forwarded to the trace executable.
    pub params: Vec<String>,
    pub source_name: String,
    pub source_id: String,
}

/// Outbound result envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Trace output, or a JSON `{"error": ...}` blob when the run produced
    /// nothing.
    pub result: String,
    pub callback: Callback,
}

/// Requester identity echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callback {
    pub region: String,
    pub target: String,
    /// Resolved address, or the original target when resolution failed.
    pub source_ip: String,
    pub source_id: String,
    pub source_name: String,
}

/// Serialize a result envelope for publication.
pub fn encode_envelope(envelope: &ResultEnvelope) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(CodecError::Encode)
}

/// Serialize an `{"error": ...}` fallback body.
pub fn encode_error(message: &str) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&serde_json::json!({ "error": message })).map_err(CodecError::Encode)
}

/// Decode an inbound task, accepting both historical wire shapes.
pub fn decode_task(payload: &[u8]) -> Result<TaskMessage, CodecError> {
    match serde_json::from_slice::<TaskMessage>(payload) {
        Ok(task) => Ok(task),
        Err(strict_err) => decode_task_loose(payload).map_err(|_| CodecError::Decode(strict_err)),
    }
}

/// Permissive decode of the legacy map shape. Missing or wrong-typed
/// fields default to empty; non-string `params` entries are discarded.
fn decode_task_loose(payload: &[u8]) -> Result<TaskMessage, serde_json::Error> {
    let value: Value = serde_json::from_slice(payload)?;
    let map = value
        .as_object()
        .ok_or_else(|| serde::de::Error::custom("task payload is not an object"))?;

    let params = map
        .get("params")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Ok(TaskMessage {
        region: string_field(map, "region"),
        target: string_field(map, "target"),
        params,
        source_name: string_field(map, "source_name"),
        source_id: string_field(map, "source_id"),
    })
}

fn string_field(map: &serde_json::Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_payload_decodes() {
        let payload = br#"{"region":"eu1","target":"h","params":["--tcp"],"source_name":"x","source_id":"1"}"#;
        let task = decode_task(payload).unwrap();
        assert_eq!(task.region, "eu1");
        assert_eq!(task.target, "h");
        assert_eq!(task.params, vec!["--tcp"]);
        assert_eq!(task.source_name, "x");
        assert_eq!(task.source_id, "1");
    }

    #[test]
    fn legacy_payload_matches_strict_decode() {
        // Heterogeneous params force the permissive path; the string
        // fields must come out as if the strict decode had succeeded.
        let legacy =
            br#"{"region":"eu1","target":"h","params":["--tcp",42],"source_name":"x","source_id":"1"}"#;
        let task = decode_task(legacy).unwrap();
        assert_eq!(task.region, "eu1");
        assert_eq!(task.target, "h");
        assert_eq!(task.params, vec!["--tcp"]);
        assert_eq!(task.source_name, "x");
        assert_eq!(task.source_id, "1");
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let task = decode_task(br#"{"target":"h","params":[]}"#).unwrap();
        assert_eq!(task.region, "");
        assert_eq!(task.target, "h");
        assert_eq!(task.source_name, "");
        assert_eq!(task.source_id, "");
    }

    #[test]
    fn wrong_typed_fields_default_to_empty() {
        let task = decode_task(br#"{"region":7,"target":"h","params":"nope"}"#).unwrap();
        assert_eq!(task.region, "");
        assert_eq!(task.target, "h");
        assert!(task.params.is_empty());
    }

    #[test]
    fn malformed_json_fails_both_paths() {
        assert!(decode_task(b"{not json").is_err());
        assert!(decode_task(b"").is_err());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(decode_task(b"[1,2,3]").is_err());
        assert!(decode_task(br#""just a string""#).is_err());
    }

    #[test]
    fn envelope_round_trips_through_generic_json() {
        let envelope = ResultEnvelope {
            result: "hop 1 hop 2".to_string(),
            callback: Callback {
                region: "eu1".to_string(),
                target: "198.18.0.5".to_string(),
                source_ip: "198.18.0.5".to_string(),
                source_id: "1".to_string(),
                source_name: "x".to_string(),
            },
        };

        let bytes = encode_envelope(&envelope).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["result"], "hop 1 hop 2");
        assert_eq!(value["callback"]["region"], "eu1");
        assert_eq!(value["callback"]["target"], "198.18.0.5");
        assert_eq!(value["callback"]["source_ip"], "198.18.0.5");
        assert_eq!(value["callback"]["source_id"], "1");
        assert_eq!(value["callback"]["source_name"], "x");
    }

    #[test]
    fn error_body_is_a_json_object() {
        let bytes = encode_error("timeout=120s").unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"], "timeout=120s");
    }
}
