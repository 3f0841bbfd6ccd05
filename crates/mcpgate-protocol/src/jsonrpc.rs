//! JSON-RPC 2.0 message types with strict shape validation.
//!
//! Decoding classifies every payload as a request, notification, or
//! response and rejects anything that violates the envelope rules:
//! a message with a method must not carry `result` or `error`, and a
//! message without a method must carry an `id` and exactly one of
//! `result`/`error`. Nothing is coerced into a best-guess shape.
//!
//! Numeric identifiers are normalized to a single canonical 64-bit
//! signed representation at decode time, so correlation is a plain
//! equality check no matter how a permissive peer or decoder widened
//! the number on the way through.

use std::fmt;

use mcpgate_core::{McpError, McpErrorCode};
use serde::de::{self, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// The only protocol version tag this crate speaks.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Request ID
// ============================================================================

/// JSON-RPC request ID.
///
/// Wire integers always land in [`RequestId::Number`] as `i64`, whether
/// the peer sent `1`, `1.0`, or an unsigned value that fits. Fractional
/// numbers and integers outside the signed 64-bit range are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    /// Integer ID in canonical 64-bit signed form.
    Number(i64),
    /// String ID, compared verbatim.
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_owned())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RequestId::Number(n) => serializer.serialize_i64(*n),
            RequestId::String(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = RequestId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer request id")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<RequestId, E> {
                Ok(RequestId::Number(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<RequestId, E> {
                i64::try_from(v)
                    .map(RequestId::Number)
                    .map_err(|_| E::custom("integer id out of 64-bit signed range"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<RequestId, E> {
                // 2^63 exactly; f64 cannot represent i64::MAX itself.
                const RANGE_END: f64 = 9_223_372_036_854_775_808.0;
                if v.is_finite() && v.fract() == 0.0 && v >= -RANGE_END && v < RANGE_END {
                    Ok(RequestId::Number(v as i64))
                } else {
                    Err(E::custom("numeric id must be a whole number in 64-bit range"))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<RequestId, E> {
                Ok(RequestId::String(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<RequestId, E> {
                Ok(RequestId::String(v))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

// ============================================================================
// Decode Errors
// ============================================================================

/// Failure to turn bytes into a valid message.
///
/// The two variants map onto distinct wire codes: [`DecodeError::Json`]
/// is a parse error (`-32700`), [`DecodeError::InvalidMessage`] is an
/// invalid request (`-32600`).
#[derive(Debug)]
pub enum DecodeError {
    /// The payload is not valid JSON at all.
    Json(serde_json::Error),
    /// The payload is valid JSON but violates the envelope rules.
    InvalidMessage(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Json(err) => write!(f, "malformed JSON: {err}"),
            DecodeError::InvalidMessage(msg) => write!(f, "invalid message: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Json(err) => Some(err),
            DecodeError::InvalidMessage(_) => None,
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err)
    }
}

impl From<DecodeError> for McpError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Json(e) => {
                McpError::parse_error("Parse error").with_data(serde_json::json!({
                    "detail": e.to_string(),
                }))
            }
            DecodeError::InvalidMessage(msg) => {
                McpError::invalid_request("Invalid request").with_data(serde_json::json!({
                    "detail": msg,
                }))
            }
        }
    }
}

// ============================================================================
// Requests and Responses
// ============================================================================

/// JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version (always "2.0").
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Request parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request ID (absent for notifications).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    /// Creates a new request with the given method and parameters.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }

    /// Creates a notification (request without ID).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Returns true if this is a notification (no ID).
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<McpError> for JsonRpcError {
    fn from(err: McpError) -> Self {
        Self {
            code: err.code.into(),
            message: err.message,
            data: err.data,
        }
    }
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        let code = McpErrorCode::from_code(err.code).unwrap_or(McpErrorCode::InternalError);
        let mut mapped = McpError::new(code, err.message);
        if let Some(data) = err.data {
            mapped = mapped.with_data(data);
        }
        mapped
    }
}

/// JSON-RPC 2.0 response.
///
/// Exactly one of `result`/`error` is set; [`JsonRpcMessage::from_value`]
/// enforces this on the way in and the constructors preserve it on the
/// way out. A `result` of JSON `null` is a valid success payload and is
/// kept distinct from "no result".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version (always "2.0").
    pub jsonrpc: String,
    /// Result (present on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (present on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Request ID this is responding to. `None` serializes as `null`,
    /// used when the failing request's id could not be read.
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Returns true if this is an error response.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ============================================================================
// Message Envelope
// ============================================================================

/// A JSON-RPC message: request, notification, or response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request or notification.
    Request(JsonRpcRequest),
    /// A response.
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Decodes one message from raw bytes, enforcing the envelope rules.
    ///
    /// # Errors
    ///
    /// [`DecodeError::Json`] if the bytes are not JSON;
    /// [`DecodeError::InvalidMessage`] if the JSON violates the shape
    /// rules (wrong version tag, batch array, both or neither of
    /// `result`/`error`, non-string method, bad id type).
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Classifies a parsed JSON value as a request, notification, or
    /// response, enforcing the envelope rules.
    ///
    /// # Errors
    ///
    /// [`DecodeError::InvalidMessage`] on any shape violation. Batch
    /// arrays are rejected here rather than split up.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(obj) = value else {
            let what = match value {
                Value::Array(_) => "batch requests are not supported",
                _ => "message must be a JSON object",
            };
            return Err(DecodeError::InvalidMessage(what.to_owned()));
        };

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            _ => {
                return Err(DecodeError::InvalidMessage(
                    "missing or unsupported jsonrpc version".to_owned(),
                ));
            }
        }

        if obj.contains_key("method") {
            Self::request_from_object(&obj)
        } else {
            Self::response_from_object(&obj)
        }
    }

    fn request_from_object(obj: &Map<String, Value>) -> Result<Self, DecodeError> {
        if obj.contains_key("result") || obj.contains_key("error") {
            return Err(DecodeError::InvalidMessage(
                "request must not carry result or error".to_owned(),
            ));
        }
        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::InvalidMessage("method must be a string".to_owned()))?
            .to_owned();
        let id = match obj.get("id") {
            None => None,
            Some(value) => Some(decode_id(value)?),
        };
        let params = obj.get("params").filter(|v| !v.is_null()).cloned();
        Ok(JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method,
            params,
            id,
        }))
    }

    fn response_from_object(obj: &Map<String, Value>) -> Result<Self, DecodeError> {
        let id = match obj.get("id") {
            None => {
                return Err(DecodeError::InvalidMessage(
                    "response requires an id".to_owned(),
                ));
            }
            Some(Value::Null) => None,
            Some(value) => Some(decode_id(value)?),
        };
        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");
        let (result, error) = match (has_result, has_error) {
            (true, true) => {
                return Err(DecodeError::InvalidMessage(
                    "response must not carry both result and error".to_owned(),
                ));
            }
            (false, false) => {
                return Err(DecodeError::InvalidMessage(
                    "message must carry a method, result, or error".to_owned(),
                ));
            }
            (true, false) => {
                // `result: null` is a valid success payload.
                (obj.get("result").cloned(), None)
            }
            (false, true) => {
                let error = serde_json::from_value(
                    obj.get("error").cloned().unwrap_or(Value::Null),
                )
                .map_err(|e| {
                    DecodeError::InvalidMessage(format!("malformed error object: {e}"))
                })?;
                (None, Some(error))
            }
        };
        Ok(JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result,
            error,
            id,
        }))
    }

    /// Serializes the message to its wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails, which only happens if a
    /// params/result value contains a non-string map key.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Returns the message's identifier, if it carries one.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(req) => req.id.as_ref(),
            JsonRpcMessage::Response(resp) => resp.id.as_ref(),
        }
    }

    /// Returns true for an id-less request.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(req) if req.is_notification())
    }

    /// Returns true for a request carrying an id.
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, JsonRpcMessage::Request(req) if !req.is_notification())
    }

    /// Returns true for a response (success or error).
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, JsonRpcMessage::Response(_))
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(req: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(req)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(resp: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(resp)
    }
}

fn decode_id(value: &Value) -> Result<RequestId, DecodeError> {
    RequestId::deserialize(value)
        .map_err(|e| DecodeError::InvalidMessage(format!("bad id: {e}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn decode(value: Value) -> Result<JsonRpcMessage, DecodeError> {
        JsonRpcMessage::from_value(value)
    }

    #[test]
    fn request_round_trips_through_the_wire() {
        let msg = JsonRpcMessage::Request(JsonRpcRequest::new(
            "tools/call",
            Some(json!({"name": "add_numbers", "arguments": {"number1": 5, "number2": 3}})),
            1i64,
        ));
        let bytes = msg.encode().unwrap();
        assert_eq!(JsonRpcMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn response_round_trips_through_the_wire() {
        let msg = JsonRpcMessage::Response(JsonRpcResponse::success(
            RequestId::Number(1),
            json!({"content": [{"type": "text", "text": "{\"result\":8}"}]}),
        ));
        let bytes = msg.encode().unwrap();
        assert_eq!(JsonRpcMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn notification_round_trips_without_an_id() {
        let msg = JsonRpcMessage::Request(JsonRpcRequest::notification(
            "notifications/initialized",
            None,
        ));
        let bytes = msg.encode().unwrap();
        let decoded = JsonRpcMessage::decode(&bytes).unwrap();
        assert!(decoded.is_notification());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn numeric_ids_normalize_to_i64() {
        for raw in [json!(1), json!(1.0), json!(1u64)] {
            let msg = decode(json!({"jsonrpc": "2.0", "method": "ping", "id": raw})).unwrap();
            assert_eq!(msg.id(), Some(&RequestId::Number(1)));
        }
    }

    #[test]
    fn widened_response_id_still_matches_request_id() {
        let request_id = RequestId::Number(7);
        let msg = decode(json!({"jsonrpc": "2.0", "id": 7.0, "result": {}})).unwrap();
        assert_eq!(msg.id(), Some(&request_id));
    }

    #[test]
    fn fractional_id_is_rejected() {
        let err = decode(json!({"jsonrpc": "2.0", "method": "ping", "id": 1.5})).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidMessage(_)));
    }

    #[test]
    fn oversized_unsigned_id_is_rejected() {
        let err = decode(json!({"jsonrpc": "2.0", "method": "ping", "id": u64::MAX})).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidMessage(_)));
    }

    #[test]
    fn string_ids_pass_through() {
        let msg = decode(json!({"jsonrpc": "2.0", "method": "ping", "id": "abc"})).unwrap();
        assert_eq!(msg.id(), Some(&RequestId::String("abc".to_owned())));
    }

    #[test]
    fn boolean_id_is_rejected() {
        let err = decode(json!({"jsonrpc": "2.0", "method": "ping", "id": true})).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidMessage(_)));
    }

    #[test]
    fn response_with_both_result_and_error_is_rejected() {
        let err = decode(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {},
            "error": {"code": -32603, "message": "boom"},
        }))
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidMessage(_)));
    }

    #[test]
    fn response_with_neither_result_nor_error_is_rejected() {
        let err = decode(json!({"jsonrpc": "2.0", "id": 1})).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidMessage(_)));
    }

    #[test]
    fn request_carrying_result_is_rejected() {
        let err = decode(json!({
            "jsonrpc": "2.0",
            "method": "ping",
            "id": 1,
            "result": {},
        }))
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidMessage(_)));
    }

    #[test]
    fn null_result_is_a_valid_success() {
        let msg = decode(json!({"jsonrpc": "2.0", "id": 3, "result": null})).unwrap();
        let JsonRpcMessage::Response(resp) = msg else {
            panic!("expected a response");
        };
        assert_eq!(resp.result, Some(Value::Null));
        assert!(!resp.is_error());
    }

    #[test]
    fn error_response_with_null_id_is_valid() {
        let msg = decode(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32700, "message": "Parse error"},
        }))
        .unwrap();
        let JsonRpcMessage::Response(resp) = msg else {
            panic!("expected a response");
        };
        assert!(resp.id.is_none());
        assert_eq!(resp.error.unwrap().code, -32700);
    }

    #[test]
    fn missing_version_tag_is_rejected() {
        let err = decode(json!({"method": "ping", "id": 1})).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidMessage(_)));
        let err = decode(json!({"jsonrpc": "1.0", "method": "ping", "id": 1})).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidMessage(_)));
    }

    #[test]
    fn batch_arrays_are_rejected() {
        let err = decode(json!([{"jsonrpc": "2.0", "method": "ping", "id": 1}])).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidMessage(_)));
    }

    #[test]
    fn malformed_bytes_are_a_parse_error() {
        let err = JsonRpcMessage::decode(b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
        let mapped = McpError::from(err);
        assert_eq!(mapped.code, McpErrorCode::ParseError);
    }

    #[test]
    fn shape_violations_map_to_invalid_request() {
        let err = decode(json!({"jsonrpc": "2.0", "id": 1})).unwrap_err();
        let mapped = McpError::from(err);
        assert_eq!(mapped.code, McpErrorCode::InvalidRequest);
    }

    #[test]
    fn wire_error_converts_to_typed_failure() {
        let wire = JsonRpcError {
            code: -32601,
            message: "Method not found: nope".to_owned(),
            data: Some(json!({"method": "nope"})),
        };
        let err = McpError::from(wire);
        assert_eq!(err.code, McpErrorCode::MethodNotFound);
        assert_eq!(err.data, Some(json!({"method": "nope"})));
    }

    #[test]
    fn unknown_wire_code_falls_back_to_internal_error() {
        let wire = JsonRpcError {
            code: -31999,
            message: "vendor-specific".to_owned(),
            data: None,
        };
        assert_eq!(McpError::from(wire).code, McpErrorCode::InternalError);
    }

    #[test]
    fn null_params_decode_as_absent() {
        let msg = decode(json!({"jsonrpc": "2.0", "method": "ping", "id": 1, "params": null}))
            .unwrap();
        let JsonRpcMessage::Request(req) = msg else {
            panic!("expected a request");
        };
        assert!(req.params.is_none());
    }
}
