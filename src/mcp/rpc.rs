//! JSON-RPC envelope model and formatting utilities
//!
//! Classifies inbound frames into requests, notifications and responses in a
//! single validating step, renders outbound envelopes without `null`
//! placeholders, and maps internal `AppError`s onto JSON-RPC error objects.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::errors::AppError;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Correlation identifier. Only equality is meaningful.
///
/// Numbers outside `i64` (large unsigned values, fractions) are kept as they
/// arrived so the reply can echo them back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    Number(serde_json::Number),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params() -> Self {
        Self::new(INVALID_PARAMS, "invalid params")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// A reply envelope. Outbound responses are only built through
/// [`Response::success`] and [`Response::failure`]; inbound ones keep whatever
/// the peer sent and are checked with [`Response::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    id: Option<RequestId>,
    result: Option<Value>,
    error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: ErrorObject) -> Self {
        Self {
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorObject> {
        self.error.as_ref()
    }

    /// Checks that exactly one of `result` / `error` is set.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        match (&self.result, &self.error) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(EnvelopeError::InvalidResponse),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid envelope: {reason}")]
    InvalidShape {
        id: Option<RequestId>,
        reason: String,
    },
    #[error("unsupported jsonrpc version")]
    UnsupportedVersion { id: Option<RequestId> },
    #[error("response must carry exactly one of result or error")]
    InvalidResponse,
}

impl EnvelopeError {
    /// The request id, when the frame was well-formed enough to carry one.
    pub fn recovered_id(&self) -> Option<&RequestId> {
        match self {
            Self::InvalidShape { id, .. } | Self::UnsupportedVersion { id } => id.as_ref(),
            Self::Json(_) | Self::InvalidResponse => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

// Keeps `"result": null` distinguishable from an absent `result`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorObject>,
}

impl Envelope {
    pub fn parse(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Some(object) = value.as_object() else {
            return Err(EnvelopeError::InvalidShape {
                id: None,
                reason: "envelope must be a json object".to_string(),
            });
        };

        let recovered_id = object
            .get("id")
            .and_then(|id| RequestId::deserialize(id).ok());

        let raw: RawEnvelope =
            serde_json::from_value(value).map_err(|err| EnvelopeError::InvalidShape {
                id: recovered_id.clone(),
                reason: err.to_string(),
            })?;

        if raw.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return Err(EnvelopeError::UnsupportedVersion { id: recovered_id });
        }

        Ok(match (raw.id, raw.method) {
            (Some(id), Some(method)) => Self::Request(Request {
                id,
                method,
                params: raw.params,
            }),
            (None, Some(method)) => Self::Notification(Notification {
                method,
                params: raw.params,
            }),
            (id, None) => Self::Response(Response {
                id,
                result: raw.result,
                error: raw.error,
            }),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(request) => Some(&request.id),
            Self::Notification(_) => None,
            Self::Response(response) => response.id(),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(request.method.as_str()),
            Self::Notification(notification) => Some(notification.method.as_str()),
            Self::Response(_) => None,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    fn wire(&self) -> WireEnvelope<'_> {
        let mut wire = WireEnvelope {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };

        match self {
            Self::Request(request) => {
                wire.id = Some(&request.id);
                wire.method = Some(request.method.as_str());
                wire.params = request.params.as_ref();
            }
            Self::Notification(notification) => {
                wire.method = Some(notification.method.as_str());
                wire.params = notification.params.as_ref();
            }
            Self::Response(response) => {
                wire.id = response.id.as_ref();
                wire.result = response.result.as_ref();
                wire.error = response.error.as_ref();
            }
        }

        wire
    }
}

impl Serialize for Envelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(de::Error::custom)
    }
}

pub fn is_json_rpc_error(envelope: &Envelope) -> bool {
    matches!(envelope, Envelope::Response(response) if response.error().is_some())
}

/// Maps a collaborator failure onto the error object the peer sees. Only the
/// human-readable message crosses the wire.
pub fn app_error_to_error_object(err: &AppError) -> ErrorObject {
    match err {
        AppError::BadRequest { message, .. } => ErrorObject::new(INVALID_PARAMS, message.clone()),
        AppError::NotFound { message, .. } | AppError::Internal { message, .. } => {
            ErrorObject::internal(message.clone())
        }
    }
}

pub fn json_rpc_error(id: RequestId, code: i64, message: impl Into<String>) -> Envelope {
    Envelope::Response(Response::failure(id, ErrorObject::new(code, message)))
}

pub fn json_rpc_result(id: RequestId, result: Value) -> Envelope {
    Envelope::Response(Response::success(id, result))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_request_notification_and_response() {
        let request = Envelope::parse(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#)
            .expect("request parses");
        assert!(matches!(request, Envelope::Request(ref r) if r.method == "ping"));
        assert_eq!(request.id(), Some(&RequestId::Integer(1)));

        let notification =
            Envelope::parse(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .expect("notification parses");
        assert!(matches!(notification, Envelope::Notification(_)));
        assert_eq!(notification.id(), None);

        let response = Envelope::parse(br#"{"jsonrpc":"2.0","id":"a","result":{}}"#)
            .expect("response parses");
        assert!(matches!(response, Envelope::Response(_)));
        assert_eq!(response.id(), Some(&RequestId::String("a".to_string())));
        assert_eq!(response.method(), None);
    }

    #[test]
    fn malformed_response_parses_but_fails_validation() {
        let both = Envelope::parse(
            br#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":-32603,"message":"x"}}"#,
        )
        .expect("wire format does not forbid both fields");
        let Envelope::Response(response) = both else {
            panic!("expected response");
        };
        assert!(matches!(
            response.validate(),
            Err(EnvelopeError::InvalidResponse)
        ));

        let neither = Envelope::parse(br#"{"jsonrpc":"2.0","id":1}"#).expect("parses");
        let Envelope::Response(response) = neither else {
            panic!("expected response");
        };
        assert!(response.validate().is_err());
    }

    #[test]
    fn null_result_counts_as_present() {
        let envelope =
            Envelope::parse(br#"{"jsonrpc":"2.0","id":1,"result":null}"#).expect("parses");
        let Envelope::Response(response) = envelope else {
            panic!("expected response");
        };
        assert_eq!(response.result(), Some(&Value::Null));
        assert!(response.validate().is_ok());
    }

    #[test]
    fn serialization_omits_absent_fields() {
        let envelope = json_rpc_result(RequestId::Integer(1), json!({}));
        let text = String::from_utf8(envelope.to_bytes().expect("serialize")).expect("utf8");
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);

        let error =
            json_rpc_error(RequestId::Integer(3), INTERNAL_ERROR, "resources not supported");
        let text = String::from_utf8(error.to_bytes().expect("serialize")).expect("utf8");
        assert_eq!(
            text,
            concat!(
                r#"{"jsonrpc":"2.0","id":3,"#,
                r#""error":{"code":-32603,"message":"resources not supported"}}"#
            )
        );

        let notification = Envelope::Notification(Notification {
            method: "notifications/initialized".to_string(),
            params: None,
        });
        let text = String::from_utf8(notification.to_bytes().expect("serialize")).expect("utf8");
        assert_eq!(text, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
    }

    #[test]
    fn numeric_ids_beyond_i64_are_echoed_unchanged() {
        for raw in ["9223372036854775808", "1.5", "1.0"] {
            let frame = format!(r#"{{"jsonrpc":"2.0","id":{raw},"method":"ping"}}"#);
            let Envelope::Request(request) = Envelope::parse(frame.as_bytes()).expect("parses")
            else {
                panic!("expected request for id {raw}");
            };
            assert!(matches!(request.id, RequestId::Number(_)));
            assert_eq!(request.id.to_string(), raw);

            let reply = json_rpc_result(request.id, json!({}));
            let text = String::from_utf8(reply.to_bytes().expect("serialize")).expect("utf8");
            assert_eq!(text, format!(r#"{{"jsonrpc":"2.0","id":{raw},"result":{{}}}}"#));
        }
    }

    #[test]
    fn numeric_id_beyond_i64_is_recovered_from_bad_envelope() {
        let err = Envelope::parse(br#"{"jsonrpc":"1.0","id":18446744073709551615,"method":"ping"}"#)
            .expect_err("wrong version");
        let expected = RequestId::Number(serde_json::Number::from(u64::MAX));
        assert_eq!(err.recovered_id(), Some(&expected));
    }

    #[test]
    fn invalid_json_recovers_no_id() {
        let err = Envelope::parse(b"{not json").expect_err("must fail");
        assert!(matches!(err, EnvelopeError::Json(_)));
        assert!(err.recovered_id().is_none());
    }

    #[test]
    fn bad_shape_recovers_id_when_present() {
        let err = Envelope::parse(br#"{"jsonrpc":"2.0","id":7,"method":42}"#)
            .expect_err("numeric method is invalid");
        assert_eq!(err.recovered_id(), Some(&RequestId::Integer(7)));

        let err = Envelope::parse(br#"{"jsonrpc":"1.0","id":"x","method":"ping"}"#)
            .expect_err("wrong version");
        assert!(matches!(err, EnvelopeError::UnsupportedVersion { .. }));
        assert_eq!(err.recovered_id(), Some(&RequestId::String("x".to_string())));
    }

    #[test]
    fn non_object_envelope_is_rejected() {
        let err = Envelope::parse(b"[1,2,3]").expect_err("arrays are not envelopes");
        assert!(matches!(err, EnvelopeError::InvalidShape { id: None, .. }));
    }

    #[test]
    fn app_errors_map_to_protocol_codes() {
        let invalid = app_error_to_error_object(&AppError::bad_request("bad", "uri is required"));
        assert_eq!(invalid.code, INVALID_PARAMS);
        assert_eq!(invalid.message, "uri is required");

        let internal =
            app_error_to_error_object(&AppError::not_found("missing", "unknown prompt: x"));
        assert_eq!(internal.code, INTERNAL_ERROR);
        assert_eq!(internal.message, "unknown prompt: x");
        assert!(internal.data.is_none());
    }

    #[test]
    fn envelope_deserializes_through_serde() {
        let envelope: Envelope =
            serde_json::from_value(json!({"jsonrpc":"2.0","id":"abc","method":"tools/list"}))
                .expect("deserialize");
        assert!(envelope.is_request());
        assert!(!is_json_rpc_error(&envelope));
    }
}
