//! Admin API response model.
//!
//! Every admin endpoint answers with a JSON object. Most wrap their status in
//! a `response` envelope (`{"response":{"statusCode":0,"statusMsg":"..."}}`);
//! search answers carry `results` and `queryInfo` at the top level. Two
//! outcomes never arrive as JSON at all: the cluster reports them through a
//! broken HTTP status line, and the client synthesizes them locally as
//! [`Sentinel`] responses.

use serde_json::{Map, Value};

use crate::ResponseError;

/// `statusCode` of a successful call.
pub const STATUS_OK: i64 = 0;

/// Outcomes the cluster signals through a malformed status line instead of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// Delete-by-injection removed the document.
    ForceDeleted,
    /// Get-by-id found nothing.
    RecordNotFound,
}

impl Sentinel {
    /// Every known sentinel.
    pub const ALL: [Sentinel; 2] = [Sentinel::ForceDeleted, Sentinel::RecordNotFound];

    /// Numeric status code carried by the synthetic response.
    pub fn code(self) -> i64 {
        match self {
            Sentinel::ForceDeleted => 32805,
            Sentinel::RecordNotFound => 32771,
        }
    }

    /// Text the cluster puts in parentheses on the status line.
    pub fn message(self) -> &'static str {
        match self {
            Sentinel::ForceDeleted => "Doc force deleted",
            Sentinel::RecordNotFound => "Record not found",
        }
    }

    /// Match the parenthesized part of a status line.
    ///
    /// Accepts either the sentinel message or its numeric code.
    pub fn from_status_text(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.message() == text || s.code().to_string() == text)
    }

    /// Build the response the cluster would have sent had it used a JSON body.
    pub fn response(self) -> ApiResponse {
        ApiResponse::synthetic(self.code(), self.message())
    }
}

/// A decoded admin API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// `response.statusCode`, or 0 when the body has no envelope.
    pub status_code: i64,
    /// `response.statusMsg`, or empty when absent.
    pub status_msg: String,
    /// The whole JSON object as received.
    pub payload: Map<String, Value>,
}

impl ApiResponse {
    /// Decode a raw response body.
    pub fn from_body(body: &str) -> Result<Self, ResponseError> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_value(value)
    }

    /// Build from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ResponseError> {
        let Value::Object(payload) = value else {
            return Err(ResponseError::NotAnObject);
        };

        let envelope = payload.get("response").and_then(Value::as_object);
        let status_code = envelope
            .and_then(|r| r.get("statusCode"))
            .and_then(Value::as_i64)
            .unwrap_or(STATUS_OK);
        let status_msg = envelope
            .and_then(|r| r.get("statusMsg"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            status_code,
            status_msg,
            payload,
        })
    }

    /// Build a response locally, shaped like the cluster's own envelope.
    pub fn synthetic(status_code: i64, status_msg: &str) -> Self {
        let mut envelope = Map::new();
        envelope.insert("statusCode".into(), Value::from(status_code));
        envelope.insert("statusMsg".into(), Value::from(status_msg));

        let mut payload = Map::new();
        payload.insert("response".into(), Value::Object(envelope));

        Self {
            status_code,
            status_msg: status_msg.to_string(),
            payload,
        }
    }

    /// True when `statusCode` is 0.
    pub fn is_ok(&self) -> bool {
        self.status_code == STATUS_OK
    }

    /// True when this response carries the given sentinel code.
    pub fn is(&self, sentinel: Sentinel) -> bool {
        self.status_code == sentinel.code()
    }

    /// Look a field up in the `response` envelope first, then at the top level.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload
            .get("response")
            .and_then(Value::as_object)
            .and_then(|r| r.get(name))
            .or_else(|| self.payload.get(name))
    }

    /// Search results, empty when the field is missing.
    pub fn results(&self) -> &[Value] {
        self.field("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_envelope_status() {
        let response =
            ApiResponse::from_body(r#"{"response":{"statusCode":7,"statusMsg":"busy"}}"#).unwrap();
        assert_eq!(response.status_code, 7);
        assert_eq!(response.status_msg, "busy");
        assert!(!response.is_ok());
    }

    #[test]
    fn search_body_without_envelope_is_ok() {
        let response = ApiResponse::from_value(json!({
            "results": [{"url": "a.example/"}, {"url": "b.example/"}],
        }))
        .unwrap();
        assert!(response.is_ok());
        assert_eq!(response.results().len(), 2);
    }

    #[test]
    fn field_prefers_envelope() {
        let response = ApiResponse::from_value(json!({
            "response": {"statusCode": 0, "processStartTime": 42},
            "processStartTime": 7,
        }))
        .unwrap();
        assert_eq!(response.field("processStartTime"), Some(&json!(42)));
    }

    #[test]
    fn non_object_body_is_rejected() {
        assert!(matches!(
            ApiResponse::from_body("[1,2]"),
            Err(ResponseError::NotAnObject)
        ));
        assert!(matches!(
            ApiResponse::from_body("not json"),
            Err(ResponseError::Json(_))
        ));
    }

    #[test]
    fn sentinel_codes_and_messages() {
        assert_eq!(Sentinel::ForceDeleted.code(), 32805);
        assert_eq!(Sentinel::RecordNotFound.code(), 32771);
        assert_eq!(
            Sentinel::from_status_text(" Doc force deleted "),
            Some(Sentinel::ForceDeleted)
        );
        assert_eq!(
            Sentinel::from_status_text("32771"),
            Some(Sentinel::RecordNotFound)
        );
        assert_eq!(Sentinel::from_status_text("Internal error"), None);
    }

    #[test]
    fn synthetic_response_matches_cluster_shape() {
        let response = Sentinel::RecordNotFound.response();
        assert!(response.is(Sentinel::RecordNotFound));
        assert_eq!(
            Value::Object(response.payload.clone()),
            json!({"response": {"statusCode": 32771, "statusMsg": "Record not found"}})
        );
        assert!(response.results().is_empty());
    }
}
