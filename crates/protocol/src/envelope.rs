use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::ResponseCode;

/// Envelope for every HTTP response.
///
/// `code` stays a raw integer so a client can still read envelopes carrying
/// codes it does not know about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    /// Creates a success envelope with a payload.
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            code: ResponseCode::Success.code(),
            message: message.into(),
            data: Some(data),
            timestamp: now_iso8601(),
        }
    }

    /// Creates an envelope without a payload.
    pub fn bare(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
            timestamp: now_iso8601(),
        }
    }

    /// Creates an error envelope carrying structured details (e.g. missing indices).
    pub fn error_with(code: ResponseCode, message: impl Into<String>, data: T) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: Some(data),
            timestamp: now_iso8601(),
        }
    }

    /// Returns `true` if the envelope reports success.
    pub fn is_success(&self) -> bool {
        self.code == ResponseCode::Success.code()
    }

    /// Returns the typed code, if known.
    pub fn response_code(&self) -> Option<ResponseCode> {
        ResponseCode::from_code(self.code)
    }
}

/// Current UTC time in the `2024-01-01T00:00:00.000Z` form.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{CheckResponse, MissingChunks};

    #[test]
    fn ok_envelope_has_zero_code() {
        let resp = ApiResponse::ok("done", CheckResponse::missing());
        assert!(resp.is_success());
        assert_eq!(resp.response_code(), Some(ResponseCode::Success));
        assert!(resp.timestamp.ends_with('Z'));
    }

    #[test]
    fn bare_envelope_omits_data() {
        let resp = ApiResponse::<()>::bare(ResponseCode::NotFound, "Not Found");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["code"], 4005);
        assert_eq!(json["message"], "Not Found");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn error_envelope_carries_details() {
        let resp = ApiResponse::error_with(
            ResponseCode::ChunksMissing,
            "missing chunks",
            MissingChunks { missing: vec![2] },
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["code"], 4009);
        assert_eq!(json["data"]["missing"], serde_json::json!([2]));
        assert!(!resp.is_success());
    }

    #[test]
    fn unknown_code_still_parses() {
        let json = r#"{"code":4999,"message":"teapot"}"#;
        let resp: ApiResponse<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert_eq!(resp.code, 4999);
        assert_eq!(resp.response_code(), None);
        assert!(resp.data.is_none());
        assert!(resp.timestamp.is_empty());
    }
}
