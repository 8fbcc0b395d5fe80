use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::constants::DELETION_REQUEST_PING_NAME;

/// An assembled ping, ready for upload: the envelope plus everything the
/// uploader needs to post it. This is also the shape persisted in the
/// pending-pings store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    /// The per-submission UUID, the final segment of `path`.
    pub document_id: String,
    /// The ping type's name.
    pub ping_name: String,
    /// The server path:
    /// `/submit/<applicationId>/<pingName>/<schemaVersion>/<documentId>`.
    pub path: String,
    /// The JSON envelope.
    pub payload: JsonValue,
    /// The headers to send, including `Date` and `X-Telemetry-Agent`.
    pub headers: Vec<(String, String)>,
    /// Wall-clock milliseconds of assembly; pending pings are presented
    /// to the upload manager in this order.
    pub submitted_at: i64,
}

impl PingRequest {
    /// Creates a request stamped with the current time.
    pub fn new(
        document_id: String,
        ping_name: String,
        path: String,
        payload: JsonValue,
        headers: Vec<(String, String)>,
    ) -> Self {
        Self {
            document_id,
            ping_name,
            path,
            payload,
            headers,
            submitted_at: Utc::now().timestamp_millis(),
        }
    }

    /// The full submission URL against the given server endpoint.
    pub fn url(&self, server_endpoint: &str) -> String {
        format!("{}{}", server_endpoint.trim_end_matches('/'), self.path)
    }

    /// The serialized body.
    pub fn body(&self) -> Vec<u8> {
        self.payload.to_string().into_bytes()
    }

    /// Whether this is the ping sent on upload-disable; it survives queue
    /// clearing.
    pub fn is_deletion_request(&self) -> bool {
        self.ping_name == DELETION_REQUEST_PING_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_joins_endpoint_and_path() {
        let request = PingRequest::new(
            "doc-id".into(),
            "baseline".into(),
            "/submit/app/baseline/1/doc-id".into(),
            json!({}),
            Vec::new(),
        );
        assert_eq!(
            "https://telemetry.example.com/submit/app/baseline/1/doc-id",
            request.url("https://telemetry.example.com/")
        );
        assert_eq!(
            "https://telemetry.example.com/submit/app/baseline/1/doc-id",
            request.url("https://telemetry.example.com")
        );
    }
}
