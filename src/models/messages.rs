//! Page <-> worker message protocol.

use serde::{Deserialize, Serialize};

use crate::http::Headers;

/// Control messages sent by a page to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate the installed worker now
    SkipWaiting,
    /// Delete every cache store
    ClearCache,
    /// Enqueue a request on the page's behalf
    QueueRequest {
        url: String,
        method: String,
        #[serde(default)]
        headers: Headers,
        #[serde(default)]
        body: Option<String>,
    },
}

/// Reply sent back over the same channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Queue id assigned to a `QUEUE_REQUEST`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl WorkerReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            id: None,
        }
    }

    pub fn queued(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::ok()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_tags() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        assert_eq!(msg, ClientMessage::SkipWaiting);

        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"QUEUE_REQUEST","url":"/orders","method":"POST","body":"{}"}"#,
        )
        .unwrap();
        let ClientMessage::QueueRequest { headers, body, .. } = msg else {
            panic!("expected QUEUE_REQUEST");
        };
        assert!(headers.is_empty());
        assert_eq!(body.as_deref(), Some("{}"));
    }

    #[test]
    fn test_unknown_message_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"REBOOT"}"#).is_err());
    }

    #[test]
    fn test_reply_omits_empty_fields() {
        let json = serde_json::to_string(&WorkerReply::ok()).unwrap();
        assert_eq!(json, r#"{"success":true}"#);

        let json = serde_json::to_value(WorkerReply::failed("quota")).unwrap();
        assert_eq!(json["error"], "quota");
    }
}
