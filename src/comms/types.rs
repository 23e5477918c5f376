/// Comms wire format
///
/// Peer to server: `{"subscribe": pattern}` or `{"auth": token}`.
/// Server to peer: `{"auth": "ok"|"fail"}`, or topic messages, either one
/// `{topic, data}` object or a batch array of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic used for keep-alive messages
pub const HEARTBEAT_TOPIC: &str = "hb";

/// One published message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub topic: String,
    #[serde(default)]
    pub data: Value,
}

impl TopicMessage {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }
}

/// Frames a peer sends to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe(String),
    Auth(String),
}

impl ClientFrame {
    pub fn to_text(&self) -> Result<String, CommsError> {
        serde_json::to_string(self).map_err(CommsError::Frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Ok,
    Fail,
}

/// Frames the server sends to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Auth { auth: AuthStatus },
    Batch(Vec<TopicMessage>),
    Single(TopicMessage),
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, CommsError> {
        serde_json::from_str(text).map_err(CommsError::Frame)
    }

    pub fn to_text(&self) -> Result<String, CommsError> {
        serde_json::to_string(self).map_err(CommsError::Frame)
    }

    /// The topic messages carried, empty for auth replies
    pub fn into_messages(self) -> Vec<TopicMessage> {
        match self {
            ServerFrame::Auth { .. } => Vec::new(),
            ServerFrame::Batch(messages) => messages,
            ServerFrame::Single(message) => vec![message],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommsError {
    #[error("invalid comms url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported scheme '{0}' for comms url")]
    UnsupportedScheme(String),

    #[error("invalid topic pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("malformed comms frame: {0}")]
    Frame(#[source] serde_json::Error),

    #[error("comms transport error: {0}")]
    Transport(String),

    #[error("comms authentication rejected")]
    AuthRejected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_are_single_key_objects() {
        assert_eq!(
            ClientFrame::Subscribe("status/#".into()).to_text().unwrap(),
            r#"{"subscribe":"status/#"}"#
        );
        assert_eq!(ClientFrame::Auth("t0k".into()).to_text().unwrap(), r#"{"auth":"t0k"}"#);
    }

    #[test]
    fn server_frames_parse_all_shapes() {
        assert_eq!(
            ServerFrame::parse(r#"{"auth":"ok"}"#).unwrap(),
            ServerFrame::Auth { auth: AuthStatus::Ok }
        );
        let single = ServerFrame::parse(r#"{"topic":"a/b","data":1}"#).unwrap();
        assert_eq!(single.into_messages(), vec![TopicMessage::new("a/b", json!(1))]);

        let batch = ServerFrame::parse(r#"[{"topic":"x","data":{}},{"topic":"y"}]"#).unwrap();
        let messages = batch.into_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].data, serde_json::Value::Null);

        assert!(ServerFrame::parse("{").is_err());
    }
}
