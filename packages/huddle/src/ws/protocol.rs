//! WebSocket Protocol Types
//!
//! Tagged event types for client-server communication. Variant and field
//! names follow the wire protocol the web client speaks (`joinChannel`,
//! `messageReceived`, ...). Signaling payloads (`description`, `candidate`)
//! are opaque JSON relayed without interpretation.

use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;

/// Events sent FROM the client TO the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Enter a channel room. Requires an authenticated connection.
    #[serde(rename_all = "camelCase")]
    JoinChannel { channel_id: String },

    /// Leave a channel room. Also triggered implicitly by disconnect.
    #[serde(rename_all = "camelCase")]
    LeaveChannel { channel_id: String },

    /// Send a chat message to a channel the connection has joined. The
    /// server persists the message first and relays the stored record.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        channel_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
    },

    /// Start a video call: SDP offer, relayed to all other connections.
    #[serde(rename_all = "camelCase")]
    Offer {
        description: serde_json::Value,
        display_name: String,
    },

    /// SDP answer to a received offer.
    Answer { description: serde_json::Value },

    /// Trickle ICE candidate.
    #[serde(rename = "ice-candidate")]
    IceCandidate { candidate: serde_json::Value },

    /// Hang up the current call.
    Leave,
}

/// Events sent FROM the server TO clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A chat message relayed to the other occupants of its channel. The
    /// full stored record is flattened into the event.
    MessageReceived {
        #[serde(flatten)]
        message: ChatMessage,
    },

    /// Presence notice: someone entered the channel.
    #[serde(rename_all = "camelCase")]
    UserJoined { display_name: String, text: String },

    /// Presence notice: someone left the channel (or disconnected).
    #[serde(rename_all = "camelCase")]
    UserLeft { display_name: String, text: String },

    /// Relayed call offer.
    #[serde(rename_all = "camelCase")]
    Offer {
        description: serde_json::Value,
        display_name: String,
    },

    /// Relayed call answer.
    Answer { description: serde_json::Value },

    /// Relayed ICE candidate.
    #[serde(rename = "ice-candidate")]
    IceCandidate { candidate: serde_json::Value },

    /// The remote peer hung up; tear down the peer connection.
    Leave,

    /// A request from this connection was rejected. Sent only to the
    /// offending connection, never broadcast.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn join_channel_parses() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"joinChannel","channelId":"c-1"}"#).unwrap();
        assert!(matches!(event, ClientEvent::JoinChannel { channel_id } if channel_id == "c-1"));
    }

    #[test]
    fn missing_required_field_rejected() {
        // sendMessage without content must not parse
        let result =
            serde_json::from_str::<ClientEvent>(r#"{"type":"sendMessage","channelId":"c-1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_type_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"type":"shutdownServer"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn ice_candidate_tag_is_hyphenated() {
        let event = ServerEvent::IceCandidate {
            candidate: json!({"sdpMid": "0"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ice-candidate");

        let parsed: ClientEvent =
            serde_json::from_str(r#"{"type":"ice-candidate","candidate":{"sdpMid":"0"}}"#).unwrap();
        assert!(matches!(parsed, ClientEvent::IceCandidate { .. }));
    }

    #[test]
    fn leave_has_no_payload() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"leave"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Leave));
        assert_eq!(
            serde_json::to_string(&ServerEvent::Leave).unwrap(),
            r#"{"type":"leave"}"#
        );
    }

    #[test]
    fn offer_payload_is_opaque() {
        let description = json!({"type": "offer", "sdp": "v=0\r\no=- 42 2 IN IP4 127.0.0.1"});
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "offer",
            "description": description,
            "displayName": "alice",
        }))
        .unwrap();
        match event {
            ClientEvent::Offer {
                description: d,
                display_name,
            } => {
                assert_eq!(d, description);
                assert_eq!(display_name, "alice");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn message_received_flattens_record() {
        let event = ServerEvent::MessageReceived {
            message: ChatMessage {
                id: "m-1".into(),
                channel_id: "c-1".into(),
                user_id: "u-1".into(),
                sender: "alice".into(),
                content: "hi".into(),
                image: None,
                timestamp: Utc::now(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "messageReceived");
        assert_eq!(json["channelId"], "c-1");
        assert_eq!(json["content"], "hi");
    }
}
