// chat-protocol: wire types shared between the live WebSocket channel and
// the REST surface.
//
// Inbound WS frames use two distinct discriminant fields depending on shape:
// `action` for control commands (currently only `set_recipient`) and `type`
// for structured messages. `InboundFrame` tries the former first, then the
// latter, mirroring how a client actually picks one shape or the other.

use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type GroupId = i64;
pub type MessageId = i64;

/// `{"action":"set_recipient","user_id":N}` or `{"action":"set_recipient","group_id":N}`.
///
/// Exactly one of `user_id`/`group_id` should be set; the session ignores
/// the frame (treats it as a no-op) if neither or both are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRecipientCommand {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    System,
    Typing,
}

/// Inbound structured message candidate as received from the wire.
///
/// `sender_id` and `timestamp`, if the client supplies them, are ignored by
/// the session: the server always overwrites sender with the session's
/// bound identity and timestamp with the server clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessageFrame {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

/// An inbound WS text frame, classified per spec before it reaches the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    SetRecipient(SetRecipientCommand),
    Message(InboundMessageFrame),
}

/// Outbound wire shape for a persisted message, sent one per WS frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    /// Either a user id or a group id; the client already knows which from
    /// context (it asked for it, or it's a member of the group).
    pub recipient_id: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub timestamp: i64,
}

/// Transient typing signal, never persisted, forwarded only to online peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

/// Server-initiated system message, e.g. the welcome frame on register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub content: String,
}

/// Outbound WS envelope: everything the session's write loop can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Message(OutboundMessage),
    Typing(TypingSignal),
    System(SystemMessage),
    Error(ErrorMessage),
}

pub mod error_codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const VALIDATION: &str = "VALIDATION";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const CONFLICT: &str = "CONFLICT";
    pub const STORAGE: &str = "STORAGE";
    pub const TRANSPORT: &str = "TRANSPORT";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Frozen HTTP error envelope used by all non-2xx REST responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// One entry in a history page, `GET /v1/{users,groups}/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub timestamp: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<MessageDto>,
}

/// One row of `GET /v1/chats`: the most recent message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Positive for a user peer, negative-encoded-as-group is avoided: the
    /// caller already knows which list (`peers` vs `groups`) this came from.
    pub peer_id: i64,
    pub is_group: bool,
    pub last_message: MessageDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatsResponse {
    pub conversations: Vec<ConversationSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_recipient_command_parses_with_group_id() {
        let json = r#"{"action":"set_recipient","group_id":42}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        match frame {
            InboundFrame::SetRecipient(cmd) => {
                assert_eq!(cmd.group_id, Some(42));
                assert_eq!(cmd.user_id, None);
            }
            other => panic!("expected SetRecipient, got {other:?}"),
        }
    }

    #[test]
    fn structured_message_frame_ignores_unknown_fields() {
        let json = r#"{"type":"text","recipient_id":7,"content":"hi","sender_id":999,"timestamp":12345}"#;
        let frame: InboundFrame = serde_json::from_str(json).unwrap();
        match frame {
            InboundFrame::Message(m) => {
                assert_eq!(m.recipient_id, Some(7));
                assert_eq!(m.content, "hi");
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn outbound_message_round_trips() {
        let msg = OutboundMessage {
            id: 1,
            sender_id: 2,
            recipient_id: 3,
            kind: MessageKind::Text,
            content: "yo".to_owned(),
            media_url: None,
            timestamp: 100,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: OutboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
