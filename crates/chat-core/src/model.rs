use chat_protocol::{MessageId, UserId};

/// A persisted message's delivery kind. `Typing` never reaches this type —
/// it is represented separately by [`crate::model::TypingSignal`] and is
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    System,
}

/// Monotonic on the lattice `pending -> delivered`, `sent -> delivered`.
/// No transition back to `pending` is ever performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
}

/// The durable unit of communication. `recipient` is an opaque id that may
/// name either a user or a group; callers resolve which via
/// [`crate::membership::MembershipOracle`] rather than tagging it here,
/// matching the single `recipient` column of the persisted schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub recipient: i64,
    pub kind: MessageKind,
    pub content: String,
    pub media_url: Option<String>,
    pub timestamp: i64,
    pub status: MessageStatus,
}

/// A message not yet assigned an id, timestamp, or status.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender: UserId,
    pub recipient: i64,
    pub kind: MessageKind,
    pub content: String,
    pub media_url: Option<String>,
}

impl NewMessage {
    /// At least one of `content`, `media_url` must be non-empty.
    pub fn validate(&self) -> bool {
        !self.content.is_empty() || self.media_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// Transient `{sender, recipient, kind=typing}` tuple. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub sender: UserId,
    pub recipient: i64,
}

/// What [`crate::membership::MembershipOracle::classify`] resolves an
/// opaque recipient id to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientClass {
    User,
    Group { members: Vec<UserId> },
}

/// One row of a recent-conversations summary (`GET /v1/chats`).
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRow {
    pub peer_id: i64,
    pub is_group: bool,
    pub last_message: Message,
}
