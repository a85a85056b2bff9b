use async_trait::async_trait;
use chat_protocol::{MessageId, UserId};

use crate::error::StoreError;
use crate::model::{ConversationRow, Message, MessageStatus, NewMessage};

/// Durable persistence of messages with a status field; indexed queries for
/// conversation history and pending-per-recipient.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn persist(
        &self,
        message: NewMessage,
        status: MessageStatus,
    ) -> Result<Message, StoreError>;

    /// Bulk transition to `delivered`. Idempotent: re-marking an
    /// already-delivered id is a no-op.
    async fn mark_delivered(&self, ids: &[MessageId]) -> Result<(), StoreError>;

    /// All messages addressed to `user` still `pending`, ascending `id`.
    async fn pending_for(&self, user: UserId) -> Result<Vec<Message>, StoreError>;

    /// The `limit` most recent P2P messages between `a` and `b` with
    /// `id < before_id` (or unbounded if `before_id` is `None`), in
    /// id-descending order.
    async fn p2p_history(
        &self,
        a: UserId,
        b: UserId,
        limit: i64,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError>;

    /// Same pagination contract as [`Self::p2p_history`], scoped to a group.
    async fn group_history(
        &self,
        group: i64,
        limit: i64,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError>;

    /// One row per distinct conversation `user` participates in, most
    /// recent message first.
    async fn recent_conversations(&self, user: UserId) -> Result<Vec<ConversationRow>, StoreError>;
}
