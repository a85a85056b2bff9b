use async_trait::async_trait;
use chat_core::error::StoreError;
use chat_core::model::{ConversationRow, Message, MessageKind, MessageStatus, NewMessage};
use chat_core::store::MessageStore;
use chat_protocol::{MessageId, UserId};
use sqlx::PgPool;

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn kind_to_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
        MessageKind::System => "system",
    }
}

fn kind_from_str(s: &str) -> MessageKind {
    match s {
        "image" => MessageKind::Image,
        "system" => MessageKind::System,
        _ => MessageKind::Text,
    }
}

fn status_to_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Pending => "pending",
        MessageStatus::Sent => "sent",
        MessageStatus::Delivered => "delivered",
    }
}

fn status_from_str(s: &str) -> MessageStatus {
    match s {
        "pending" => MessageStatus::Pending,
        "delivered" => MessageStatus::Delivered,
        _ => MessageStatus::Sent,
    }
}

struct MessageRow {
    id: i64,
    sender_id: i64,
    recipient_id: i64,
    kind: String,
    content: String,
    media_url: Option<String>,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            sender: row.sender_id,
            recipient: row.recipient_id,
            kind: kind_from_str(&row.kind),
            content: row.content,
            media_url: row.media_url,
            timestamp: row.created_at.timestamp_millis(),
            status: status_from_str(&row.status),
        }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn persist(
        &self,
        message: NewMessage,
        status: MessageStatus,
    ) -> Result<Message, StoreError> {
        let row = sqlx::query_as!(
            MessageRow,
            r#"INSERT INTO messages (sender_id, recipient_id, kind, content, media_url, status)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, sender_id, recipient_id, kind, content, media_url, status, created_at"#,
            message.sender,
            message.recipient,
            kind_to_str(message.kind),
            message.content,
            message.media_url,
            status_to_str(status),
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::new(e.to_string()))?;
        Ok(row.into())
    }

    async fn mark_delivered(&self, ids: &[MessageId]) -> Result<(), StoreError> {
        sqlx::query!(
            "UPDATE messages SET status = 'delivered' WHERE id = ANY($1) AND status != 'delivered'",
            ids
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::new(e.to_string()))?;
        Ok(())
    }

    async fn pending_for(&self, user: UserId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as!(
            MessageRow,
            r#"SELECT id, sender_id, recipient_id, kind, content, media_url, status, created_at
               FROM messages
               WHERE recipient_id = $1 AND status = 'pending'
               ORDER BY id ASC"#,
            user
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::new(e.to_string()))?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn p2p_history(
        &self,
        a: UserId,
        b: UserId,
        limit: i64,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as!(
            MessageRow,
            r#"SELECT id, sender_id, recipient_id, kind, content, media_url, status, created_at
               FROM messages
               WHERE ((sender_id = $1 AND recipient_id = $2) OR (sender_id = $2 AND recipient_id = $1))
                 AND ($3::BIGINT IS NULL OR id < $3)
               ORDER BY id DESC
               LIMIT $4"#,
            a,
            b,
            before_id,
            limit,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::new(e.to_string()))?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn group_history(
        &self,
        group: i64,
        limit: i64,
        before_id: Option<MessageId>,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as!(
            MessageRow,
            r#"SELECT id, sender_id, recipient_id, kind, content, media_url, status, created_at
               FROM messages
               WHERE recipient_id = $1
                 AND ($2::BIGINT IS NULL OR id < $2)
               ORDER BY id DESC
               LIMIT $3"#,
            group,
            before_id,
            limit,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::new(e.to_string()))?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn recent_conversations(&self, user: UserId) -> Result<Vec<ConversationRow>, StoreError> {
        let rows = sqlx::query!(
            r#"SELECT DISTINCT ON (peer_id) peer_id, is_group,
                      id, sender_id, recipient_id, kind, content, media_url, status, created_at
               FROM (
                   SELECT
                       CASE
                           WHEN recipient_id IN (SELECT group_id FROM groups) THEN recipient_id
                           WHEN sender_id = $1 THEN recipient_id
                           ELSE sender_id
                       END AS peer_id,
                       (recipient_id IN (SELECT group_id FROM groups)) AS is_group,
                       id, sender_id, recipient_id, kind, content, media_url, status, created_at
                   FROM messages
                   WHERE sender_id = $1
                      OR recipient_id = $1
                      OR recipient_id IN (SELECT group_id FROM group_members WHERE user_id = $1)
               ) conv
               ORDER BY peer_id, id DESC"#,
            user
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::new(e.to_string()))?;

        let mut result: Vec<ConversationRow> = rows
            .into_iter()
            .map(|r| ConversationRow {
                peer_id: r.peer_id.unwrap_or_default(),
                is_group: r.is_group.unwrap_or(false),
                last_message: MessageRow {
                    id: r.id,
                    sender_id: r.sender_id,
                    recipient_id: r.recipient_id,
                    kind: r.kind,
                    content: r.content,
                    media_url: r.media_url,
                    status: r.status,
                    created_at: r.created_at,
                }
                .into(),
            })
            .collect();
        result.sort_by(|a, b| b.last_message.id.cmp(&a.last_message.id));
        Ok(result)
    }
}
