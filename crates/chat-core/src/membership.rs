use async_trait::async_trait;
use chat_protocol::{GroupId, UserId};

use crate::model::RecipientClass;

/// Given an identifier, answers "is this a group? who are its members?" and
/// "does user U belong to group G?". Group membership CRUD itself is out of
/// scope; this is a read-only facade over it.
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn classify(&self, recipient: i64) -> RecipientClass;
    async fn is_member(&self, user: UserId, group: GroupId) -> bool;
    async fn user_exists(&self, user: UserId) -> bool;
}
