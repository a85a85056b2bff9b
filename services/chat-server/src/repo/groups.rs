use async_trait::async_trait;
use chat_core::membership::MembershipOracle;
use chat_core::model::RecipientClass;
use chat_protocol::{GroupId, UserId};
use sqlx::PgPool;

pub struct PgMembershipOracle {
    pool: PgPool,
}

impl PgMembershipOracle {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipOracle for PgMembershipOracle {
    async fn classify(&self, recipient: i64) -> RecipientClass {
        let members = sqlx::query_scalar!(
            "SELECT user_id FROM group_members WHERE group_id = $1 ORDER BY user_id",
            recipient
        )
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default();

        let is_group = sqlx::query_scalar!(
            "SELECT EXISTS(SELECT 1 FROM groups WHERE group_id = $1)",
            recipient
        )
        .fetch_one(&self.pool)
        .await
        .ok()
        .flatten()
        .unwrap_or(false);

        if is_group {
            RecipientClass::Group { members }
        } else {
            RecipientClass::User
        }
    }

    async fn is_member(&self, user: UserId, group: GroupId) -> bool {
        sqlx::query_scalar!(
            "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = $1 AND user_id = $2)",
            group,
            user
        )
        .fetch_one(&self.pool)
        .await
        .ok()
        .flatten()
        .unwrap_or(false)
    }

    async fn user_exists(&self, user: UserId) -> bool {
        sqlx::query_scalar!(
            "SELECT EXISTS(SELECT 1 FROM tokens WHERE user_id = $1)",
            user
        )
        .fetch_one(&self.pool)
        .await
        .ok()
        .flatten()
        .unwrap_or(false)
    }
}
