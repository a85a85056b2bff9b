use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chat_protocol::UserId;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

/// Issues a fresh bearer token for `user_id`. Registration/login are out of
/// scope for this service; this exists so tests (and an operator shell) can
/// bootstrap a token without touching the `tokens` table by hand.
pub async fn issue_token(pool: &PgPool, user_id: UserId) -> Result<String, sqlx::Error> {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let raw_token = URL_SAFE_NO_PAD.encode(bytes);
    let hash = Sha256::digest(raw_token.as_bytes());

    sqlx::query!(
        "INSERT INTO tokens (user_id, token_hash) VALUES ($1, $2)",
        user_id,
        hash.as_slice(),
    )
    .execute(pool)
    .await?;

    Ok(raw_token)
}
