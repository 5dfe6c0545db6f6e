use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

/// A session row is usable while it is neither revoked nor expired.
pub async fn is_session_active(pool: &PgPool, session_id: Uuid) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS(
            SELECT 1 FROM sessions
            WHERE id = $1 AND revoked_at IS NULL AND expires_at > NOW()
         )",
    )
    .bind(session_id)
    .fetch_one(pool)
    .await
}

pub async fn insert_session<'e, E>(
    executor: E,
    user_id: Uuid,
    refresh_token_hash: &str,
    provider: &str,
    expires_at: DateTime<Utc>,
) -> Result<Uuid, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar(
        "INSERT INTO sessions (app_user_id, refresh_token_hash, provider, expires_at)
         VALUES ($1, $2, $3, $4)
         RETURNING id",
    )
    .bind(user_id)
    .bind(refresh_token_hash)
    .bind(provider)
    .bind(expires_at)
    .fetch_one(executor)
    .await
}

pub async fn revoke_session(pool: &PgPool, session_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL")
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn revoke_all_sessions<'e, E>(executor: E, user_id: Uuid) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE sessions SET revoked_at = NOW() WHERE app_user_id = $1 AND revoked_at IS NULL",
    )
    .bind(user_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
