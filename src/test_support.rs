//! Fixtures for the `#[sqlx::test]` suites of the services.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::db::session::insert_session;
use crate::error::AppResult;
use crate::mailer::{Mailer, OutgoingEmail};
use crate::middleware::AuthenticatedUser;
use crate::models::Role;

pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("DATABASE_URL", "postgres://localhost/tenantry_test"),
        ("JWT_SECRET", "test-secret"),
    ]);
    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

/// Inserts an account with a live session and returns the identity the auth
/// layer would attach for it.
pub async fn create_user(pool: &PgPool, email: &str, verified: bool) -> AuthenticatedUser {
    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO app_users (email, display_name, email_verified_at)
         VALUES ($1, $1, CASE WHEN $2 THEN NOW() END)
         RETURNING id",
    )
    .bind(email)
    .bind(verified)
    .fetch_one(pool)
    .await
    .unwrap();

    let session_id = insert_session(
        pool,
        user_id,
        &Uuid::new_v4().to_string(),
        "password",
        Utc::now() + Duration::days(1),
    )
    .await
    .unwrap();

    AuthenticatedUser {
        user_id,
        email: email.to_string(),
        session_id,
    }
}

pub async fn add_member(pool: &PgPool, workspace_id: Uuid, user_id: Uuid, role: Role) {
    sqlx::query("INSERT INTO workspace_members (workspace_id, user_id, role) VALUES ($1, $2, $3)")
        .bind(workspace_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(pool)
        .await
        .unwrap();
}

/// Inserts a workspace owned by `owner` and returns its id.
pub async fn create_workspace(pool: &PgPool, owner: &AuthenticatedUser, slug: &str) -> Uuid {
    let workspace_id: Uuid = sqlx::query_scalar(
        "INSERT INTO workspaces (name, slug, created_by) VALUES ($1, $1, $2) RETURNING id",
    )
    .bind(slug)
    .bind(owner.user_id)
    .fetch_one(pool)
    .await
    .unwrap();
    add_member(pool, workspace_id, owner.user_id, Role::Owner).await;
    workspace_id
}

pub async fn role_of(pool: &PgPool, workspace_id: Uuid, user_id: Uuid) -> Option<String> {
    sqlx::query_scalar("SELECT role FROM workspace_members WHERE workspace_id = $1 AND user_id = $2")
        .bind(workspace_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .unwrap()
}

pub async fn owner_count(pool: &PgPool, workspace_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM workspace_members WHERE workspace_id = $1 AND role = 'owner'")
        .bind(workspace_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Keeps every message so tests can read codes and links back.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingMailer {
    pub fn sent_to(&self, to: &str) -> Vec<OutgoingEmail> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == to)
            .cloned()
            .collect()
    }
}

#[tonic::async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> AppResult<()> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// First six-digit run in a message body.
pub fn otp_code(body: &str) -> String {
    body.split(|c: char| !c.is_ascii_digit())
        .find(|run| run.len() == 6)
        .unwrap()
        .to_string()
}
