use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct PasswordCredential {
    pub app_user_id: uuid::Uuid,
    pub password_hash: String,
}
