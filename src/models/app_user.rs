use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct AppUser {
    pub id: uuid::Uuid,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub email_verified_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl AppUser {
    pub fn to_proto(&self) -> crate::proto::user::User {
        crate::proto::user::User {
            id: self.id.to_string(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone().unwrap_or_default(),
            email_verified: self.email_verified_at.is_some(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}
