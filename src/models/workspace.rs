use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A workspace joined with the caller's membership role.
#[derive(Debug, Clone, FromRow)]
pub struct WorkspaceWithRole {
    pub id: uuid::Uuid,
    pub name: String,
    pub slug: String,
    pub logo_url: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceWithRole {
    pub fn to_proto(&self) -> crate::proto::workspace::Workspace {
        crate::proto::workspace::Workspace {
            id: self.id.to_string(),
            name: self.name.clone(),
            slug: self.slug.clone(),
            logo_url: self.logo_url.clone().unwrap_or_default(),
            role: self.role.clone(),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MemberRow {
    pub user_id: uuid::Uuid,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

impl MemberRow {
    pub fn to_proto(&self) -> crate::proto::member::Member {
        crate::proto::member::Member {
            user_id: self.user_id.to_string(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone().unwrap_or_default(),
            role: self.role.clone(),
            joined_at: self.joined_at.to_rfc3339(),
        }
    }
}
