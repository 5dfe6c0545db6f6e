use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct InvitationRow {
    pub id: uuid::Uuid,
    pub workspace_id: uuid::Uuid,
    pub email: String,
    pub role: String,
    pub invited_by: uuid::Uuid,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Revoked,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Revoked => "revoked",
            InvitationStatus::Expired => "expired",
        }
    }
}

impl InvitationRow {
    /// Terminal markers win over expiry: an invitation accepted before it expired
    /// stays accepted.
    pub fn status_at(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.accepted_at.is_some() {
            InvitationStatus::Accepted
        } else if self.revoked_at.is_some() {
            InvitationStatus::Revoked
        } else if self.declined_at.is_some() {
            InvitationStatus::Declined
        } else if self.expires_at <= now {
            InvitationStatus::Expired
        } else {
            InvitationStatus::Pending
        }
    }

    pub fn to_proto(&self, now: DateTime<Utc>) -> crate::proto::invitation::Invitation {
        crate::proto::invitation::Invitation {
            id: self.id.to_string(),
            workspace_id: self.workspace_id.to_string(),
            email: self.email.clone(),
            role: self.role.clone(),
            invited_by: self.invited_by.to_string(),
            status: self.status_at(now).as_str().to_string(),
            expires_at: self.expires_at.to_rfc3339(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}
