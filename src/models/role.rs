use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Authorization level of a user inside a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Role::Owner => 2,
            Role::Admin => 1,
            Role::Member => 0,
        }
    }

    /// True when this role is at least `other`.
    pub fn at_least(&self, other: Role) -> bool {
        self.rank() >= other.rank()
    }

    /// Admins and the owner manage members and invitations.
    pub fn is_manager(&self) -> bool {
        self.at_least(Role::Admin)
    }

    /// Parses a role sent by a client for an invitation or a role change.
    /// Empty means `member`; `owner` is never assignable this way.
    pub fn parse_assignable(raw: &str) -> Result<Role, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Role::Member);
        }
        match trimmed.parse::<Role>()? {
            Role::Owner => Err(AppError::InvalidInput(
                "Role must be 'admin' or 'member'".to_string(),
            )),
            role => Ok(role),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(AppError::InvalidInput(format!("Unknown role: {}", other))),
        }
    }
}
