//! Authorization rules for workspace operations.
//!
//! Services load the caller's membership and the target's membership, then ask
//! these predicates. Keeping them free of I/O keeps every rule unit-testable.

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Role;

/// A user together with their role in the workspace being acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub user_id: Uuid,
    pub role: Role,
}

impl Participant {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }
}

fn denied(msg: &str) -> AppError {
    AppError::PermissionDenied(msg.to_string())
}

pub fn not_a_member() -> AppError {
    denied("Not a member of this workspace")
}

pub fn ensure_manager(role: Role) -> AppResult<()> {
    if role.is_manager() {
        Ok(())
    } else {
        Err(denied("Admin role required"))
    }
}

pub fn ensure_owner(role: Role) -> AppResult<()> {
    if role == Role::Owner {
        Ok(())
    } else {
        Err(denied("Owner role required"))
    }
}

/// Name and logo changes.
pub fn ensure_can_update_workspace(role: Role) -> AppResult<()> {
    ensure_manager(role)
}

pub fn ensure_can_rename_slug(role: Role) -> AppResult<()> {
    ensure_manager(role)
}

pub fn ensure_can_delete_workspace(role: Role) -> AppResult<()> {
    ensure_owner(role)
}

pub fn ensure_can_transfer_ownership(actor: &Participant, target: &Participant) -> AppResult<()> {
    ensure_owner(actor.role)?;
    if actor.user_id == target.user_id {
        return Err(AppError::InvalidInput(
            "Cannot transfer ownership to yourself".to_string(),
        ));
    }
    Ok(())
}

pub fn ensure_can_manage_invitations(role: Role) -> AppResult<()> {
    ensure_manager(role)
}

/// An actor may invite with any assignable role up to their own.
pub fn ensure_can_invite(actor_role: Role, invited_role: Role) -> AppResult<()> {
    ensure_manager(actor_role)?;
    if invited_role == Role::Owner {
        return Err(AppError::InvalidInput(
            "Role must be 'admin' or 'member'".to_string(),
        ));
    }
    if !actor_role.at_least(invited_role) {
        return Err(denied("Cannot invite with a role higher than your own"));
    }
    Ok(())
}

pub fn ensure_can_change_role(
    actor: &Participant,
    target: &Participant,
    new_role: Role,
) -> AppResult<()> {
    ensure_manager(actor.role)?;
    if actor.user_id == target.user_id {
        return Err(AppError::InvalidInput("Cannot change your own role".to_string()));
    }
    if new_role == Role::Owner {
        return Err(AppError::InvalidInput(
            "Use ownership transfer to make someone the owner".to_string(),
        ));
    }
    if target.role == Role::Owner {
        return Err(denied("The owner's role cannot be changed"));
    }
    if target.role == Role::Admin && actor.role != Role::Owner {
        return Err(denied("Only the owner can change an admin's role"));
    }
    Ok(())
}

pub fn ensure_can_remove(actor: &Participant, target: &Participant) -> AppResult<()> {
    ensure_manager(actor.role)?;
    if actor.user_id == target.user_id {
        return Err(AppError::InvalidInput(
            "Cannot remove yourself. Leave the workspace instead.".to_string(),
        ));
    }
    if target.role == Role::Owner {
        return Err(denied("The owner cannot be removed"));
    }
    if target.role == Role::Admin && actor.role != Role::Owner {
        return Err(denied("Only the owner can remove an admin"));
    }
    Ok(())
}

pub fn ensure_can_leave(role: Role) -> AppResult<()> {
    if role == Role::Owner {
        return Err(AppError::FailedPrecondition(
            "The owner cannot leave. Transfer ownership first.".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(role: Role) -> Participant {
        Participant::new(Uuid::new_v4(), role)
    }

    fn is_denied(result: AppResult<()>) -> bool {
        matches!(result, Err(AppError::PermissionDenied(_)))
    }

    #[test]
    fn test_workspace_settings() {
        assert!(ensure_can_update_workspace(Role::Owner).is_ok());
        assert!(ensure_can_update_workspace(Role::Admin).is_ok());
        assert!(is_denied(ensure_can_update_workspace(Role::Member)));

        assert!(ensure_can_rename_slug(Role::Admin).is_ok());
        assert!(is_denied(ensure_can_rename_slug(Role::Member)));

        assert!(ensure_can_delete_workspace(Role::Owner).is_ok());
        assert!(is_denied(ensure_can_delete_workspace(Role::Admin)));
    }

    #[test]
    fn test_transfer_ownership() {
        let owner = p(Role::Owner);
        let admin = p(Role::Admin);
        assert!(ensure_can_transfer_ownership(&owner, &admin).is_ok());
        assert!(is_denied(ensure_can_transfer_ownership(&admin, &owner)));
        assert!(matches!(
            ensure_can_transfer_ownership(&owner, &owner),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_invite() {
        assert!(ensure_can_invite(Role::Owner, Role::Admin).is_ok());
        assert!(ensure_can_invite(Role::Admin, Role::Admin).is_ok());
        assert!(ensure_can_invite(Role::Admin, Role::Member).is_ok());
        assert!(is_denied(ensure_can_invite(Role::Member, Role::Member)));
        assert!(matches!(
            ensure_can_invite(Role::Owner, Role::Owner),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_change_role_by_owner() {
        let owner = p(Role::Owner);
        assert!(ensure_can_change_role(&owner, &p(Role::Member), Role::Admin).is_ok());
        assert!(ensure_can_change_role(&owner, &p(Role::Admin), Role::Member).is_ok());
        assert!(ensure_can_change_role(&owner, &p(Role::Member), Role::Owner).is_err());
        assert!(ensure_can_change_role(&owner, &owner, Role::Member).is_err());
    }

    #[test]
    fn test_change_role_by_admin() {
        let admin = p(Role::Admin);
        assert!(ensure_can_change_role(&admin, &p(Role::Member), Role::Admin).is_ok());
        assert!(is_denied(ensure_can_change_role(&admin, &p(Role::Admin), Role::Member)));
        assert!(is_denied(ensure_can_change_role(&admin, &p(Role::Owner), Role::Member)));
    }

    #[test]
    fn test_change_role_by_member() {
        let member = p(Role::Member);
        assert!(is_denied(ensure_can_change_role(&member, &p(Role::Member), Role::Admin)));
    }

    #[test]
    fn test_remove() {
        let owner = p(Role::Owner);
        let admin = p(Role::Admin);
        let member = p(Role::Member);

        assert!(ensure_can_remove(&owner, &admin).is_ok());
        assert!(ensure_can_remove(&owner, &member).is_ok());
        assert!(ensure_can_remove(&admin, &member).is_ok());
        assert!(is_denied(ensure_can_remove(&admin, &p(Role::Admin))));
        assert!(is_denied(ensure_can_remove(&admin, &owner)));
        assert!(is_denied(ensure_can_remove(&member, &p(Role::Member))));
        assert!(matches!(
            ensure_can_remove(&admin, &admin),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_leave() {
        assert!(ensure_can_leave(Role::Member).is_ok());
        assert!(ensure_can_leave(Role::Admin).is_ok());
        assert!(matches!(
            ensure_can_leave(Role::Owner),
            Err(AppError::FailedPrecondition(_))
        ));
    }
}
