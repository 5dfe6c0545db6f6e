use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::authz::{self, Participant};
use crate::error::{AppError, AppResult};
use crate::models::Role;

/// Role of `user_id` in a live (not deleted) workspace, if they are a member.
pub async fn fetch_role<'e, E>(executor: E, workspace_id: Uuid, user_id: Uuid) -> AppResult<Option<Role>>
where
    E: PgExecutor<'e>,
{
    let role: Option<String> = sqlx::query_scalar(
        "SELECT wm.role
         FROM workspace_members wm
         JOIN workspaces w ON w.id = wm.workspace_id
         WHERE wm.workspace_id = $1 AND wm.user_id = $2 AND w.deleted_at IS NULL",
    )
    .bind(workspace_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?;

    role.map(|r| r.parse()).transpose()
}

/// Loads the caller's membership or fails with `PermissionDenied`.
pub async fn require_member(pool: &PgPool, workspace_id: Uuid, user_id: Uuid) -> AppResult<Participant> {
    let role = fetch_role(pool, workspace_id, user_id)
        .await?
        .ok_or_else(authz::not_a_member)?;
    Ok(Participant::new(user_id, role))
}

/// Row-locks the given memberships until the transaction ends. Rows are locked
/// in user id order so two transactions over the same pair cannot deadlock.
async fn lock_roles(
    conn: &mut PgConnection,
    workspace_id: Uuid,
    user_ids: &[Uuid],
) -> AppResult<Vec<Participant>> {
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT wm.user_id, wm.role
         FROM workspace_members wm
         JOIN workspaces w ON w.id = wm.workspace_id
         WHERE wm.workspace_id = $1 AND wm.user_id = ANY($2) AND w.deleted_at IS NULL
         ORDER BY wm.user_id
         FOR UPDATE OF wm",
    )
    .bind(workspace_id)
    .bind(user_ids)
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|(user_id, role)| Ok(Participant::new(user_id, role.parse()?)))
        .collect()
}

/// Locks the caller's membership, failing with `PermissionDenied` when absent.
pub async fn lock_member(conn: &mut PgConnection, workspace_id: Uuid, user_id: Uuid) -> AppResult<Participant> {
    lock_roles(conn, workspace_id, &[user_id])
        .await?
        .into_iter()
        .next()
        .ok_or_else(authz::not_a_member)
}

/// Locks the memberships of an actor and the member they act on. A missing actor
/// is `PermissionDenied`, a missing target `NotFound`.
pub async fn lock_actor_and_target(
    conn: &mut PgConnection,
    workspace_id: Uuid,
    actor_id: Uuid,
    target_id: Uuid,
) -> AppResult<(Participant, Participant)> {
    let locked = lock_roles(conn, workspace_id, &[actor_id, target_id]).await?;
    let find = |id: Uuid| locked.iter().find(|p| p.user_id == id).cloned();

    let actor = find(actor_id).ok_or_else(authz::not_a_member)?;
    let target = find(target_id).ok_or_else(|| {
        AppError::NotFound("User is not a member of this workspace".to_string())
    })?;
    Ok((actor, target))
}
