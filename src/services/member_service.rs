use sqlx::PgPool;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::authz;
use crate::db::{lock_actor_and_target, require_member};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthenticatedUser;
use crate::models::{MemberRow, Role};
use crate::proto::common::Empty;
use crate::proto::member::member_service_server::MemberService;
use crate::proto::member::{
    LeaveWorkspaceRequest, ListMembersRequest, ListMembersResponse, MemberResponse,
    RemoveMemberRequest, UpdateMemberRoleRequest,
};
use crate::validation::parse_uuid;

const SELECT_MEMBERS: &str = "SELECT u.id AS user_id, u.email, u.display_name, u.avatar_url, wm.role, wm.created_at AS joined_at
     FROM workspace_members wm
     JOIN app_users u ON u.id = wm.user_id
     WHERE wm.workspace_id = $1 AND u.deleted_at IS NULL";

pub struct MemberServiceImpl {
    pool: PgPool,
}

impl MemberServiceImpl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_member(&self, workspace_id: Uuid, user_id: Uuid) -> AppResult<MemberRow> {
        sqlx::query_as::<_, MemberRow>(&format!("{} AND wm.user_id = $2", SELECT_MEMBERS))
            .bind(workspace_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("User is not a member of this workspace".to_string()))
    }

    async fn do_list(&self, user: &AuthenticatedUser, req: ListMembersRequest) -> AppResult<Vec<MemberRow>> {
        let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;
        require_member(&self.pool, workspace_id, user.user_id).await?;

        Ok(sqlx::query_as::<_, MemberRow>(&format!(
            "{} ORDER BY wm.created_at",
            SELECT_MEMBERS
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn do_update_role(&self, user: &AuthenticatedUser, req: UpdateMemberRoleRequest) -> AppResult<MemberRow> {
        let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;
        let target_id = parse_uuid(&req.user_id, "user_id")?;
        let new_role: Role = req.role.parse()?;

        let mut tx = self.pool.begin().await?;

        // Both rows stay locked until commit, so neither role can change under us
        let (caller, target) = lock_actor_and_target(&mut *tx, workspace_id, user.user_id, target_id).await?;
        authz::ensure_can_change_role(&caller, &target, new_role)?;

        if target.role != new_role {
            sqlx::query(
                "UPDATE workspace_members SET role = $1, updated_at = NOW()
                 WHERE workspace_id = $2 AND user_id = $3",
            )
            .bind(new_role.as_str())
            .bind(workspace_id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if target.role != new_role {
            tracing::info!(
                "User {} changed role of {} in workspace {}: {} -> {}",
                user.user_id,
                target_id,
                workspace_id,
                target.role,
                new_role
            );
        }

        self.fetch_member(workspace_id, target_id).await
    }

    async fn do_remove(&self, user: &AuthenticatedUser, req: RemoveMemberRequest) -> AppResult<()> {
        let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;
        let target_id = parse_uuid(&req.user_id, "user_id")?;

        let mut tx = self.pool.begin().await?;

        let (caller, target) = lock_actor_and_target(&mut *tx, workspace_id, user.user_id, target_id).await?;
        authz::ensure_can_remove(&caller, &target)?;

        sqlx::query("DELETE FROM workspace_members WHERE workspace_id = $1 AND user_id = $2")
            .bind(workspace_id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            "User {} removed {} from workspace {}",
            user.user_id,
            target_id,
            workspace_id
        );
        Ok(())
    }

    async fn do_leave(&self, user: &AuthenticatedUser, req: LeaveWorkspaceRequest) -> AppResult<()> {
        let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;

        let caller = require_member(&self.pool, workspace_id, user.user_id).await?;
        authz::ensure_can_leave(caller.role)?;

        sqlx::query(
            "DELETE FROM workspace_members WHERE workspace_id = $1 AND user_id = $2 AND role <> $3",
        )
        .bind(workspace_id)
        .bind(user.user_id)
        .bind(Role::Owner.as_str())
        .execute(&self.pool)
        .await?;

        tracing::info!("User {} left workspace {}", user.user_id, workspace_id);
        Ok(())
    }
}

#[tonic::async_trait]
impl MemberService for MemberServiceImpl {
    async fn list_members(
        &self,
        request: Request<ListMembersRequest>,
    ) -> Result<Response<ListMembersResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let members = self
            .do_list(&user, request.into_inner())
            .await?
            .iter()
            .map(MemberRow::to_proto)
            .collect();
        Ok(Response::new(ListMembersResponse { members }))
    }

    async fn update_member_role(
        &self,
        request: Request<UpdateMemberRoleRequest>,
    ) -> Result<Response<MemberResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let member = self.do_update_role(&user, request.into_inner()).await?;
        Ok(Response::new(MemberResponse {
            member: Some(member.to_proto()),
        }))
    }

    async fn remove_member(
        &self,
        request: Request<RemoveMemberRequest>,
    ) -> Result<Response<Empty>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        self.do_remove(&user, request.into_inner()).await?;
        Ok(Response::new(Empty {}))
    }

    async fn leave_workspace(
        &self,
        request: Request<LeaveWorkspaceRequest>,
    ) -> Result<Response<Empty>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        self.do_leave(&user, request.into_inner()).await?;
        Ok(Response::new(Empty {}))
    }
}
