use sqlx::PgPool;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::authz;
use crate::db::{lock_actor_and_target, lock_member};
use crate::error::{AppError, AppResult};
use crate::middleware::AuthenticatedUser;
use crate::models::{Role, WorkspaceWithRole};
use crate::proto::common::Empty;
use crate::proto::workspace::workspace_service_server::WorkspaceService;
use crate::proto::workspace::{
    CheckSlugRequest, CheckSlugResponse, CreateWorkspaceRequest, GetWorkspaceRequest,
    ListWorkspacesResponse, RenameSlugRequest, TransferOwnershipRequest, UpdateWorkspaceRequest,
    WorkspaceIdRequest, WorkspaceResponse,
};
use crate::validation::{
    derive_slug, normalize_slug, parse_uuid, validate_slug, validate_url, validate_workspace_name,
};

const SLUG_TAKEN: &str = "Workspace slug already taken";

fn workspace_not_found() -> AppError {
    AppError::NotFound("Workspace not found".to_string())
}

const SELECT_WORKSPACE_WITH_ROLE: &str = "SELECT w.id, w.name, w.slug, w.logo_url, wm.role, w.created_at, w.updated_at
     FROM workspaces w
     JOIN workspace_members wm ON wm.workspace_id = w.id
     WHERE wm.user_id = $1 AND w.deleted_at IS NULL";

pub struct WorkspaceServiceImpl {
    pool: PgPool,
}

impl WorkspaceServiceImpl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_workspace(&self, user_id: Uuid, workspace_id: Uuid) -> AppResult<WorkspaceWithRole> {
        sqlx::query_as::<_, WorkspaceWithRole>(&format!("{} AND w.id = $2", SELECT_WORKSPACE_WITH_ROLE))
            .bind(user_id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(workspace_not_found)
    }

    async fn slug_in_use(&self, slug: &str) -> AppResult<bool> {
        // Deleted workspaces keep their slug reserved
        Ok(sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM workspaces WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn do_create(&self, user: &AuthenticatedUser, req: CreateWorkspaceRequest) -> AppResult<WorkspaceWithRole> {
        let name = validate_workspace_name(&req.name)?;
        let slug = if req.slug.trim().is_empty() {
            derive_slug(&name)?
        } else {
            validate_slug(&req.slug)?
        };
        let logo_url = validate_url(&req.logo_url)?;

        if self.slug_in_use(&slug).await? {
            return Err(AppError::AlreadyExists(SLUG_TAKEN.to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let workspace_id: Uuid = sqlx::query_scalar(
            "INSERT INTO workspaces (name, slug, logo_url, created_by) VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&name)
        .bind(&slug)
        .bind(logo_url.as_deref())
        .bind(user.user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::unique_or_database(e, SLUG_TAKEN))?;

        sqlx::query("INSERT INTO workspace_members (workspace_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(workspace_id)
            .bind(user.user_id)
            .bind(Role::Owner.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!("User {} created workspace {} ({})", user.user_id, workspace_id, slug);
        self.fetch_workspace(user.user_id, workspace_id).await
    }

    async fn do_check_slug(&self, req: CheckSlugRequest) -> AppResult<CheckSlugResponse> {
        let slug = match validate_slug(&req.slug) {
            Ok(slug) => slug,
            Err(AppError::InvalidInput(reason)) => {
                return Ok(CheckSlugResponse {
                    slug: normalize_slug(&req.slug),
                    available: false,
                    reason,
                })
            }
            Err(e) => return Err(e),
        };

        let taken = self.slug_in_use(&slug).await?;
        Ok(CheckSlugResponse {
            slug,
            available: !taken,
            reason: if taken { SLUG_TAKEN.to_string() } else { String::new() },
        })
    }

    async fn do_list(&self, user: &AuthenticatedUser) -> AppResult<Vec<WorkspaceWithRole>> {
        Ok(sqlx::query_as::<_, WorkspaceWithRole>(&format!(
            "{} ORDER BY w.created_at",
            SELECT_WORKSPACE_WITH_ROLE
        ))
        .bind(user.user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Non-members get `NotFound` whether they ask by id or by slug.
    async fn do_get(&self, user: &AuthenticatedUser, req: GetWorkspaceRequest) -> AppResult<WorkspaceWithRole> {
        if !req.workspace_id.is_empty() {
            let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;
            return self.fetch_workspace(user.user_id, workspace_id).await;
        }
        if req.slug.trim().is_empty() {
            return Err(AppError::InvalidInput("workspace_id or slug is required".to_string()));
        }

        sqlx::query_as::<_, WorkspaceWithRole>(&format!("{} AND w.slug = $2", SELECT_WORKSPACE_WITH_ROLE))
            .bind(user.user_id)
            .bind(normalize_slug(&req.slug))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(workspace_not_found)
    }

    async fn do_update(&self, user: &AuthenticatedUser, req: UpdateWorkspaceRequest) -> AppResult<WorkspaceWithRole> {
        let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;
        let name = validate_workspace_name(&req.name)?;
        let logo_url = validate_url(&req.logo_url)?;

        let mut tx = self.pool.begin().await?;

        let caller = lock_member(&mut *tx, workspace_id, user.user_id).await?;
        authz::ensure_can_update_workspace(caller.role)?;

        sqlx::query(
            "UPDATE workspaces SET name = $1, logo_url = $2, updated_at = NOW()
             WHERE id = $3 AND deleted_at IS NULL",
        )
        .bind(&name)
        .bind(logo_url.as_deref())
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.fetch_workspace(user.user_id, workspace_id).await
    }

    async fn do_rename_slug(&self, user: &AuthenticatedUser, req: RenameSlugRequest) -> AppResult<WorkspaceWithRole> {
        let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;
        let slug = validate_slug(&req.slug)?;

        let current = self.fetch_workspace(user.user_id, workspace_id).await?;
        if current.slug == slug {
            return Ok(current);
        }
        if self.slug_in_use(&slug).await? {
            return Err(AppError::AlreadyExists(SLUG_TAKEN.to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let caller = lock_member(&mut *tx, workspace_id, user.user_id).await?;
        authz::ensure_can_rename_slug(caller.role)?;

        sqlx::query("UPDATE workspaces SET slug = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL")
            .bind(&slug)
            .bind(workspace_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::unique_or_database(e, SLUG_TAKEN))?;

        tx.commit().await?;

        tracing::info!(
            "Workspace {} renamed from {} to {} by {}",
            workspace_id,
            current.slug,
            slug,
            user.user_id
        );
        self.fetch_workspace(user.user_id, workspace_id).await
    }

    async fn do_delete(&self, user: &AuthenticatedUser, req: WorkspaceIdRequest) -> AppResult<()> {
        let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;

        let mut tx = self.pool.begin().await?;

        let caller = lock_member(&mut *tx, workspace_id, user.user_id).await?;
        authz::ensure_can_delete_workspace(caller.role)?;

        sqlx::query("UPDATE workspaces SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM workspace_members WHERE workspace_id = $1")
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE invitations SET revoked_at = NOW()
             WHERE workspace_id = $1 AND accepted_at IS NULL AND declined_at IS NULL AND revoked_at IS NULL",
        )
        .bind(workspace_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!("Workspace {} deleted by {}", workspace_id, user.user_id);
        Ok(())
    }

    async fn do_transfer_ownership(&self, user: &AuthenticatedUser, req: TransferOwnershipRequest) -> AppResult<()> {
        let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;
        let target_id = parse_uuid(&req.target_user_id, "target_user_id")?;

        let mut tx = self.pool.begin().await?;

        // Both rows stay locked, so the target cannot leave or be removed midway
        let (caller, target) = lock_actor_and_target(&mut *tx, workspace_id, user.user_id, target_id).await?;
        authz::ensure_can_transfer_ownership(&caller, &target)?;

        // Demote first: the single-owner index rejects two owners at once
        for (member, role) in [(caller.user_id, Role::Admin), (target.user_id, Role::Owner)] {
            let result = sqlx::query(
                "UPDATE workspace_members SET role = $1, updated_at = NOW()
                 WHERE workspace_id = $2 AND user_id = $3",
            )
            .bind(role.as_str())
            .bind(workspace_id)
            .bind(member)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                return Err(AppError::FailedPrecondition(
                    "Membership changed concurrently, please retry".to_string(),
                ));
            }
        }

        tx.commit().await?;

        tracing::info!(
            "Ownership of workspace {} transferred from {} to {}",
            workspace_id,
            caller.user_id,
            target.user_id
        );
        Ok(())
    }
}

fn workspace_response(workspace: WorkspaceWithRole) -> Response<WorkspaceResponse> {
    Response::new(WorkspaceResponse {
        workspace: Some(workspace.to_proto()),
    })
}

#[tonic::async_trait]
impl WorkspaceService for WorkspaceServiceImpl {
    async fn create_workspace(
        &self,
        request: Request<CreateWorkspaceRequest>,
    ) -> Result<Response<WorkspaceResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let workspace = self.do_create(&user, request.into_inner()).await?;
        Ok(workspace_response(workspace))
    }

    async fn check_slug_availability(
        &self,
        request: Request<CheckSlugRequest>,
    ) -> Result<Response<CheckSlugResponse>, Status> {
        Ok(Response::new(self.do_check_slug(request.into_inner()).await?))
    }

    async fn list_my_workspaces(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<ListWorkspacesResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let workspaces = self
            .do_list(&user)
            .await?
            .iter()
            .map(WorkspaceWithRole::to_proto)
            .collect();
        Ok(Response::new(ListWorkspacesResponse { workspaces }))
    }

    async fn get_workspace(
        &self,
        request: Request<GetWorkspaceRequest>,
    ) -> Result<Response<WorkspaceResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let workspace = self.do_get(&user, request.into_inner()).await?;
        Ok(workspace_response(workspace))
    }

    async fn update_workspace(
        &self,
        request: Request<UpdateWorkspaceRequest>,
    ) -> Result<Response<WorkspaceResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let workspace = self.do_update(&user, request.into_inner()).await?;
        Ok(workspace_response(workspace))
    }

    async fn rename_workspace_slug(
        &self,
        request: Request<RenameSlugRequest>,
    ) -> Result<Response<WorkspaceResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let workspace = self.do_rename_slug(&user, request.into_inner()).await?;
        Ok(workspace_response(workspace))
    }

    async fn delete_workspace(
        &self,
        request: Request<WorkspaceIdRequest>,
    ) -> Result<Response<Empty>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        self.do_delete(&user, request.into_inner()).await?;
        Ok(Response::new(Empty {}))
    }

    async fn transfer_ownership(
        &self,
        request: Request<TransferOwnershipRequest>,
    ) -> Result<Response<Empty>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        self.do_transfer_ownership(&user, request.into_inner()).await?;
        Ok(Response::new(Empty {}))
    }
}
