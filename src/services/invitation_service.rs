use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::authz;
use crate::config::Config;
use crate::crypto::{generate_secret_token, hash_token};
use crate::db::{fetch_role, require_member};
use crate::error::{AppError, AppResult};
use crate::mailer::{invitation_email, Mailer};
use crate::middleware::AuthenticatedUser;
use crate::models::{InvitationRow, InvitationStatus, Role};
use crate::proto::common::Empty;
use crate::proto::invitation::invitation_service_server::InvitationService;
use crate::proto::invitation::{
    AcceptInvitationResponse, CreateInvitationRequest, CreateInvitationResponse,
    InvitationIdRequest, InvitationPreview, InvitationTokenRequest, ListInvitationsRequest,
    ListInvitationsResponse, ListMyInvitationsResponse, PendingInvitation,
};
use crate::validation::{normalize_email, parse_uuid};

const INVITATION_COLUMNS: &str = "i.id, i.workspace_id, i.email, i.role, i.invited_by, i.expires_at,
     i.accepted_at, i.declined_at, i.revoked_at, i.created_at";

const PENDING: &str = "i.accepted_at IS NULL AND i.declined_at IS NULL AND i.revoked_at IS NULL";

/// An invitation row together with the workspace it points at
#[derive(Debug, sqlx::FromRow)]
struct InvitationWithWorkspace {
    #[sqlx(flatten)]
    invitation: InvitationRow,
    workspace_name: String,
    workspace_slug: String,
    invited_by_name: String,
}

/// The caller's account as stored, which may differ from the token's claims
#[derive(Debug, sqlx::FromRow)]
struct CallerAccount {
    email: String,
    email_verified: bool,
}

pub struct InvitationServiceImpl {
    pool: PgPool,
    ttl: Duration,
    app_base_url: String,
    mailer: Arc<dyn Mailer>,
}

impl InvitationServiceImpl {
    pub fn new(pool: PgPool, config: &Config, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            pool,
            ttl: Duration::days(config.invitation_ttl_days),
            app_base_url: config.app_base_url.clone(),
            mailer,
        }
    }

    async fn caller_account(&self, user_id: Uuid) -> AppResult<CallerAccount> {
        sqlx::query_as::<_, CallerAccount>(
            "SELECT email, email_verified_at IS NOT NULL AS email_verified
             FROM app_users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Account no longer exists".to_string()))
    }

    async fn find_by_token<'e, E>(executor: E, token: &str, lock: bool) -> AppResult<InvitationWithWorkspace>
    where
        E: sqlx::PgExecutor<'e>,
    {
        if token.is_empty() {
            return Err(AppError::InvalidInput("token is required".to_string()));
        }

        let sql = format!(
            "SELECT {}, w.name AS workspace_name, w.slug AS workspace_slug, u.display_name AS invited_by_name
             FROM invitations i
             JOIN workspaces w ON w.id = i.workspace_id
             JOIN app_users u ON u.id = i.invited_by
             WHERE i.token_hash = $1 AND w.deleted_at IS NULL{}",
            INVITATION_COLUMNS,
            if lock { " FOR UPDATE OF i" } else { "" }
        );

        sqlx::query_as::<_, InvitationWithWorkspace>(&sql)
            .bind(hash_token(token))
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::NotFound("Invitation not found".to_string()))
    }

    async fn do_create(&self, user: &AuthenticatedUser, req: CreateInvitationRequest) -> AppResult<CreateInvitationResponse> {
        let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;
        let email = normalize_email(&req.email)?;
        let role = Role::parse_assignable(&req.role)?;

        let caller = require_member(&self.pool, workspace_id, user.user_id).await?;
        authz::ensure_can_invite(caller.role, role)?;

        let already_member: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM workspace_members wm
                JOIN app_users u ON u.id = wm.user_id
                WHERE wm.workspace_id = $1 AND lower(u.email) = $2 AND u.deleted_at IS NULL
             )",
        )
        .bind(workspace_id)
        .bind(&email)
        .fetch_one(&self.pool)
        .await?;

        if already_member {
            return Err(AppError::AlreadyExists(
                "This email already belongs to a member of the workspace".to_string(),
            ));
        }

        let (workspace_name, inviter_name): (String, String) = sqlx::query_as(
            "SELECT w.name, u.display_name FROM workspaces w, app_users u WHERE w.id = $1 AND u.id = $2",
        )
        .bind(workspace_id)
        .bind(user.user_id)
        .fetch_one(&self.pool)
        .await?;

        let token = generate_secret_token();
        let expires_at = Utc::now() + self.ttl;

        let mut tx = self.pool.begin().await?;

        // Re-inviting replaces the pending invitation
        sqlx::query(&format!(
            "UPDATE invitations i SET revoked_at = NOW()
             WHERE i.workspace_id = $1 AND lower(i.email) = $2 AND {}",
            PENDING
        ))
        .bind(workspace_id)
        .bind(&email)
        .execute(&mut *tx)
        .await?;

        let invitation = sqlx::query_as::<_, InvitationRow>(&format!(
            "INSERT INTO invitations AS i (workspace_id, email, role, token_hash, invited_by, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            INVITATION_COLUMNS
        ))
        .bind(workspace_id)
        .bind(&email)
        .bind(role.as_str())
        .bind(hash_token(&token))
        .bind(user.user_id)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::unique_or_database(e, "A pending invitation for this email already exists"))?;

        tx.commit().await?;

        tracing::info!(
            "User {} invited {} to workspace {} as {}",
            user.user_id,
            email,
            workspace_id,
            role
        );

        self.mailer
            .send(invitation_email(
                &email,
                &inviter_name,
                &workspace_name,
                role,
                &self.app_base_url,
                &token,
                self.ttl.num_days(),
            ))
            .await?;

        Ok(CreateInvitationResponse {
            invitation: Some(invitation.to_proto(Utc::now())),
            token,
        })
    }

    async fn do_list(&self, user: &AuthenticatedUser, req: ListInvitationsRequest) -> AppResult<Vec<InvitationRow>> {
        let workspace_id = parse_uuid(&req.workspace_id, "workspace_id")?;

        let caller = require_member(&self.pool, workspace_id, user.user_id).await?;
        authz::ensure_can_manage_invitations(caller.role)?;

        Ok(sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {} FROM invitations i
             WHERE i.workspace_id = $1 AND {} AND i.expires_at > NOW()
             ORDER BY i.created_at DESC",
            INVITATION_COLUMNS, PENDING
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn do_revoke(&self, user: &AuthenticatedUser, req: InvitationIdRequest) -> AppResult<()> {
        let invitation_id = parse_uuid(&req.invitation_id, "invitation_id")?;

        let workspace_id: Uuid = sqlx::query_scalar("SELECT workspace_id FROM invitations WHERE id = $1")
            .bind(invitation_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Invitation not found".to_string()))?;

        let caller = require_member(&self.pool, workspace_id, user.user_id).await?;
        authz::ensure_can_manage_invitations(caller.role)?;

        let result = sqlx::query(&format!(
            "UPDATE invitations i SET revoked_at = NOW() WHERE i.id = $1 AND {}",
            PENDING
        ))
        .bind(invitation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::FailedPrecondition(
                "Invitation is no longer pending".to_string(),
            ));
        }

        tracing::info!("User {} revoked invitation {}", user.user_id, invitation_id);
        Ok(())
    }

    async fn do_get(&self, req: InvitationTokenRequest) -> AppResult<InvitationPreview> {
        let found = Self::find_by_token(&self.pool, &req.token, false).await?;
        let inv = &found.invitation;

        Ok(InvitationPreview {
            workspace_name: found.workspace_name.clone(),
            workspace_slug: found.workspace_slug.clone(),
            email: inv.email.clone(),
            role: inv.role.clone(),
            status: inv.status_at(Utc::now()).as_str().to_string(),
            expires_at: inv.expires_at.to_rfc3339(),
            invited_by_name: found.invited_by_name.clone(),
        })
    }

    /// Checks that `found` is pending and addressed to the caller's verified email.
    fn ensure_respondable(found: &InvitationWithWorkspace, caller: &CallerAccount) -> AppResult<()> {
        match found.invitation.status_at(Utc::now()) {
            InvitationStatus::Pending => {}
            InvitationStatus::Expired => {
                return Err(AppError::FailedPrecondition("Invitation has expired".to_string()))
            }
            other => {
                return Err(AppError::FailedPrecondition(format!(
                    "Invitation has already been {}",
                    other.as_str()
                )))
            }
        }
        if !found.invitation.email.eq_ignore_ascii_case(&caller.email) {
            return Err(AppError::PermissionDenied(
                "This invitation was sent to a different email address".to_string(),
            ));
        }
        if !caller.email_verified {
            return Err(AppError::FailedPrecondition("Verify your email first".to_string()));
        }
        Ok(())
    }

    async fn do_accept(&self, user: &AuthenticatedUser, req: InvitationTokenRequest) -> AppResult<AcceptInvitationResponse> {
        let caller = self.caller_account(user.user_id).await?;

        let mut tx = self.pool.begin().await?;

        let found = Self::find_by_token(&mut *tx, &req.token, true).await?;
        Self::ensure_respondable(&found, &caller)?;
        let workspace_id = found.invitation.workspace_id;

        // An existing membership keeps its role
        sqlx::query(
            "INSERT INTO workspace_members (workspace_id, user_id, role) VALUES ($1, $2, $3)
             ON CONFLICT (workspace_id, user_id) DO NOTHING",
        )
        .bind(workspace_id)
        .bind(user.user_id)
        .bind(&found.invitation.role)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE invitations SET accepted_at = NOW(), accepted_by = $1 WHERE id = $2")
            .bind(user.user_id)
            .bind(found.invitation.id)
            .execute(&mut *tx)
            .await?;

        let role = fetch_role(&mut *tx, workspace_id, user.user_id)
            .await?
            .ok_or_else(|| AppError::Internal("Membership missing after accept".to_string()))?;

        tx.commit().await?;

        tracing::info!(
            "User {} accepted invitation {} to workspace {}",
            user.user_id,
            found.invitation.id,
            workspace_id
        );

        Ok(AcceptInvitationResponse {
            workspace_id: workspace_id.to_string(),
            workspace_slug: found.workspace_slug,
            role: role.as_str().to_string(),
        })
    }

    async fn do_decline(&self, user: &AuthenticatedUser, req: InvitationTokenRequest) -> AppResult<()> {
        let caller = self.caller_account(user.user_id).await?;

        let mut tx = self.pool.begin().await?;

        let found = Self::find_by_token(&mut *tx, &req.token, true).await?;
        Self::ensure_respondable(&found, &caller)?;

        sqlx::query("UPDATE invitations SET declined_at = NOW() WHERE id = $1")
            .bind(found.invitation.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!("User {} declined invitation {}", user.user_id, found.invitation.id);
        Ok(())
    }

    async fn do_list_mine(&self, user: &AuthenticatedUser) -> AppResult<Vec<InvitationWithWorkspace>> {
        let caller = self.caller_account(user.user_id).await?;
        // Invitations are only shown once the address is proven
        if !caller.email_verified {
            return Ok(Vec::new());
        }

        Ok(sqlx::query_as::<_, InvitationWithWorkspace>(&format!(
            "SELECT {}, w.name AS workspace_name, w.slug AS workspace_slug, u.display_name AS invited_by_name
             FROM invitations i
             JOIN workspaces w ON w.id = i.workspace_id
             JOIN app_users u ON u.id = i.invited_by
             WHERE lower(i.email) = $1 AND {} AND i.expires_at > NOW() AND w.deleted_at IS NULL
             ORDER BY i.created_at DESC",
            INVITATION_COLUMNS, PENDING
        ))
        .bind(caller.email.to_lowercase())
        .fetch_all(&self.pool)
        .await?)
    }
}

#[tonic::async_trait]
impl InvitationService for InvitationServiceImpl {
    async fn create_invitation(
        &self,
        request: Request<CreateInvitationRequest>,
    ) -> Result<Response<CreateInvitationResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        Ok(Response::new(self.do_create(&user, request.into_inner()).await?))
    }

    async fn list_invitations(
        &self,
        request: Request<ListInvitationsRequest>,
    ) -> Result<Response<ListInvitationsResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let now = Utc::now();
        let invitations = self
            .do_list(&user, request.into_inner())
            .await?
            .iter()
            .map(|inv| inv.to_proto(now))
            .collect();
        Ok(Response::new(ListInvitationsResponse { invitations }))
    }

    async fn revoke_invitation(
        &self,
        request: Request<InvitationIdRequest>,
    ) -> Result<Response<Empty>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        self.do_revoke(&user, request.into_inner()).await?;
        Ok(Response::new(Empty {}))
    }

    async fn get_invitation(
        &self,
        request: Request<InvitationTokenRequest>,
    ) -> Result<Response<InvitationPreview>, Status> {
        Ok(Response::new(self.do_get(request.into_inner()).await?))
    }

    async fn accept_invitation(
        &self,
        request: Request<InvitationTokenRequest>,
    ) -> Result<Response<AcceptInvitationResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        Ok(Response::new(self.do_accept(&user, request.into_inner()).await?))
    }

    async fn decline_invitation(
        &self,
        request: Request<InvitationTokenRequest>,
    ) -> Result<Response<Empty>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        self.do_decline(&user, request.into_inner()).await?;
        Ok(Response::new(Empty {}))
    }

    async fn list_my_invitations(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<ListMyInvitationsResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let now = Utc::now();
        let invitations = self
            .do_list_mine(&user)
            .await?
            .into_iter()
            .map(|found| PendingInvitation {
                invitation: Some(found.invitation.to_proto(now)),
                workspace_name: found.workspace_name,
                workspace_slug: found.workspace_slug,
            })
            .collect();
        Ok(Response::new(ListMyInvitationsResponse { invitations }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_member, create_user, create_workspace, role_of, test_config, RecordingMailer};

    fn found(status: Option<&str>, expires_in: Duration) -> InvitationWithWorkspace {
        let now = Utc::now();
        InvitationWithWorkspace {
            invitation: InvitationRow {
                id: Uuid::new_v4(),
                workspace_id: Uuid::new_v4(),
                email: "bob@example.com".to_string(),
                role: "member".to_string(),
                invited_by: Uuid::new_v4(),
                expires_at: now + expires_in,
                accepted_at: (status == Some("accepted")).then_some(now),
                declined_at: (status == Some("declined")).then_some(now),
                revoked_at: (status == Some("revoked")).then_some(now),
                created_at: now,
            },
            workspace_name: "Acme".to_string(),
            workspace_slug: "acme".to_string(),
            invited_by_name: "Alice".to_string(),
        }
    }

    fn account(email: &str, email_verified: bool) -> CallerAccount {
        CallerAccount {
            email: email.to_string(),
            email_verified,
        }
    }

    #[test]
    fn test_pending_invitation_for_matching_email() {
        let inv = found(None, Duration::days(1));
        assert!(InvitationServiceImpl::ensure_respondable(&inv, &account("Bob@Example.com", true)).is_ok());
    }

    #[test]
    fn test_other_email_denied() {
        let inv = found(None, Duration::days(1));
        assert!(matches!(
            InvitationServiceImpl::ensure_respondable(&inv, &account("eve@example.com", true)),
            Err(AppError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_unverified_email_cannot_respond() {
        let inv = found(None, Duration::days(1));
        let err = InvitationServiceImpl::ensure_respondable(&inv, &account("bob@example.com", false)).unwrap_err();
        assert!(matches!(err, AppError::FailedPrecondition(ref msg) if msg == "Verify your email first"));
    }

    #[test]
    fn test_expired_or_closed_invitation() {
        let bob = account("bob@example.com", true);
        let expired = found(None, Duration::days(-1));
        let err = InvitationServiceImpl::ensure_respondable(&expired, &bob).unwrap_err();
        assert!(err.to_string().contains("expired"));

        for status in ["accepted", "declined", "revoked"] {
            let inv = found(Some(status), Duration::days(1));
            let err = InvitationServiceImpl::ensure_respondable(&inv, &bob).unwrap_err();
            assert!(matches!(err, AppError::FailedPrecondition(ref msg) if msg.contains(status)));
        }
    }

    fn service(pool: &PgPool) -> (InvitationServiceImpl, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer::default());
        let svc = InvitationServiceImpl::new(pool.clone(), &test_config(), mailer.clone());
        (svc, mailer)
    }

    fn invite(workspace_id: Uuid, email: &str, role: &str) -> CreateInvitationRequest {
        CreateInvitationRequest {
            workspace_id: workspace_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    fn token(value: &str) -> InvitationTokenRequest {
        InvitationTokenRequest {
            token: value.to_string(),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_reinvite_replaces_pending_invitation(pool: PgPool) {
        let (svc, mailer) = service(&pool);
        let alice = create_user(&pool, "alice@example.com", true).await;
        let ws = create_workspace(&pool, &alice, "acme").await;

        let first = svc.do_create(&alice, invite(ws, "bob@example.com", "member")).await.unwrap();
        let second = svc.do_create(&alice, invite(ws, "Bob@Example.com", "admin")).await.unwrap();
        assert_ne!(first.token, second.token);

        let pending = svc
            .do_list(&alice, ListInvitationsRequest { workspace_id: ws.to_string() })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].role, "admin");

        assert_eq!(svc.do_get(token(&first.token)).await.unwrap().status, "revoked");
        assert_eq!(svc.do_get(token(&second.token)).await.unwrap().status, "pending");
        assert_eq!(mailer.sent_to("bob@example.com").len(), 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_inviting_existing_member_rejected(pool: PgPool) {
        let (svc, _) = service(&pool);
        let alice = create_user(&pool, "alice@example.com", true).await;
        let bob = create_user(&pool, "bob@example.com", true).await;
        let ws = create_workspace(&pool, &alice, "acme").await;
        add_member(&pool, ws, bob.user_id, Role::Member).await;

        let err = svc.do_create(&alice, invite(ws, "BOB@example.com", "member")).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_member_cannot_invite(pool: PgPool) {
        let (svc, _) = service(&pool);
        let alice = create_user(&pool, "alice@example.com", true).await;
        let carol = create_user(&pool, "carol@example.com", true).await;
        let ws = create_workspace(&pool, &alice, "acme").await;
        add_member(&pool, ws, carol.user_id, Role::Member).await;

        let err = svc.do_create(&carol, invite(ws, "bob@example.com", "member")).await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_accept_requires_verified_email(pool: PgPool) {
        let (svc, _) = service(&pool);
        let alice = create_user(&pool, "alice@example.com", true).await;
        let ws = create_workspace(&pool, &alice, "acme").await;
        let created = svc.do_create(&alice, invite(ws, "bob@example.com", "admin")).await.unwrap();

        // Registered with the invited address but never proved the mailbox
        let squatter = create_user(&pool, "bob@example.com", false).await;
        let err = svc.do_accept(&squatter, token(&created.token)).await.unwrap_err();
        assert!(matches!(err, AppError::FailedPrecondition(ref msg) if msg == "Verify your email first"));
        assert_eq!(role_of(&pool, ws, squatter.user_id).await, None);

        let err = svc.do_decline(&squatter, token(&created.token)).await.unwrap_err();
        assert!(matches!(err, AppError::FailedPrecondition(_)));
        assert!(svc.do_list_mine(&squatter).await.unwrap().is_empty());
        assert_eq!(svc.do_get(token(&created.token)).await.unwrap().status, "pending");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_accept_adds_membership(pool: PgPool) {
        let (svc, _) = service(&pool);
        let alice = create_user(&pool, "alice@example.com", true).await;
        let bob = create_user(&pool, "bob@example.com", true).await;
        let ws = create_workspace(&pool, &alice, "acme").await;
        let created = svc.do_create(&alice, invite(ws, "bob@example.com", "admin")).await.unwrap();

        assert_eq!(svc.do_list_mine(&bob).await.unwrap().len(), 1);

        let accepted = svc.do_accept(&bob, token(&created.token)).await.unwrap();
        assert_eq!(accepted.role, "admin");
        assert_eq!(accepted.workspace_slug, "acme");
        assert_eq!(role_of(&pool, ws, bob.user_id).await.as_deref(), Some("admin"));

        // A used token cannot be accepted again
        let err = svc.do_accept(&bob, token(&created.token)).await.unwrap_err();
        assert!(matches!(err, AppError::FailedPrecondition(_)));
        assert!(svc.do_list_mine(&bob).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_accept_keeps_existing_role(pool: PgPool) {
        let (svc, _) = service(&pool);
        let alice = create_user(&pool, "alice@example.com", true).await;
        let bob = create_user(&pool, "bob@example.com", true).await;
        let ws = create_workspace(&pool, &alice, "acme").await;
        let created = svc.do_create(&alice, invite(ws, "bob@example.com", "member")).await.unwrap();

        // Joined as admin by another path while the invitation was pending
        add_member(&pool, ws, bob.user_id, Role::Admin).await;

        let accepted = svc.do_accept(&bob, token(&created.token)).await.unwrap();
        assert_eq!(accepted.role, "admin");
        assert_eq!(role_of(&pool, ws, bob.user_id).await.as_deref(), Some("admin"));
        assert_eq!(svc.do_get(token(&created.token)).await.unwrap().status, "accepted");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_other_account_cannot_accept(pool: PgPool) {
        let (svc, _) = service(&pool);
        let alice = create_user(&pool, "alice@example.com", true).await;
        let eve = create_user(&pool, "eve@example.com", true).await;
        let ws = create_workspace(&pool, &alice, "acme").await;
        let created = svc.do_create(&alice, invite(ws, "bob@example.com", "member")).await.unwrap();

        let err = svc.do_accept(&eve, token(&created.token)).await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_decline_and_revoke(pool: PgPool) {
        let (svc, _) = service(&pool);
        let alice = create_user(&pool, "alice@example.com", true).await;
        let bob = create_user(&pool, "bob@example.com", true).await;
        let ws = create_workspace(&pool, &alice, "acme").await;

        let first = svc.do_create(&alice, invite(ws, "bob@example.com", "member")).await.unwrap();
        svc.do_decline(&bob, token(&first.token)).await.unwrap();
        assert_eq!(svc.do_get(token(&first.token)).await.unwrap().status, "declined");
        assert_eq!(role_of(&pool, ws, bob.user_id).await, None);

        let second = svc.do_create(&alice, invite(ws, "carol@example.com", "member")).await.unwrap();
        let id = second.invitation.unwrap().id;
        svc.do_revoke(&alice, InvitationIdRequest { invitation_id: id.clone() }).await.unwrap();
        assert_eq!(svc.do_get(token(&second.token)).await.unwrap().status, "revoked");

        let err = svc
            .do_revoke(&alice, InvitationIdRequest { invitation_id: id })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FailedPrecondition(_)));
    }
}
