use sqlx::PgPool;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthenticatedUser;
use crate::models::AppUser;
use crate::proto::common::Empty;
use crate::proto::user::user_service_server::UserService;
use crate::proto::user::{UpdateProfileRequest, UserResponse};
use crate::validation::{validate_display_name, validate_url};

const USER_COLUMNS: &str = "id, email, display_name, avatar_url, email_verified_at, created_at";

pub struct UserServiceImpl {
    pool: PgPool,
}

impl UserServiceImpl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn do_get_me(&self, user_id: Uuid) -> AppResult<AppUser> {
        sqlx::query_as::<_, AppUser>(&format!(
            "SELECT {} FROM app_users WHERE id = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    async fn do_update_profile(&self, user_id: Uuid, req: UpdateProfileRequest) -> AppResult<AppUser> {
        let display_name = validate_display_name(&req.display_name)?;
        let avatar_url = validate_url(&req.avatar_url)?;

        // An empty display name keeps the current one
        sqlx::query_as::<_, AppUser>(&format!(
            "UPDATE app_users
             SET display_name = COALESCE(NULLIF($2, ''), display_name),
                 avatar_url = $3,
                 updated_at = NOW()
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(&display_name)
        .bind(&avatar_url)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}

#[tonic::async_trait]
impl UserService for UserServiceImpl {
    async fn get_me(&self, request: Request<Empty>) -> Result<Response<UserResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let profile = self.do_get_me(user.user_id).await?;
        Ok(Response::new(UserResponse {
            user: Some(profile.to_proto()),
        }))
    }

    async fn update_profile(
        &self,
        request: Request<UpdateProfileRequest>,
    ) -> Result<Response<UserResponse>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        let profile = self
            .do_update_profile(user.user_id, request.into_inner())
            .await?;
        tracing::info!("User {} updated their profile", user.user_id);
        Ok(Response::new(UserResponse {
            user: Some(profile.to_proto()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_user;

    #[sqlx::test(migrations = "./migrations")]
    async fn test_update_profile(pool: PgPool) {
        let svc = UserServiceImpl::new(pool.clone());
        let jane = create_user(&pool, "jane@example.com", true).await;

        let updated = svc
            .do_update_profile(
                jane.user_id,
                UpdateProfileRequest {
                    display_name: "  Jane Doe ".to_string(),
                    avatar_url: "https://example.com/jane.png".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.display_name, "Jane Doe");
        assert_eq!(updated.avatar_url.as_deref(), Some("https://example.com/jane.png"));

        // A blank name keeps the current one, a blank avatar clears it
        let updated = svc
            .do_update_profile(jane.user_id, UpdateProfileRequest::default())
            .await
            .unwrap();
        assert_eq!(updated.display_name, "Jane Doe");
        assert_eq!(updated.avatar_url, None);

        let me = svc.do_get_me(jane.user_id).await.unwrap();
        assert_eq!(me.email, "jane@example.com");
        assert!(me.email_verified_at.is_some());
    }
}
