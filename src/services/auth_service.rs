use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::{PgConnection, PgPool};
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::config::Config;
use crate::crypto::{generate_otp_code, generate_secret_token, hash_password, hash_token, verify_password};
use crate::db::session::{insert_session, is_session_active, revoke_all_sessions, revoke_session};
use crate::error::{AppError, AppResult};
use crate::google_auth::GoogleTokenVerifier;
use crate::mailer::{otp_email, password_reset_email, Mailer};
use crate::middleware::AuthenticatedUser;
use crate::models::PasswordCredential;
use crate::proto::auth::auth_service_server::AuthService;
use crate::proto::auth::{
    AuthResponse, RefreshSessionRequest, RequestOtpRequest, RequestPasswordResetRequest,
    ResetPasswordRequest, SignInRequest, SignInWithGoogleRequest, SignUpRequest,
    ValidateTokenRequest, ValidateTokenResponse, VerifyOtpRequest,
};
use crate::proto::common::Empty;
use crate::session::TokenIssuer;
use crate::validation::{normalize_email, validate_display_name, validate_password};

const PURPOSE_OTP: &str = "otp";
const PURPOSE_PASSWORD_RESET: &str = "password_reset";
const OTP_MAX_ATTEMPTS: i32 = 5;
const OTP_RESEND_COOLDOWN_SECONDS: i64 = 60;
/// Wrong guesses allowed per address per hour, summed over all codes
const OTP_MAX_FAILURES_PER_HOUR: i64 = 15;
const PASSWORD_RESET_TTL_MINUTES: i64 = 60;

fn invalid_credentials() -> AppError {
    AppError::Unauthenticated("Invalid credentials".to_string())
}

pub struct AuthServiceImpl {
    pool: PgPool,
    tokens: TokenIssuer,
    refresh_ttl: Duration,
    otp_ttl_minutes: i64,
    app_base_url: String,
    google_verifier: Option<GoogleTokenVerifier>,
    mailer: Arc<dyn Mailer>,
}

/// Marks an account verified once someone proves control of its mailbox. If it
/// was unverified, whoever registered the address without proving it loses the
/// password and every session they opened.
async fn claim_mailbox(conn: &mut PgConnection, user_id: Uuid) -> AppResult<()> {
    let verified: bool = sqlx::query_scalar(
        "SELECT email_verified_at IS NOT NULL FROM app_users WHERE id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    if verified {
        return Ok(());
    }

    let dropped = sqlx::query("DELETE FROM password_credentials WHERE app_user_id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    let revoked = revoke_all_sessions(&mut *conn, user_id).await?;

    sqlx::query("UPDATE app_users SET email_verified_at = NOW(), updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    if dropped > 0 || revoked > 0 {
        tracing::warn!(
            "Unverified account {} claimed by mailbox owner: dropped password, revoked {} sessions",
            user_id,
            revoked
        );
    }
    Ok(())
}

impl AuthServiceImpl {
    pub fn new(
        pool: PgPool,
        config: &Config,
        tokens: TokenIssuer,
        google_verifier: Option<GoogleTokenVerifier>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            pool,
            tokens,
            refresh_ttl: Duration::days(config.refresh_token_ttl_days),
            otp_ttl_minutes: config.otp_ttl_minutes,
            app_base_url: config.app_base_url.clone(),
            google_verifier,
            mailer,
        }
    }

    /// Creates a session row and returns the access/refresh token pair for it.
    async fn open_session(&self, user_id: Uuid, email: &str, provider: &str) -> AppResult<AuthResponse> {
        let refresh_token = generate_secret_token();
        let expires_at = Utc::now() + self.refresh_ttl;

        let session_id = insert_session(
            &self.pool,
            user_id,
            &hash_token(&refresh_token),
            provider,
            expires_at,
        )
        .await?;

        sqlx::query("UPDATE app_users SET last_sign_in_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let (access_token, exp) = self.tokens.issue(user_id, email, session_id)?;
        tracing::info!("Opened {} session {} for user {}", provider, session_id, user_id);

        Ok(AuthResponse {
            access_token,
            refresh_token,
            expires_at: exp.to_rfc3339(),
            user_id: user_id.to_string(),
        })
    }

    async fn do_sign_up(&self, req: SignUpRequest) -> AppResult<AuthResponse> {
        let email = normalize_email(&req.email)?;
        validate_password(&req.password)?;
        let display_name = validate_display_name(&req.display_name)?;
        let display_name = if display_name.is_empty() {
            email.clone()
        } else {
            display_name
        };

        let password_hash = hash_password(&req.password)?;

        let mut tx = self.pool.begin().await?;

        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO app_users (email, display_name) VALUES ($1, $2) RETURNING id",
        )
        .bind(&email)
        .bind(&display_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::unique_or_database(e, "An account with this email already exists"))?;

        sqlx::query("INSERT INTO password_credentials (app_user_id, password_hash) VALUES ($1, $2)")
            .bind(user_id)
            .bind(&password_hash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!("Registered user {} ({})", user_id, email);
        self.open_session(user_id, &email, "password").await
    }

    async fn do_sign_in(&self, req: SignInRequest) -> AppResult<AuthResponse> {
        let email = normalize_email(&req.email).map_err(|_| invalid_credentials())?;
        if req.password.is_empty() {
            return Err(invalid_credentials());
        }

        let credential = sqlx::query_as::<_, PasswordCredential>(
            "SELECT pc.app_user_id, pc.password_hash
             FROM app_users u
             JOIN password_credentials pc ON pc.app_user_id = u.id
             WHERE lower(u.email) = $1 AND u.deleted_at IS NULL",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let PasswordCredential { app_user_id: user_id, password_hash } =
            credential.ok_or_else(invalid_credentials)?;
        if !verify_password(&req.password, &password_hash)? {
            tracing::warn!("Failed password sign-in for user {}", user_id);
            return Err(invalid_credentials());
        }

        self.open_session(user_id, &email, "password").await
    }

    async fn do_sign_in_with_google(&self, req: SignInWithGoogleRequest) -> AppResult<AuthResponse> {
        let verifier = self.google_verifier.as_ref().ok_or_else(|| {
            AppError::Unavailable("Google sign-in not configured (GOOGLE_CLIENT_ID not set)".to_string())
        })?;
        if req.id_token.is_empty() {
            return Err(AppError::InvalidInput("id_token is required".to_string()));
        }

        let identity = verifier.verify(&req.id_token).await?;
        let email = normalize_email(&identity.email)?;

        let linked: Option<Uuid> = sqlx::query_scalar(
            "SELECT u.id
             FROM oauth_accounts oa
             JOIN app_users u ON u.id = oa.app_user_id
             WHERE oa.provider = 'google' AND oa.provider_account_id = $1
               AND u.deleted_at IS NULL",
        )
        .bind(&identity.sub)
        .fetch_optional(&self.pool)
        .await?;

        let user_id = match linked {
            Some(id) => id,
            None => {
                let mut tx = self.pool.begin().await?;

                // Google verified the address, so an existing account with it is linked
                let existing: Option<Uuid> = sqlx::query_scalar(
                    "SELECT id FROM app_users WHERE lower(email) = $1 AND deleted_at IS NULL",
                )
                .bind(&email)
                .fetch_optional(&mut *tx)
                .await?;

                let id = match existing {
                    Some(id) => {
                        claim_mailbox(&mut *tx, id).await?;
                        sqlx::query(
                            "UPDATE app_users SET avatar_url = COALESCE(avatar_url, $2), updated_at = NOW()
                             WHERE id = $1",
                        )
                        .bind(id)
                        .bind(identity.picture.as_deref())
                        .execute(&mut *tx)
                        .await?;
                        id
                    }
                    None => {
                        let display_name = identity.name.as_deref().unwrap_or(&email);
                        sqlx::query_scalar(
                            "INSERT INTO app_users (email, display_name, avatar_url, email_verified_at)
                             VALUES ($1, $2, $3, NOW())
                             RETURNING id",
                        )
                        .bind(&email)
                        .bind(display_name)
                        .bind(identity.picture.as_deref())
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(|e| AppError::unique_or_database(e, "An account with this email already exists"))?
                    }
                };

                sqlx::query(
                    "INSERT INTO oauth_accounts (app_user_id, provider, provider_account_id)
                     VALUES ($1, 'google', $2)",
                )
                .bind(id)
                .bind(&identity.sub)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::unique_or_database(e, "Google account already linked"))?;

                tx.commit().await?;
                tracing::info!("Linked Google account for {} to user {}", email, id);
                id
            }
        };

        self.open_session(user_id, &email, "google").await
    }

    async fn do_request_otp(&self, req: RequestOtpRequest) -> AppResult<()> {
        let email = normalize_email(&req.email)?;
        let code = generate_otp_code();
        let expires_at = Utc::now() + Duration::minutes(self.otp_ttl_minutes);

        let mut tx = self.pool.begin().await?;

        // Serializes issuance per address
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&email)
            .execute(&mut *tx)
            .await?;

        let (recent_code, failures): (bool, i64) = sqlx::query_as(
            "SELECT
                COALESCE(BOOL_OR(consumed_at IS NULL AND created_at > NOW() - make_interval(secs => $3)), false),
                COALESCE(SUM(attempts), 0)::BIGINT
             FROM one_time_tokens
             WHERE email = $1 AND purpose = $2 AND created_at > NOW() - INTERVAL '1 hour'",
        )
        .bind(&email)
        .bind(PURPOSE_OTP)
        .bind(OTP_RESEND_COOLDOWN_SECONDS as f64)
        .fetch_one(&mut *tx)
        .await?;

        if failures >= OTP_MAX_FAILURES_PER_HOUR {
            return Err(AppError::RateLimited(
                "Too many failed sign-in codes, try again later".to_string(),
            ));
        }
        if recent_code {
            // The code sent moments ago is still valid
            tracing::debug!("Sign-in code requested again within cooldown");
            return Ok(());
        }

        // Only the most recent code is valid
        sqlx::query(
            "UPDATE one_time_tokens SET consumed_at = NOW()
             WHERE email = $1 AND purpose = $2 AND consumed_at IS NULL",
        )
        .bind(&email)
        .bind(PURPOSE_OTP)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO one_time_tokens (email, purpose, token_hash, expires_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&email)
        .bind(PURPOSE_OTP)
        .bind(hash_token(&code))
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.mailer
            .send(otp_email(&email, &code, self.otp_ttl_minutes))
            .await
    }

    async fn do_verify_otp(&self, req: VerifyOtpRequest) -> AppResult<AuthResponse> {
        let email = normalize_email(&req.email)?;
        let code = req.code.trim();
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(AppError::InvalidInput("Code must be 6 digits".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, String, i32)> = sqlx::query_as(
            "SELECT id, token_hash, attempts FROM one_time_tokens
             WHERE email = $1 AND purpose = $2 AND consumed_at IS NULL AND expires_at > NOW()
             ORDER BY created_at DESC
             LIMIT 1
             FOR UPDATE",
        )
        .bind(&email)
        .bind(PURPOSE_OTP)
        .fetch_optional(&mut *tx)
        .await?;

        let expired = || AppError::Unauthenticated("Invalid or expired code".to_string());
        let (otp_id, token_hash, attempts) = row.ok_or_else(expired)?;

        if attempts >= OTP_MAX_ATTEMPTS {
            return Err(expired());
        }

        if hash_token(code) != token_hash {
            sqlx::query("UPDATE one_time_tokens SET attempts = attempts + 1 WHERE id = $1")
                .bind(otp_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Err(expired());
        }

        sqlx::query("UPDATE one_time_tokens SET consumed_at = NOW() WHERE id = $1")
            .bind(otp_id)
            .execute(&mut *tx)
            .await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM app_users WHERE lower(email) = $1 AND deleted_at IS NULL",
        )
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await?;

        let user_id = match existing {
            Some(id) => {
                claim_mailbox(&mut *tx, id).await?;
                id
            }
            None => sqlx::query_scalar(
                "INSERT INTO app_users (email, display_name, email_verified_at)
                 VALUES ($1, $1, NOW())
                 RETURNING id",
            )
            .bind(&email)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::unique_or_database(e, "Account was created concurrently, please retry"))?,
        };

        tx.commit().await?;

        self.open_session(user_id, &email, "otp").await
    }

    async fn do_request_password_reset(&self, req: RequestPasswordResetRequest) -> AppResult<()> {
        let email = normalize_email(&req.email)?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM app_users WHERE lower(email) = $1 AND deleted_at IS NULL)",
        )
        .bind(&email)
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            // Same answer as for a known address
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        }

        let token = generate_secret_token();
        sqlx::query(
            "INSERT INTO one_time_tokens (email, purpose, token_hash, expires_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&email)
        .bind(PURPOSE_PASSWORD_RESET)
        .bind(hash_token(&token))
        .bind(Utc::now() + Duration::minutes(PASSWORD_RESET_TTL_MINUTES))
        .execute(&self.pool)
        .await?;

        self.mailer
            .send(password_reset_email(&email, &self.app_base_url, &token))
            .await
    }

    async fn do_reset_password(&self, req: ResetPasswordRequest) -> AppResult<()> {
        if req.token.is_empty() {
            return Err(AppError::InvalidInput("token is required".to_string()));
        }
        validate_password(&req.new_password)?;
        let password_hash = hash_password(&req.new_password)?;

        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, email FROM one_time_tokens
             WHERE token_hash = $1 AND purpose = $2 AND consumed_at IS NULL AND expires_at > NOW()
             FOR UPDATE",
        )
        .bind(hash_token(&req.token))
        .bind(PURPOSE_PASSWORD_RESET)
        .fetch_optional(&mut *tx)
        .await?;

        let (token_id, email) = row.ok_or_else(|| {
            AppError::NotFound("Invalid or expired password reset link".to_string())
        })?;

        let user_id: Uuid = sqlx::query_scalar(
            "SELECT id FROM app_users WHERE lower(email) = $1 AND deleted_at IS NULL",
        )
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Account no longer exists".to_string()))?;

        sqlx::query(
            "INSERT INTO password_credentials (app_user_id, password_hash) VALUES ($1, $2)
             ON CONFLICT (app_user_id) DO UPDATE SET password_hash = EXCLUDED.password_hash, updated_at = NOW()",
        )
        .bind(user_id)
        .bind(&password_hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE one_time_tokens SET consumed_at = NOW() WHERE id = $1")
            .bind(token_id)
            .execute(&mut *tx)
            .await?;

        // The link proves control of the mailbox; it also marks the address verified
        sqlx::query(
            "UPDATE app_users SET email_verified_at = COALESCE(email_verified_at, NOW()), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let revoked = revoke_all_sessions(&mut *tx, user_id).await?;

        tx.commit().await?;
        tracing::info!("Password reset for user {}, revoked {} sessions", user_id, revoked);
        Ok(())
    }

    async fn do_refresh_session(&self, req: RefreshSessionRequest) -> AppResult<AuthResponse> {
        if req.refresh_token.is_empty() {
            return Err(AppError::InvalidInput("refresh_token is required".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, Uuid, String)> = sqlx::query_as(
            "SELECT s.id, u.id, u.email
             FROM sessions s
             JOIN app_users u ON u.id = s.app_user_id
             WHERE s.refresh_token_hash = $1
               AND s.revoked_at IS NULL AND s.expires_at > NOW()
               AND u.deleted_at IS NULL
             FOR UPDATE OF s",
        )
        .bind(hash_token(&req.refresh_token))
        .fetch_optional(&mut *tx)
        .await?;

        let (session_id, user_id, email) = row.ok_or_else(|| {
            AppError::Unauthenticated("Invalid or expired refresh token".to_string())
        })?;

        // Rotate: the presented refresh token stops working
        let refresh_token = generate_secret_token();
        sqlx::query(
            "UPDATE sessions SET refresh_token_hash = $1, last_refreshed_at = NOW() WHERE id = $2",
        )
        .bind(hash_token(&refresh_token))
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let (access_token, exp) = self.tokens.issue(user_id, &email, session_id)?;
        Ok(AuthResponse {
            access_token,
            refresh_token,
            expires_at: exp.to_rfc3339(),
            user_id: user_id.to_string(),
        })
    }

    async fn do_validate_token(&self, req: ValidateTokenRequest) -> AppResult<ValidateTokenResponse> {
        let claims = match self.tokens.verify(&req.token) {
            Ok(claims) => claims,
            Err(_) => return Ok(ValidateTokenResponse::default()),
        };
        let (Ok(user_id), Ok(session_id)) = (claims.user_id(), claims.session_id()) else {
            return Ok(ValidateTokenResponse::default());
        };

        if !is_session_active(&self.pool, session_id).await? {
            return Ok(ValidateTokenResponse::default());
        }

        Ok(ValidateTokenResponse {
            valid: true,
            user_id: user_id.to_string(),
            email: claims.email,
            session_id: session_id.to_string(),
        })
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn sign_up(&self, request: Request<SignUpRequest>) -> Result<Response<AuthResponse>, Status> {
        Ok(Response::new(self.do_sign_up(request.into_inner()).await?))
    }

    async fn sign_in(&self, request: Request<SignInRequest>) -> Result<Response<AuthResponse>, Status> {
        Ok(Response::new(self.do_sign_in(request.into_inner()).await?))
    }

    async fn sign_in_with_google(
        &self,
        request: Request<SignInWithGoogleRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        Ok(Response::new(
            self.do_sign_in_with_google(request.into_inner()).await?,
        ))
    }

    async fn request_otp(&self, request: Request<RequestOtpRequest>) -> Result<Response<Empty>, Status> {
        self.do_request_otp(request.into_inner()).await?;
        Ok(Response::new(Empty {}))
    }

    async fn verify_otp(&self, request: Request<VerifyOtpRequest>) -> Result<Response<AuthResponse>, Status> {
        Ok(Response::new(self.do_verify_otp(request.into_inner()).await?))
    }

    async fn request_password_reset(
        &self,
        request: Request<RequestPasswordResetRequest>,
    ) -> Result<Response<Empty>, Status> {
        self.do_request_password_reset(request.into_inner()).await?;
        Ok(Response::new(Empty {}))
    }

    async fn reset_password(
        &self,
        request: Request<ResetPasswordRequest>,
    ) -> Result<Response<Empty>, Status> {
        self.do_reset_password(request.into_inner()).await?;
        Ok(Response::new(Empty {}))
    }

    async fn refresh_session(
        &self,
        request: Request<RefreshSessionRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        Ok(Response::new(
            self.do_refresh_session(request.into_inner()).await?,
        ))
    }

    async fn sign_out(&self, request: Request<Empty>) -> Result<Response<Empty>, Status> {
        let user = AuthenticatedUser::from_request(&request)?;
        revoke_session(&self.pool, user.session_id)
            .await
            .map_err(AppError::from)?;
        tracing::info!("User {} signed out of session {}", user.user_id, user.session_id);
        Ok(Response::new(Empty {}))
    }

    async fn validate_token(
        &self,
        request: Request<ValidateTokenRequest>,
    ) -> Result<Response<ValidateTokenResponse>, Status> {
        Ok(Response::new(
            self.do_validate_token(request.into_inner()).await?,
        ))
    }
}
