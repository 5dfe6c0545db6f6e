use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::header::HeaderValue;
use http::Request as HttpRequest;
use http::Response as HttpResponse;
use http_body_util::combinators::UnsyncBoxBody;
use sqlx::PgPool;
use tonic::Status;
use tower::{Layer, Service};
use uuid::Uuid;

use crate::db::session::is_session_active;
use crate::error::AppError;
use crate::session::TokenIssuer;

/// Caller identity injected by the auth middleware into request extensions.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
}

impl AuthenticatedUser {
    pub fn from_request<T>(request: &tonic::Request<T>) -> Result<Self, Status> {
        request
            .extensions()
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| Status::unauthenticated("Authentication required"))
    }
}

/// Procedures reachable without a session
const PUBLIC_PATHS: &[&str] = &[
    "/tenantry.auth.AuthService/SignUp",
    "/tenantry.auth.AuthService/SignIn",
    "/tenantry.auth.AuthService/SignInWithGoogle",
    "/tenantry.auth.AuthService/RequestOtp",
    "/tenantry.auth.AuthService/VerifyOtp",
    "/tenantry.auth.AuthService/RequestPasswordReset",
    "/tenantry.auth.AuthService/ResetPassword",
    "/tenantry.auth.AuthService/RefreshSession",
    "/tenantry.auth.AuthService/ValidateToken",
    "/tenantry.invitation.InvitationService/GetInvitation",
    "/grpc.health.v1.Health/Check",
    "/grpc.health.v1.Health/Watch",
];

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| path == *p)
}

#[derive(Clone)]
pub struct AuthLayer {
    pool: PgPool,
    tokens: TokenIssuer,
}

impl AuthLayer {
    pub fn new(pool: PgPool, tokens: TokenIssuer) -> Self {
        Self { pool, tokens }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            pool: self.pool.clone(),
            tokens: self.tokens.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    pool: PgPool,
    tokens: TokenIssuer,
}

type BoxBody = UnsyncBoxBody<bytes::Bytes, Status>;

fn grpc_status_response(status: Status) -> HttpResponse<BoxBody> {
    let mut response = HttpResponse::new(UnsyncBoxBody::default());
    response.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("application/grpc"),
    );
    response
        .headers_mut()
        .insert("grpc-status", HeaderValue::from(status.code() as i32));
    if !status.message().is_empty() {
        if let Ok(val) = HeaderValue::from_str(status.message()) {
            response.headers_mut().insert("grpc-message", val);
        }
    }
    response
}

fn bearer_token<B>(req: &HttpRequest<B>) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl<S, ReqBody> Service<HttpRequest<ReqBody>> for AuthMiddleware<S>
where
    S: Service<HttpRequest<ReqBody>, Response = HttpResponse<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = HttpResponse<BoxBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: HttpRequest<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();
        std::mem::swap(&mut self.inner, &mut inner);

        let pool = self.pool.clone();
        let tokens = self.tokens.clone();

        Box::pin(async move {
            let path = req.uri().path().to_string();

            if is_public_path(&path) {
                return inner.call(req).await;
            }

            let Some(token) = bearer_token(&req).map(str::to_string) else {
                tracing::debug!("Rejected {}: no bearer token", path);
                return Ok(grpc_status_response(Status::unauthenticated(
                    "Authentication required",
                )));
            };

            let user = match authenticate(&pool, &tokens, &token).await {
                Ok(user) => user,
                Err(err) => {
                    tracing::debug!("Rejected {}: {}", path, err);
                    return Ok(grpc_status_response(err.into()));
                }
            };

            req.extensions_mut().insert(user);
            inner.call(req).await
        })
    }
}

/// Verifies the access token and checks its session is still live.
async fn authenticate(
    pool: &PgPool,
    tokens: &TokenIssuer,
    token: &str,
) -> Result<AuthenticatedUser, AppError> {
    let claims = tokens.verify(token)?;
    let user_id = claims.user_id()?;
    let session_id = claims.session_id()?;

    if !is_session_active(pool, session_id).await? {
        return Err(AppError::Unauthenticated(
            "Session has been revoked or has expired".to_string(),
        ));
    }

    Ok(AuthenticatedUser {
        user_id,
        email: claims.email,
        session_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::convert::Infallible;

    fn layer() -> AuthLayer {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        AuthLayer::new(pool, TokenIssuer::new("test-secret", Duration::minutes(5)))
    }

    async fn ok_handler(_req: HttpRequest<()>) -> Result<HttpResponse<BoxBody>, Infallible> {
        Ok(HttpResponse::new(UnsyncBoxBody::default()))
    }

    fn grpc_status(resp: &HttpResponse<BoxBody>) -> Option<String> {
        resp.headers()
            .get("grpc-status")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/tenantry.auth.AuthService/SignIn"));
        assert!(is_public_path("/grpc.health.v1.Health/Check"));
        assert!(!is_public_path("/tenantry.auth.AuthService/SignOut"));
        assert!(!is_public_path("/tenantry.workspace.WorkspaceService/CreateWorkspace"));
    }

    #[test]
    fn test_bearer_token_extraction() {
        let req = HttpRequest::builder()
            .header("authorization", "Bearer abc.def")
            .body(())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("abc.def"));

        let req = HttpRequest::builder()
            .header("authorization", "Basic xyz")
            .body(())
            .unwrap();
        assert_eq!(bearer_token(&req), None);
    }

    #[tokio::test]
    async fn test_public_path_passes_without_token() {
        let mut svc = layer().layer(tower::service_fn(ok_handler));
        let req = HttpRequest::builder()
            .uri("/tenantry.auth.AuthService/SignIn")
            .body(())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(grpc_status(&resp), None);
    }

    #[tokio::test]
    async fn test_protected_path_requires_token() {
        let mut svc = layer().layer(tower::service_fn(ok_handler));
        let req = HttpRequest::builder()
            .uri("/tenantry.workspace.WorkspaceService/ListMyWorkspaces")
            .body(())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(
            grpc_status(&resp),
            Some((tonic::Code::Unauthenticated as i32).to_string())
        );
    }

    #[tokio::test]
    async fn test_protected_path_rejects_bad_token() {
        let mut svc = layer().layer(tower::service_fn(ok_handler));
        let req = HttpRequest::builder()
            .uri("/tenantry.member.MemberService/ListMembers")
            .header("authorization", "Bearer not-a-jwt")
            .body(())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(
            grpc_status(&resp),
            Some((tonic::Code::Unauthenticated as i32).to_string())
        );
    }
}
