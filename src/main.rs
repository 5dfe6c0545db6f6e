use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Duration;
use tenantry::config::Config;
use tenantry::db::{create_pool, run_migrations};
use tenantry::google_auth::GoogleTokenVerifier;
use tenantry::http_client::HttpClient;
use tenantry::mailer::{LogMailer, Mailer, WebhookMailer};
use tenantry::middleware::AuthLayer;
use tenantry::proto::auth::auth_service_server::AuthServiceServer;
use tenantry::proto::health::health_server::HealthServer;
use tenantry::proto::invitation::invitation_service_server::InvitationServiceServer;
use tenantry::proto::member::member_service_server::MemberServiceServer;
use tenantry::proto::user::user_service_server::UserServiceServer;
use tenantry::proto::workspace::workspace_service_server::WorkspaceServiceServer;
use tenantry::services::{
    AuthServiceImpl, HealthServiceImpl, InvitationServiceImpl, MemberServiceImpl,
    UserServiceImpl, WorkspaceServiceImpl,
};
use tenantry::session::TokenIssuer;

use tonic::transport::Server;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tenantry=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting tenantry gRPC server...");
    tracing::info!("Connecting to database...");

    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    if config.run_migrations {
        run_migrations(&pool).await?;
        tracing::info!("Migrations applied");
    }

    let tokens = TokenIssuer::new(
        config.jwt_secret.clone(),
        Duration::minutes(config.access_token_ttl_minutes),
    );
    let http_client = Arc::new(HttpClient::new());

    let mailer: Arc<dyn Mailer> = match &config.mail_webhook_url {
        Some(url) => {
            tracing::info!("Delivering mail through webhook {}", url);
            Arc::new(WebhookMailer::new(url.clone(), http_client.clone()))
        }
        None => {
            tracing::info!("MAIL_WEBHOOK_URL not set, outgoing mail is only logged");
            Arc::new(LogMailer)
        }
    };

    let google_verifier = match &config.google_client_id {
        Some(client_id) => Some(GoogleTokenVerifier::new(client_id.clone(), http_client.clone())),
        None => {
            tracing::info!("GOOGLE_CLIENT_ID not set, Google sign-in disabled");
            None
        }
    };

    let auth_service = AuthServiceImpl::new(
        pool.clone(),
        &config,
        tokens.clone(),
        google_verifier,
        mailer.clone(),
    );
    let user_service = UserServiceImpl::new(pool.clone());
    let workspace_service = WorkspaceServiceImpl::new(pool.clone());
    let member_service = MemberServiceImpl::new(pool.clone());
    let invitation_service = InvitationServiceImpl::new(pool.clone(), &config, mailer);
    let health_service = HealthServiceImpl::new();

    // CORS layer for gRPC-Web
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any)
        .expose_headers(Any);

    let addr: SocketAddr = config.server_addr().parse()?;
    tracing::info!("Listening on {}", addr);

    Server::builder()
        .accept_http1(true) // Required for gRPC-Web
        .layer(TraceLayer::new_for_grpc())
        .layer(cors)
        .layer(tonic_web::GrpcWebLayer::new())
        .layer(AuthLayer::new(pool.clone(), tokens))
        .add_service(AuthServiceServer::new(auth_service))
        .add_service(UserServiceServer::new(user_service))
        .add_service(WorkspaceServiceServer::new(workspace_service))
        .add_service(MemberServiceServer::new(member_service))
        .add_service(InvitationServiceServer::new(invitation_service))
        .add_service(HealthServer::new(health_service))
        .serve(addr)
        .await?;

    Ok(())
}
