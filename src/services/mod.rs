pub mod auth_service;
pub mod health_service;
pub mod invitation_service;
pub mod member_service;
pub mod user_service;
pub mod workspace_service;

pub use auth_service::AuthServiceImpl;
pub use health_service::HealthServiceImpl;
pub use invitation_service::InvitationServiceImpl;
pub use member_service::MemberServiceImpl;
pub use user_service::UserServiceImpl;
pub use workspace_service::WorkspaceServiceImpl;
