pub mod app_user;
pub mod invitation;
pub mod password_credential;
pub mod role;
pub mod workspace;

pub use app_user::*;
pub use invitation::*;
pub use password_credential::*;
pub use role::*;
pub use workspace::*;
