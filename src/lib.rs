pub mod authz;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod google_auth;
pub mod http_client;
pub mod mailer;
pub mod middleware;
pub mod models;
pub mod proto;
pub mod services;
pub mod session;
pub mod validation;

pub use config::Config;
pub use error::{AppError, AppResult};

#[cfg(test)]
pub(crate) mod test_support;
