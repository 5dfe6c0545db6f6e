use thiserror::Error;
use tonic::Status;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Too many requests: {0}")]
    RateLimited(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Maps a unique-constraint violation to `AlreadyExists` with the given message,
    /// any other database error stays a database error.
    pub fn unique_or_database(err: sqlx::Error, message: &str) -> Self {
        if is_unique_violation(&err) {
            AppError::AlreadyExists(message.to_string())
        } else {
            AppError::Database(err)
        }
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                Status::internal("Database error")
            }
            AppError::NotFound(msg) => Status::not_found(msg),
            AppError::InvalidInput(msg) => Status::invalid_argument(msg),
            AppError::PermissionDenied(msg) => Status::permission_denied(msg),
            AppError::Unauthenticated(msg) => Status::unauthenticated(msg),
            AppError::AlreadyExists(msg) => Status::already_exists(msg),
            AppError::FailedPrecondition(msg) => Status::failed_precondition(msg),
            AppError::RateLimited(msg) => Status::resource_exhausted(msg),
            AppError::Unavailable(msg) => Status::unavailable(msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                Status::internal(msg)
            }
            AppError::Config(msg) => Status::internal(format!("Configuration error: {}", msg)),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
