use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Access token claims. `sid` names the row in `sessions` backing this token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub sid: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::Unauthenticated("Malformed token subject".to_string()))
    }

    pub fn session_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sid)
            .map_err(|_| AppError::Unauthenticated("Malformed token session".to_string()))
    }
}

/// Issues and verifies HS256 access tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    access_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<String>, access_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            access_ttl,
        }
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        session_id: Uuid,
    ) -> AppResult<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let exp = now + self.access_ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            sid: session_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("JWT error: {}", e)))?;
        Ok((token, exp))
    }

    /// Verifies signature and expiry.
    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("Token rejected: {}", e);
            AppError::Unauthenticated("Invalid or expired token".to_string())
        })
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_ttl", &self.access_ttl)
            .finish_non_exhaustive()
    }
}
