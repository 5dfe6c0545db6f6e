use argon2::{
    password_hash::{
        rand_core::{OsRng, RngCore},
        SaltString,
    },
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};

/// Number of random bytes in refresh, invitation and reset tokens
const SECRET_TOKEN_BYTES: usize = 32;

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hash error: {}", e)))
}

/// Returns false on mismatch; errors only when the stored hash is unreadable.
pub fn verify_password(password: &str, stored_hash: &str) -> AppResult<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|_| AppError::Internal("Invalid password hash in database".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Opaque URL-safe token handed to the client once. Only its hash is stored.
pub fn generate_secret_token() -> String {
    let mut bytes = [0u8; SECRET_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Six-digit one-time code.
pub fn generate_otp_code() -> String {
    format!("{:06}", OsRng.next_u32() % 1_000_000)
}
