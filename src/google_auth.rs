use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::http_client::HttpClient;

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

const ALLOWED_ISSUERS: &[&str] = &["accounts.google.com", "https://accounts.google.com"];

const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Identity asserted by a verified Google ID token
#[derive(Debug, Clone)]
pub struct GoogleIdentity {
    pub sub: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleIdTokenClaims {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkKey {
    kid: String,
    n: String,
    e: String,
    kty: String,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

struct JwksCache {
    keys: HashMap<String, JwkKey>,
    fetched_at: Instant,
}

impl JwksCache {
    fn fresh_key(&self, kid: &str) -> Option<&JwkKey> {
        if self.fetched_at.elapsed() < JWKS_CACHE_TTL {
            self.keys.get(kid)
        } else {
            None
        }
    }
}

/// Verifies Google ID tokens against Google's published keys, cached for an hour.
#[derive(Clone)]
pub struct GoogleTokenVerifier {
    http_client: Arc<HttpClient>,
    client_id: String,
    cache: Arc<RwLock<Option<JwksCache>>>,
}

impl GoogleTokenVerifier {
    pub fn new(client_id: String, http_client: Arc<HttpClient>) -> Self {
        Self {
            http_client,
            client_id,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn verify(&self, id_token: &str) -> AppResult<GoogleIdentity> {
        let header = decode_header(id_token).map_err(|e| unauthenticated(format!("Invalid token header: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| unauthenticated("Token missing kid header".to_string()))?;

        let decoding_key = self.get_decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(ALLOWED_ISSUERS);

        let claims = decode::<GoogleIdTokenClaims>(id_token, &decoding_key, &validation)
            .map_err(|e| unauthenticated(format!("Token validation failed: {}", e)))?
            .claims;

        let email = claims
            .email
            .ok_or_else(|| unauthenticated("Token missing email claim".to_string()))?;
        if claims.email_verified != Some(true) {
            return Err(unauthenticated("Email not verified".to_string()));
        }

        Ok(GoogleIdentity {
            sub: claims.sub,
            email,
            name: claims.name,
            picture: claims.picture,
        })
    }

    async fn get_decoding_key(&self, kid: &str) -> AppResult<DecodingKey> {
        {
            let cache = self.cache.read().await;
            if let Some(key) = cache.as_ref().and_then(|c| c.fresh_key(kid)) {
                return jwk_to_decoding_key(key);
            }
        }

        let jwks: JwksResponse = self
            .http_client
            .get_json(GOOGLE_JWKS_URL)
            .await
            .map_err(|e| AppError::Unavailable(format!("Failed to fetch Google keys: {}", e)))?;

        let keys: HashMap<String, JwkKey> = jwks
            .keys
            .into_iter()
            .map(|key| (key.kid.clone(), key))
            .collect();

        let decoding_key = keys
            .get(kid)
            .ok_or_else(|| unauthenticated(format!("Key with kid '{}' not found", kid)))
            .and_then(jwk_to_decoding_key)?;

        *self.cache.write().await = Some(JwksCache {
            keys,
            fetched_at: Instant::now(),
        });

        Ok(decoding_key)
    }
}

fn unauthenticated(msg: String) -> AppError {
    AppError::Unauthenticated(format!("Google auth failed: {}", msg))
}

fn jwk_to_decoding_key(key: &JwkKey) -> AppResult<DecodingKey> {
    if key.kty != "RSA" {
        return Err(unauthenticated(format!("Unsupported key type: {}", key.kty)));
    }
    DecodingKey::from_rsa_components(&key.n, &key.e)
        .map_err(|e| unauthenticated(format!("Failed to create decoding key: {}", e)))
}
