// Bearer-token authentication: HS256 JWTs bound to one issuer and audience

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::instrument;

use crate::error::{AppError, AppResult};

/// Clock skew tolerated on `exp`/`nbf`, in seconds
pub const JWT_LEEWAY_SECS: u64 = 5;

/// JWT claims accepted by both services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub aud: String,
    pub iss: String,
}

/// The caller identity attached to every authenticated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub subject: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

impl JwtSettings {
    /// Sign a token for `subject`. Used by internal callers and tests.
    pub fn issue_token(&self, subject: &str, ttl: Duration) -> AppResult<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AppError::Internal(e.to_string()))?
            .as_secs();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + ttl.as_secs(),
            aud: self.audience.clone(),
            iss: self.issuer.clone(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("cannot sign token: {}", e)))
    }
}

#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway", &self.validation.leeway)
            .finish()
    }
}

impl JwtValidator {
    pub fn new(settings: &JwtSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[settings.issuer.as_str()]);
        validation.set_audience(&[settings.audience.as_str()]);
        validation.leeway = JWT_LEEWAY_SECS;

        Self {
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            validation,
        }
    }

    #[instrument(skip(self, token))]
    pub fn validate_token(&self, token: &str) -> AppResult<AuthenticatedUser> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;
        Ok(AuthenticatedUser {
            subject: token_data.claims.sub,
        })
    }

    /// Validate the value of an `Authorization` header
    pub fn validate_header(&self, header: Option<&str>) -> AppResult<AuthenticatedUser> {
        let header =
            header.ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| AppError::Unauthorized("Expected a bearer token".to_string()))?;
        self.validate_token(token.trim())
    }
}
