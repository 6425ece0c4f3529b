/// Token Codec
///
/// Signs and verifies expiring claim sets with a shared HMAC secret.

use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

use crate::auth::claims::{AccessClaims, RefreshClaims};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};
use crate::models::User;

/// Why a token was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum TokenError {
    Expired,
    Invalid(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Expired => write!(f, "token has expired"),
            TokenError::Invalid(reason) => write!(f, "invalid token: {}", reason),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::ExpiredToken,
            TokenError::Invalid(_) => AuthError::InvalidToken,
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::Auth(err.into())
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &str, algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// # Errors
    /// Returns error if the secret is empty or the algorithm is not HMAC
    pub fn from_settings(settings: &JwtSettings) -> Result<Self, ConfigError> {
        if settings.secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.secret".to_string()));
        }
        Ok(Self::new(&settings.secret, settings.algorithm()?))
    }

    /// Sign a claim set
    ///
    /// # Errors
    /// Returns error if serialization or signing fails
    pub fn encode<C: Serialize>(&self, claims: &C) -> Result<String, AppError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify signature and expiry, then extract the claim set
    ///
    /// # Errors
    /// `TokenError::Expired` once `exp` has passed, `TokenError::Invalid`
    /// for a bad signature, a foreign algorithm, or a payload of the wrong shape
    pub fn decode<C: DeserializeOwned>(&self, token: &str) -> Result<C, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        // Expiry is exact; no grace period past the configured TTL
        validation.leeway = 0;

        decode::<C>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }

    pub fn issue_access_token(&self, user: &User, ttl: Duration) -> Result<String, AppError> {
        self.encode(&AccessClaims::new(user, ttl))
    }

    pub fn issue_refresh_token(
        &self,
        user_id: i64,
        ttl: Duration,
    ) -> Result<(String, RefreshClaims), AppError> {
        let claims = RefreshClaims::new(user_id, ttl);
        let token = self.encode(&claims)?;
        Ok((token, claims))
    }
}
