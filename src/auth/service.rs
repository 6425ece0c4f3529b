/// Auth Service
///
/// Orchestrates login, refresh, logout and password changes on top of the
/// token codec, password hashing and the refresh token store. Every method
/// works on the caller's session and leaves commit/rollback to it.

use bcrypt::DEFAULT_COST;
use chrono::{Duration, Utc};

use crate::auth::claims::RefreshClaims;
use crate::auth::jwt::{TokenCodec, TokenError};
use crate::auth::password::{hash_password_with_cost, verify_dummy_password, verify_password};
use crate::auth::refresh_token::{
    find_refresh_token, is_refresh_token_valid, revoke_all_user_tokens, revoke_refresh_token,
    save_refresh_token,
};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};
use crate::models::{User, UserView};
use crate::repository::{RefreshTokenRepository, UserRepository};

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: UserView,
    pub access_token: String,
    pub refresh_token: String,
}

/// Result of a successful refresh
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub user: UserView,
    pub access_token: String,
    /// Replacement refresh token, only when rotation is enabled
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthService {
    codec: TokenCodec,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    rotate_refresh_tokens: bool,
    password_cost: u32,
}

impl AuthService {
    pub fn new(codec: TokenCodec, access_token_ttl: Duration, refresh_token_ttl: Duration) -> Self {
        Self {
            codec,
            access_token_ttl,
            refresh_token_ttl,
            rotate_refresh_tokens: false,
            password_cost: DEFAULT_COST,
        }
    }

    /// # Errors
    /// Missing secret, unsupported algorithm, or a TTL out of range
    pub fn from_settings(settings: &JwtSettings) -> Result<Self, ConfigError> {
        let codec = TokenCodec::from_settings(settings)?;
        Ok(Self::new(codec, settings.access_token_ttl()?, settings.refresh_token_ttl()?)
            .with_rotation(settings.rotate_refresh_tokens))
    }

    pub fn with_rotation(mut self, rotate: bool) -> Self {
        self.rotate_refresh_tokens = rotate;
        self
    }

    /// bcrypt cost for newly hashed passwords
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    /// Authenticate with email and password and issue both tokens.
    ///
    /// Unknown email and wrong password produce the same error.
    pub async fn login<S>(
        &self,
        session: &mut S,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome, AppError>
    where
        S: UserRepository + RefreshTokenRepository + Send,
    {
        let user = match session.find_user_by_email(email).await? {
            Some(user) => user,
            None => {
                verify_dummy_password(password, self.password_cost);
                tracing::warn!(email = %email, "Login failed: user not found");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !verify_password(password, &user.password_hash) {
            tracing::warn!(user_id = user.id, "Login failed: invalid password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let access_token = self.codec.issue_access_token(&user, self.access_token_ttl)?;
        let refresh_token = self.issue_refresh_token(session, &user).await?;

        tracing::info!(user_id = user.id, email = %user.email, "User logged in successfully");

        Ok(LoginOutcome {
            user: UserView::from(&user),
            access_token,
            refresh_token,
        })
    }

    /// Mint a new access token from a refresh token.
    ///
    /// The user is always re-read from storage; claims are not trusted for
    /// identity data. With rotation enabled the presented refresh token is
    /// revoked and a replacement is issued.
    pub async fn refresh<S>(
        &self,
        session: &mut S,
        refresh_token: &str,
    ) -> Result<RefreshOutcome, AppError>
    where
        S: UserRepository + RefreshTokenRepository + Send,
    {
        let claims = self
            .codec
            .decode::<RefreshClaims>(refresh_token)
            .map_err(|e| {
                tracing::warn!(error = %e, "Refresh rejected: token did not verify");
                match e {
                    TokenError::Expired => AuthError::InvalidRefreshToken,
                    TokenError::Invalid(_) => AuthError::InvalidToken,
                }
            })?;

        let record = match find_refresh_token(session, refresh_token).await? {
            Some(record) => record,
            None => {
                tracing::warn!(user_id = claims.user_id, "Refresh rejected: token not found");
                return Err(AuthError::InvalidRefreshToken.into());
            }
        };

        if !is_refresh_token_valid(&record, Utc::now()) {
            tracing::warn!(
                user_id = record.user_id,
                revoked = record.is_revoked,
                "Refresh rejected: token revoked or expired"
            );
            return Err(AuthError::InvalidRefreshToken.into());
        }

        let user = match session.find_user_by_id(record.user_id).await? {
            Some(user) => user,
            None => {
                tracing::warn!(user_id = record.user_id, "Refresh rejected: user no longer exists");
                return Err(AuthError::InvalidRefreshToken.into());
            }
        };

        let access_token = self.codec.issue_access_token(&user, self.access_token_ttl)?;

        let rotated = if self.rotate_refresh_tokens {
            // A concurrent refresh may have spent the token since it was read
            if !revoke_refresh_token(session, refresh_token).await? {
                tracing::warn!(user_id = user.id, "Refresh rejected: token already rotated");
                return Err(AuthError::InvalidRefreshToken.into());
            }
            Some(self.issue_refresh_token(session, &user).await?)
        } else {
            None
        };

        tracing::info!(
            user_id = user.id,
            rotated = rotated.is_some(),
            "Access token refreshed"
        );

        Ok(RefreshOutcome {
            user: UserView::from(&user),
            access_token,
            refresh_token: rotated,
        })
    }

    /// Revoke the refresh token if it is stored. Unknown or already revoked
    /// tokens are not an error.
    pub async fn logout<S>(&self, session: &mut S, refresh_token: &str) -> Result<(), AppError>
    where
        S: RefreshTokenRepository + Send,
    {
        let revoked = revoke_refresh_token(session, refresh_token).await?;
        tracing::info!(revoked = revoked, "User logged out");
        Ok(())
    }

    /// Current view of an authenticated user
    pub async fn current_user<S>(&self, session: &mut S, user_id: i64) -> Result<UserView, AppError>
    where
        S: UserRepository + Send,
    {
        match session.find_user_by_id(user_id).await? {
            Some(user) => Ok(UserView::from(&user)),
            None => {
                tracing::warn!(user_id = user_id, "Authenticated user no longer exists");
                Err(AuthError::Unauthorized.into())
            }
        }
    }

    /// Replace the password after verifying the current one
    pub async fn change_password<S>(
        &self,
        session: &mut S,
        user_id: i64,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AppError>
    where
        S: UserRepository + Send,
    {
        let user = match session.find_user_by_id(user_id).await? {
            Some(user) => user,
            None => {
                tracing::warn!(user_id = user_id, "Password change failed: user not found");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !verify_password(current_password, &user.password_hash) {
            tracing::warn!(user_id = user_id, "Password change failed: invalid current password");
            return Err(AuthError::InvalidCredentials.into());
        }

        let password_hash = hash_password_with_cost(new_password, self.password_cost)?;
        session.update_password_hash(user.id, &password_hash).await?;

        tracing::info!(user_id = user_id, "Password changed successfully");
        Ok(())
    }

    /// Revoke every live refresh token of a user
    pub async fn revoke_sessions<S>(&self, session: &mut S, user_id: i64) -> Result<u64, AppError>
    where
        S: RefreshTokenRepository + Send,
    {
        revoke_all_user_tokens(session, user_id).await
    }

    async fn issue_refresh_token<S>(&self, session: &mut S, user: &User) -> Result<String, AppError>
    where
        S: RefreshTokenRepository + Send,
    {
        let (token, claims) = self
            .codec
            .issue_refresh_token(user.id, self.refresh_token_ttl)?;
        let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AppError::Internal("refresh token expiry out of range".to_string()))?;

        save_refresh_token(session, &token, user.id, expires_at).await?;
        Ok(token)
    }
}
