//! Data-access seams implemented by every session type.
//!
//! Implementations only read and stage writes; committing belongs to the
//! session lifecycle in [`crate::session`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{NewUser, RefreshTokenRecord, User};

#[async_trait]
pub trait UserRepository {
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_user_by_id(&mut self, user_id: i64) -> Result<Option<User>, AppError>;

    /// # Errors
    /// `DatabaseError::UniqueConstraintViolation` when the email is taken
    async fn insert_user(&mut self, user: NewUser) -> Result<User, AppError>;

    /// Returns `false` when no such user exists
    async fn update_password_hash(
        &mut self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<bool, AppError>;
}

#[async_trait]
pub trait RefreshTokenRepository {
    async fn insert_refresh_token(
        &mut self,
        token_hash: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, AppError>;

    async fn find_refresh_token(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError>;

    /// Returns `false` when no live (unrevoked) row matches
    async fn revoke_refresh_token(&mut self, token_hash: &str) -> Result<bool, AppError>;

    /// Revokes every live token of the user, returning how many changed
    async fn revoke_user_refresh_tokens(&mut self, user_id: i64) -> Result<u64, AppError>;
}
