/// Refresh Token Store
///
/// Persists issued refresh tokens and decides whether a stored token is
/// still usable. Tokens are:
/// - Hashed with SHA-256 before storage (never store plaintext)
/// - Looked up by the raw string the client presents
/// - Revocable individually or per user
///
/// Writes go through the caller's session; nothing here commits.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::models::RefreshTokenRecord;
use crate::repository::RefreshTokenRepository;

/// Hash a refresh token using SHA-256
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Interpret a timezone-naive storage timestamp as UTC.
///
/// Every timestamp read back from storage passes through here.
pub fn normalize_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

/// Usable means not revoked and not yet expired at `now`
pub fn is_refresh_token_valid(record: &RefreshTokenRecord, now: DateTime<Utc>) -> bool {
    !record.is_revoked && record.expires_at > now
}

/// Store a newly issued refresh token
///
/// # Errors
/// Returns error if the user does not exist or the write fails
pub async fn save_refresh_token<S: RefreshTokenRepository>(
    session: &mut S,
    token: &str,
    user_id: i64,
    expires_at: DateTime<Utc>,
) -> Result<RefreshTokenRecord, AppError> {
    session
        .insert_refresh_token(&hash_token(token), user_id, expires_at)
        .await
}

pub async fn find_refresh_token<S: RefreshTokenRepository>(
    session: &mut S,
    token: &str,
) -> Result<Option<RefreshTokenRecord>, AppError> {
    session.find_refresh_token(&hash_token(token)).await
}

/// Revoke a single refresh token. Unknown or already revoked tokens are
/// left alone and reported as `false`.
pub async fn revoke_refresh_token<S: RefreshTokenRepository>(
    session: &mut S,
    token: &str,
) -> Result<bool, AppError> {
    session.revoke_refresh_token(&hash_token(token)).await
}

/// Revoke all refresh tokens for a user
pub async fn revoke_all_user_tokens<S: RefreshTokenRepository>(
    session: &mut S,
    user_id: i64,
) -> Result<u64, AppError> {
    let revoked = session.revoke_user_refresh_tokens(user_id).await?;
    tracing::info!(user_id = user_id, revoked = revoked, "Refresh tokens revoked for user");
    Ok(revoked)
}
