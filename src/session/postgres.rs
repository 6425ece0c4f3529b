/// PostgreSQL-backed sessions
///
/// One session owns at most one transaction, begun lazily on first access.
/// Timestamps are stored as UTC in `TIMESTAMP` columns and normalised on
/// the way out.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Postgres, Transaction};

use crate::auth::normalize_utc;
use crate::error::AppError;
use crate::models::{NewUser, RefreshTokenRecord, Role, User};
use crate::repository::{RefreshTokenRepository, UserRepository};
use crate::session::{finished, Session, SessionFactory, SessionState};

const USER_COLUMNS: &str = "id, email, password_hash, role, name, created_at, updated_at";
const REFRESH_TOKEN_COLUMNS: &str =
    "id, token_hash, user_id, expires_at, is_revoked, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgSessionFactory {
    pool: PgPool,
}

impl PgSessionFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionFactory for PgSessionFactory {
    type Session = PgSession;

    fn open(&self) -> PgSession {
        PgSession {
            pool: self.pool.clone(),
            tx: None,
            state: SessionState::Idle,
        }
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
    state: SessionState,
}

impl PgSession {
    /// Connection of the session's transaction, beginning it if needed
    async fn connection(&mut self) -> Result<&mut PgConnection, AppError> {
        if self.state == SessionState::Idle {
            self.tx = Some(self.pool.begin().await?);
            self.state = SessionState::Active;
        }

        match (self.state, self.tx.as_deref_mut()) {
            (SessionState::Active, Some(conn)) => Ok(conn),
            (state, _) => Err(finished(state)),
        }
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            // sqlx rolls back a transaction dropped while open
            tracing::warn!("Session dropped while active; transaction rolled back");
        }
    }
}

#[async_trait]
impl Session for PgSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Committed;
                Ok(())
            }
            SessionState::Active => {
                let tx = self
                    .tx
                    .take()
                    .ok_or_else(|| AppError::Internal("active session without transaction".to_string()))?;

                match tx.commit().await {
                    Ok(()) => {
                        self.state = SessionState::Committed;
                        Ok(())
                    }
                    Err(e) => {
                        // The failed transaction is dropped and rolled back by sqlx
                        self.state = SessionState::RolledBack;
                        tracing::error!(error = %e, "Commit failed; session rolled back");
                        Err(e.into())
                    }
                }
            }
            state => Err(finished(state)),
        }
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::RolledBack;
                Ok(())
            }
            SessionState::Active => {
                self.state = SessionState::RolledBack;
                match self.tx.take() {
                    Some(tx) => tx.rollback().await.map_err(AppError::from),
                    None => Ok(()),
                }
            }
            state => Err(finished(state)),
        }
    }

    fn close(&mut self) {
        if self.state == SessionState::Active {
            tracing::warn!("Session closed while active; rolling back");
        }
        self.tx = None;
        self.state = SessionState::Closed;
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: String,
    password_hash: String,
    role: String,
    name: Option<String>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|e| AppError::Internal(format!("user {}: {}", row.id, e)))?;

        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            role,
            name: row.name,
            created_at: normalize_utc(row.created_at),
            updated_at: normalize_utc(row.updated_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: i64,
    token_hash: String,
    user_id: i64,
    expires_at: NaiveDateTime,
    is_revoked: bool,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        RefreshTokenRecord {
            id: row.id,
            token_hash: row.token_hash,
            user_id: row.user_id,
            expires_at: normalize_utc(row.expires_at),
            is_revoked: row.is_revoked,
            created_at: normalize_utc(row.created_at),
            updated_at: normalize_utc(row.updated_at),
        }
    }
}

#[async_trait]
impl UserRepository for PgSession {
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&query)
            .bind(email)
            .fetch_optional(self.connection().await?)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_user_by_id(&mut self, user_id: i64) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&query)
            .bind(user_id)
            .fetch_optional(self.connection().await?)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User, AppError> {
        let now = Utc::now().naive_utc();
        let query = format!(
            r#"
            INSERT INTO users (email, password_hash, role, name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        );

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(&user.name)
            .bind(now)
            .fetch_one(self.connection().await?)
            .await?;

        User::try_from(row)
    }

    async fn update_password_hash(
        &mut self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3")
            .bind(password_hash)
            .bind(Utc::now().naive_utc())
            .bind(user_id)
            .execute(self.connection().await?)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RefreshTokenRepository for PgSession {
    async fn insert_refresh_token(
        &mut self,
        token_hash: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, AppError> {
        let query = format!(
            r#"
            INSERT INTO refresh_tokens (token_hash, user_id, expires_at, is_revoked, created_at, updated_at)
            VALUES ($1, $2, $3, FALSE, $4, $4)
            RETURNING {}
            "#,
            REFRESH_TOKEN_COLUMNS
        );

        let row = sqlx::query_as::<_, RefreshTokenRow>(&query)
            .bind(token_hash)
            .bind(user_id)
            .bind(expires_at.naive_utc())
            .bind(Utc::now().naive_utc())
            .fetch_one(self.connection().await?)
            .await?;

        Ok(row.into())
    }

    async fn find_refresh_token(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = $1",
            REFRESH_TOKEN_COLUMNS
        );
        let row = sqlx::query_as::<_, RefreshTokenRow>(&query)
            .bind(token_hash)
            .fetch_optional(self.connection().await?)
            .await?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn revoke_refresh_token(&mut self, token_hash: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = TRUE, updated_at = $1
            WHERE token_hash = $2 AND is_revoked = FALSE
            "#,
        )
        .bind(Utc::now().naive_utc())
        .bind(token_hash)
        .execute(self.connection().await?)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_user_refresh_tokens(&mut self, user_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = TRUE, updated_at = $1
            WHERE user_id = $2 AND is_revoked = FALSE
            "#,
        )
        .bind(Utc::now().naive_utc())
        .bind(user_id)
        .execute(self.connection().await?)
        .await?;

        Ok(result.rows_affected())
    }
}
