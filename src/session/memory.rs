/// In-process store
///
/// Used by the test suites and by `database.backend = memory`. Each session
/// stages its writes and sees them overlaid on the committed tables; other
/// sessions only see them after commit. Constraints are checked again at
/// commit time, so two sessions racing on the same email cannot both win,
/// and two sessions revoking the same refresh token cannot both commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{AppError, DatabaseError};
use crate::models::{NewUser, RefreshTokenRecord, User};
use crate::repository::{RefreshTokenRepository, UserRepository};
use crate::session::{finished, Session, SessionFactory, SessionState};

#[derive(Debug, Default, Clone)]
struct Tables {
    users: BTreeMap<i64, User>,
    refresh_tokens: BTreeMap<i64, RefreshTokenRecord>,
}

#[derive(Debug, Clone)]
enum Write {
    InsertUser(User),
    UpdatePassword {
        user_id: i64,
        password_hash: String,
        at: DateTime<Utc>,
    },
    InsertRefreshToken(RefreshTokenRecord),
    RevokeRefreshToken {
        token_hash: String,
        at: DateTime<Utc>,
    },
    RevokeUserRefreshTokens {
        user_id: i64,
        at: DateTime<Utc>,
    },
}

impl Tables {
    fn apply(&mut self, write: &Write) -> Result<(), AppError> {
        match write {
            Write::InsertUser(user) => {
                if self.users.values().any(|u| u.email == user.email) {
                    return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                        "Email already registered".to_string(),
                    )));
                }
                self.users.insert(user.id, user.clone());
            }
            Write::UpdatePassword {
                user_id,
                password_hash,
                at,
            } => {
                if let Some(user) = self.users.get_mut(user_id) {
                    user.password_hash = password_hash.clone();
                    user.updated_at = *at;
                }
            }
            Write::InsertRefreshToken(record) => {
                if !self.users.contains_key(&record.user_id) {
                    return Err(AppError::Database(DatabaseError::QueryExecution(format!(
                        "refresh token references missing user {}",
                        record.user_id
                    ))));
                }
                if self
                    .refresh_tokens
                    .values()
                    .any(|t| t.token_hash == record.token_hash)
                {
                    return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                        "Refresh token already stored".to_string(),
                    )));
                }
                self.refresh_tokens.insert(record.id, record.clone());
            }
            Write::RevokeRefreshToken { token_hash, at } => {
                // Only staged against a live row; losing it means another session won
                let token = self
                    .refresh_tokens
                    .values_mut()
                    .find(|t| &t.token_hash == token_hash && !t.is_revoked)
                    .ok_or_else(|| {
                        AppError::Database(DatabaseError::WriteConflict(
                            "refresh token was revoked by another session".to_string(),
                        ))
                    })?;
                token.is_revoked = true;
                token.updated_at = *at;
            }
            Write::RevokeUserRefreshTokens { user_id, at } => {
                for token in self.refresh_tokens.values_mut() {
                    if token.user_id == *user_id && !token.is_revoked {
                        token.is_revoked = true;
                        token.updated_at = *at;
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    // Like database sequences, ids are never handed out twice, even after rollback
    next_user_id: AtomicI64,
    next_token_id: AtomicI64,
}

impl Shared {
    fn committed(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionFactory for MemoryDatabase {
    type Session = MemorySession;

    fn open(&self) -> MemorySession {
        MemorySession {
            shared: Arc::clone(&self.shared),
            staged: Vec::new(),
            state: SessionState::Idle,
        }
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.shared.committed().map(|_| ())
    }
}

#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
    staged: Vec<Write>,
    state: SessionState,
}

impl MemorySession {
    fn activate(&mut self) -> Result<(), AppError> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Active;
                Ok(())
            }
            SessionState::Active => Ok(()),
            state => Err(finished(state)),
        }
    }

    /// Committed tables with this session's staged writes on top
    fn view(&self) -> Result<Tables, AppError> {
        let mut tables = self.shared.committed()?.clone();
        for write in &self.staged {
            tables.apply(write)?;
        }
        Ok(tables)
    }

    fn stage(&mut self, write: Write) -> Result<(), AppError> {
        // Fail at the call site rather than at commit when possible
        self.view()?.apply(&write)?;
        self.staged.push(write);
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
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
                let staged = std::mem::take(&mut self.staged);
                let mut committed = self.shared.committed()?;

                let mut next = committed.clone();
                for write in &staged {
                    if let Err(err) = next.apply(write) {
                        self.state = SessionState::RolledBack;
                        tracing::warn!(error = %err, "Commit failed; session rolled back");
                        return Err(err);
                    }
                }

                *committed = next;
                self.state = SessionState::Committed;
                Ok(())
            }
            state => Err(finished(state)),
        }
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        match self.state {
            SessionState::Idle | SessionState::Active => {
                self.staged.clear();
                self.state = SessionState::RolledBack;
                Ok(())
            }
            state => Err(finished(state)),
        }
    }

    fn close(&mut self) {
        if self.state == SessionState::Active {
            tracing::warn!(
                staged = self.staged.len(),
                "Session closed while active; discarding staged writes"
            );
        }
        self.staged.clear();
        self.state = SessionState::Closed;
    }
}

#[async_trait]
impl UserRepository for MemorySession {
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, AppError> {
        self.activate()?;
        Ok(self
            .view()?
            .users
            .into_values()
            .find(|user| user.email == email))
    }

    async fn find_user_by_id(&mut self, user_id: i64) -> Result<Option<User>, AppError> {
        self.activate()?;
        Ok(self.view()?.users.remove(&user_id))
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User, AppError> {
        self.activate()?;
        let now = Utc::now();
        let user = User {
            id: self.shared.next_user_id.fetch_add(1, Ordering::SeqCst) + 1,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            name: user.name,
            created_at: now,
            updated_at: now,
        };
        self.stage(Write::InsertUser(user.clone()))?;
        Ok(user)
    }

    async fn update_password_hash(
        &mut self,
        user_id: i64,
        password_hash: &str,
    ) -> Result<bool, AppError> {
        self.activate()?;
        if !self.view()?.users.contains_key(&user_id) {
            return Ok(false);
        }
        self.stage(Write::UpdatePassword {
            user_id,
            password_hash: password_hash.to_string(),
            at: Utc::now(),
        })?;
        Ok(true)
    }
}

#[async_trait]
impl RefreshTokenRepository for MemorySession {
    async fn insert_refresh_token(
        &mut self,
        token_hash: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, AppError> {
        self.activate()?;
        let now = Utc::now();
        let record = RefreshTokenRecord {
            id: self.shared.next_token_id.fetch_add(1, Ordering::SeqCst) + 1,
            token_hash: token_hash.to_string(),
            user_id,
            expires_at,
            is_revoked: false,
            created_at: now,
            updated_at: now,
        };
        self.stage(Write::InsertRefreshToken(record.clone()))?;
        Ok(record)
    }

    async fn find_refresh_token(
        &mut self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        self.activate()?;
        Ok(self
            .view()?
            .refresh_tokens
            .into_values()
            .find(|token| token.token_hash == token_hash))
    }

    async fn revoke_refresh_token(&mut self, token_hash: &str) -> Result<bool, AppError> {
        self.activate()?;
        let live = self
            .view()?
            .refresh_tokens
            .values()
            .any(|token| token.token_hash == token_hash && !token.is_revoked);
        if live {
            self.stage(Write::RevokeRefreshToken {
                token_hash: token_hash.to_string(),
                at: Utc::now(),
            })?;
        }
        Ok(live)
    }

    async fn revoke_user_refresh_tokens(&mut self, user_id: i64) -> Result<u64, AppError> {
        self.activate()?;
        let live = self
            .view()?
            .refresh_tokens
            .values()
            .filter(|token| token.user_id == user_id && !token.is_revoked)
            .count() as u64;
        if live > 0 {
            self.stage(Write::RevokeUserRefreshTokens {
                user_id,
                at: Utc::now(),
            })?;
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "$2b$04$placeholder".to_string(),
            role: Role::User,
            name: None,
        }
    }

    #[tokio::test]
    async fn test_state_machine() {
        let db = MemoryDatabase::new();
        let mut session = db.open();
        assert_eq!(session.state(), SessionState::Idle);

        session.find_user_by_id(1).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);

        session.commit().await.unwrap();
        assert_eq!(session.state(), SessionState::Committed);

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_action() {
        let db = MemoryDatabase::new();

        let mut session = db.open();
        session.insert_user(new_user("a@example.com")).await.unwrap();
        session.commit().await.unwrap();
        assert!(session.rollback().await.is_err());
        assert!(session.commit().await.is_err());

        let mut session = db.open();
        session.rollback().await.unwrap();
        assert!(session.commit().await.is_err());
        assert!(session.find_user_by_email("a@example.com").await.is_err());
    }

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let db = MemoryDatabase::new();
        let mut writer = db.open();
        let mut reader = db.open();

        writer.insert_user(new_user("a@example.com")).await.unwrap();
        assert!(writer.find_user_by_email("a@example.com").await.unwrap().is_some());
        assert!(reader.find_user_by_email("a@example.com").await.unwrap().is_none());

        writer.commit().await.unwrap();
        assert!(reader.find_user_by_email("a@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let db = MemoryDatabase::new();
        let mut session = db.open();
        session.insert_user(new_user("a@example.com")).await.unwrap();
        session.rollback().await.unwrap();

        let mut reader = db.open();
        assert!(reader.find_user_by_email("a@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let db = MemoryDatabase::new();
        let mut session = db.open();
        session.insert_user(new_user("a@example.com")).await.unwrap();

        let err = session.insert_user(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Database(DatabaseError::UniqueConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_conflicting_commit_rolls_back() {
        let db = MemoryDatabase::new();
        let mut first = db.open();
        let mut second = db.open();

        first.insert_user(new_user("a@example.com")).await.unwrap();
        second.insert_user(new_user("a@example.com")).await.unwrap();

        first.commit().await.unwrap();
        assert!(second.commit().await.is_err());
        assert_eq!(second.state(), SessionState::RolledBack);
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let db = MemoryDatabase::new();
        let mut session = db.open();
        let user = session.insert_user(new_user("a@example.com")).await.unwrap();
        session
            .insert_refresh_token("digest", user.id, Utc::now() + Duration::days(1))
            .await
            .unwrap();
        session.commit().await.unwrap();

        let mut session = db.open();
        assert!(session.revoke_refresh_token("digest").await.unwrap());
        session.commit().await.unwrap();

        let mut session = db.open();
        let before = session.find_refresh_token("digest").await.unwrap().unwrap();
        assert!(!session.revoke_refresh_token("digest").await.unwrap());
        assert!(!session.revoke_refresh_token("unknown").await.unwrap());
        session.commit().await.unwrap();

        let mut session = db.open();
        let after = session.find_refresh_token("digest").await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_racing_revokes_only_one_commits() {
        let db = MemoryDatabase::new();
        let mut session = db.open();
        let user = session.insert_user(new_user("a@example.com")).await.unwrap();
        session
            .insert_refresh_token("digest", user.id, Utc::now() + Duration::days(1))
            .await
            .unwrap();
        session.commit().await.unwrap();

        let mut first = db.open();
        let mut second = db.open();
        assert!(first.revoke_refresh_token("digest").await.unwrap());
        assert!(second.revoke_refresh_token("digest").await.unwrap());

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Database(DatabaseError::WriteConflict(_))
        ));
        assert_eq!(second.state(), SessionState::RolledBack);
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let db = MemoryDatabase::new();
        let mut session = db.open();
        let alice = session.insert_user(new_user("alice@example.com")).await.unwrap();
        let bob = session.insert_user(new_user("bob@example.com")).await.unwrap();
        let expires = Utc::now() + Duration::days(1);
        session.insert_refresh_token("a1", alice.id, expires).await.unwrap();
        session.insert_refresh_token("a2", alice.id, expires).await.unwrap();
        session.insert_refresh_token("b1", bob.id, expires).await.unwrap();

        assert_eq!(session.revoke_user_refresh_tokens(alice.id).await.unwrap(), 2);
        assert_eq!(session.revoke_user_refresh_tokens(alice.id).await.unwrap(), 0);

        let b1 = session.find_refresh_token("b1").await.unwrap().unwrap();
        assert!(!b1.is_revoked);
    }

    #[tokio::test]
    async fn test_token_requires_existing_user() {
        let db = MemoryDatabase::new();
        let mut session = db.open();
        assert!(session
            .insert_refresh_token("digest", 99, Utc::now())
            .await
            .is_err());
    }
}
