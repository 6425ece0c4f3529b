/// Session Lifecycle
///
/// A session is one unit of work against the store. It starts `Idle`,
/// becomes `Active` on first access, ends in exactly one of `Committed` or
/// `RolledBack`, and is then `Closed`. Only this module decides when a
/// session commits; repositories never do.
///
/// - Inside an HTTP request the session is opened by
///   [`crate::middleware::SessionLifecycle`] and handed to the handler as a
///   [`RequestSession`].
/// - Outside a request (scripts, tests) [`scoped_transaction`] opens a fresh
///   session and commits or rolls it back around a closure.

mod memory;
mod postgres;

pub use memory::{MemoryDatabase, MemorySession};
pub use postgres::{PgSession, PgSessionFactory};

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use futures::lock::{Mutex, MutexLockFuture};
use std::sync::Arc;

use crate::error::{AppError, DatabaseError};
use crate::repository::{RefreshTokenRepository, UserRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Committed,
    RolledBack,
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Committed | SessionState::RolledBack | SessionState::Closed
        )
    }
}

/// Error for any operation attempted after the terminal action
pub(crate) fn finished(state: SessionState) -> AppError {
    AppError::Database(DatabaseError::SessionFinished(state))
}

#[async_trait]
pub trait Session: UserRepository + RefreshTokenRepository + Send {
    fn state(&self) -> SessionState;

    /// Make staged writes durable. Idle sessions commit trivially.
    ///
    /// # Errors
    /// On a failed commit the session is rolled back before the error is
    /// returned. Committing a finished session is an error.
    async fn commit(&mut self) -> Result<(), AppError>;

    /// Discard staged writes.
    ///
    /// # Errors
    /// Rolling back a finished session is an error.
    async fn rollback(&mut self) -> Result<(), AppError>;

    /// Release the handle. An `Active` session is rolled back first.
    fn close(&mut self);
}

#[async_trait]
pub trait SessionFactory: Clone + Send + Sync + 'static {
    type Session: Session + 'static;

    /// A fresh, independent handle in the `Idle` state
    fn open(&self) -> Self::Session;

    /// Cheap round trip used by the health check
    async fn ping(&self) -> Result<(), AppError>;
}

/// Run `operation` in its own session: commit on `Ok`, roll back on `Err`,
/// close in both cases.
pub async fn scoped_transaction<F, T, Op>(factory: &F, operation: Op) -> Result<T, AppError>
where
    F: SessionFactory,
    Op: for<'s> FnOnce(&'s mut F::Session) -> LocalBoxFuture<'s, Result<T, AppError>>,
{
    let mut session = factory.open();

    let result = match operation(&mut session).await {
        Ok(value) => session.commit().await.map(|()| value),
        Err(err) => {
            if let Err(rollback_err) = session.rollback().await {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    };

    session.close();
    result
}

/// Handle to the session owned by the current request
pub struct RequestSession<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for RequestSession<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Session> RequestSession<S> {
    pub fn new(session: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Exclusive access for the duration of one handler
    pub fn lock(&self) -> MutexLockFuture<'_, S> {
        self.inner.lock()
    }

    /// Terminal action for the request: roll back if it failed, commit
    /// otherwise, then close.
    pub async fn finish(&self, failed: bool) -> Result<(), AppError> {
        let mut session = self.inner.lock().await;
        let result = if failed {
            session.rollback().await
        } else {
            session.commit().await
        };
        session.close();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, Role};

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "$2b$04$placeholder".to_string(),
            role: Role::User,
            name: None,
        }
    }

    #[tokio::test]
    async fn test_scoped_transaction_commits_on_success() {
        let db = MemoryDatabase::new();

        let id = scoped_transaction(&db, |session| {
            Box::pin(async move {
                let user = session.insert_user(new_user("a@example.com")).await?;
                Ok(user.id)
            })
        })
        .await
        .unwrap();

        let mut reader = db.open();
        let found = reader.find_user_by_id(id).await.unwrap();
        assert_eq!(found.map(|u| u.email), Some("a@example.com".to_string()));
    }

    #[tokio::test]
    async fn test_scoped_transaction_rolls_back_on_error() {
        let db = MemoryDatabase::new();

        let result: Result<(), AppError> = scoped_transaction(&db, |session| {
            Box::pin(async move {
                session.insert_user(new_user("b@example.com")).await?;
                Err(AppError::Internal("boom".to_string()))
            })
        })
        .await;
        assert!(result.is_err());

        let mut reader = db.open();
        assert!(reader.find_user_by_email("b@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_session_shares_one_handle() {
        let db = MemoryDatabase::new();
        let handle = RequestSession::new(db.open());
        let copy = handle.clone();

        handle.lock().await.insert_user(new_user("c@example.com")).await.unwrap();

        let mut session = copy.lock().await;
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.find_user_by_email("c@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_request_session_finish() {
        let db = MemoryDatabase::new();

        let committed = RequestSession::new(db.open());
        committed.lock().await.insert_user(new_user("d@example.com")).await.unwrap();
        committed.finish(false).await.unwrap();
        assert_eq!(committed.lock().await.state(), SessionState::Closed);

        let failed = RequestSession::new(db.open());
        failed.lock().await.insert_user(new_user("e@example.com")).await.unwrap();
        failed.finish(true).await.unwrap();

        let mut reader = db.open();
        assert!(reader.find_user_by_email("d@example.com").await.unwrap().is_some());
        assert!(reader.find_user_by_email("e@example.com").await.unwrap().is_none());
        // A second terminal action is refused
        assert!(committed.finish(false).await.is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Active.is_terminal());
        assert!(SessionState::Committed.is_terminal());
        assert!(SessionState::RolledBack.is_terminal());
        assert!(SessionState::Closed.is_terminal());
    }
}
