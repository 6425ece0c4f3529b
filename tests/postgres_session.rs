//! Postgres-backed sessions against a real server.
//!
//! Each test creates its own database from `configuration.yaml` (or the
//! `APP_DATABASE__*` overrides) and runs the migrations into it. Run with
//! `cargo test -- --ignored` once Postgres is up.

use actix_web::ResponseError;
use chrono::{Duration, Utc};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use todo_auth::auth::{hash_password_with_cost, AuthService, TokenCodec};
use todo_auth::configuration::{get_configuration, DatabaseSettings};
use todo_auth::error::{AppError, AuthError, DatabaseError};
use todo_auth::models::{NewUser, Role, User};
use todo_auth::repository::{RefreshTokenRepository, UserRepository};
use todo_auth::session::{PgSessionFactory, Session, SessionFactory, SessionState};

const SECRET: &str = "test-secret-key-at-least-32-characters-long";
const TEST_COST: u32 = 4;

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    // Create database
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");
    // Migrate database
    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

async fn spawn_factory() -> PgSessionFactory {
    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    PgSessionFactory::new(configure_database(&configuration.database).await)
}

fn new_user(email: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        password_hash: hash_password_with_cost("password123", TEST_COST).unwrap(),
        role: Role::User,
        name: Some("Test User".to_string()),
    }
}

/// Commits a user and one live refresh token row per digest
async fn seed_tokens(factory: &PgSessionFactory, email: &str, digests: &[&str]) -> User {
    let mut session = factory.open();
    let user = session.insert_user(new_user(email)).await.unwrap();
    for digest in digests {
        session
            .insert_refresh_token(digest, user.id, Utc::now() + Duration::days(1))
            .await
            .unwrap();
    }
    session.commit().await.unwrap();
    user
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn transaction_begins_on_first_access() {
    let factory = spawn_factory().await;
    factory.ping().await.unwrap();

    let mut session = factory.open();
    assert_eq!(session.state(), SessionState::Idle);

    session.find_user_by_email("nobody@example.com").await.unwrap();
    assert_eq!(session.state(), SessionState::Active);

    session.commit().await.unwrap();
    assert_eq!(session.state(), SessionState::Committed);
    assert!(session.rollback().await.is_err());
    assert!(session.find_user_by_id(1).await.is_err());

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn idle_session_commits_without_a_transaction() {
    let factory = spawn_factory().await;

    let mut session = factory.open();
    session.commit().await.unwrap();
    assert_eq!(session.state(), SessionState::Committed);
    assert!(session.commit().await.is_err());
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn commit_publishes_and_rollback_discards() {
    let factory = spawn_factory().await;

    let mut writer = factory.open();
    let mut reader = factory.open();
    let user = writer.insert_user(new_user("kept@example.com")).await.unwrap();
    assert_eq!(user.role, Role::User);
    assert!(reader.find_user_by_email("kept@example.com").await.unwrap().is_none());
    writer.commit().await.unwrap();
    assert_eq!(
        reader.find_user_by_email("kept@example.com").await.unwrap(),
        Some(user)
    );

    let mut session = factory.open();
    session.insert_user(new_user("dropped@example.com")).await.unwrap();
    session.rollback().await.unwrap();
    assert_eq!(session.state(), SessionState::RolledBack);

    let mut session = factory.open();
    assert!(session
        .find_user_by_email("dropped@example.com")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn close_while_active_discards_writes() {
    let factory = spawn_factory().await;

    let mut session = factory.open();
    session.insert_user(new_user("closed@example.com")).await.unwrap();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);

    let mut session = factory.open();
    assert!(session
        .find_user_by_email("closed@example.com")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn duplicate_email_is_a_conflict() {
    let factory = spawn_factory().await;
    seed_tokens(&factory, "taken@example.com", &[]).await;

    let mut session = factory.open();
    let err = session
        .insert_user(new_user("taken@example.com"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code().as_u16(), 409);
    match err {
        AppError::Database(DatabaseError::UniqueConstraintViolation(message)) => {
            assert_eq!(message, "Email already registered");
        }
        other => panic!("expected unique violation, got {:?}", other),
    }
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn duplicate_token_digest_is_reported_as_such() {
    let factory = spawn_factory().await;
    let user = seed_tokens(&factory, "user@example.com", &["digest"]).await;

    let mut session = factory.open();
    let err = session
        .insert_refresh_token("digest", user.id, Utc::now() + Duration::days(1))
        .await
        .unwrap_err();

    match err {
        AppError::Database(DatabaseError::UniqueConstraintViolation(message)) => {
            assert_eq!(message, "Refresh token already stored");
        }
        other => panic!("expected unique violation, got {:?}", other),
    }
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn revoking_a_token_only_affects_live_rows() {
    let factory = spawn_factory().await;
    seed_tokens(&factory, "user@example.com", &["digest"]).await;

    let mut session = factory.open();
    assert!(session.revoke_refresh_token("digest").await.unwrap());
    assert!(!session.revoke_refresh_token("digest").await.unwrap());
    session.commit().await.unwrap();

    let mut session = factory.open();
    let before = session.find_refresh_token("digest").await.unwrap().unwrap();
    assert!(before.is_revoked);
    assert!(!session.revoke_refresh_token("digest").await.unwrap());
    assert!(!session.revoke_refresh_token("unknown").await.unwrap());
    session.commit().await.unwrap();

    let mut session = factory.open();
    let after = session.find_refresh_token("digest").await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn revoking_all_user_tokens_reports_the_count() {
    let factory = spawn_factory().await;
    let alice = seed_tokens(&factory, "alice@example.com", &["a1", "a2"]).await;
    seed_tokens(&factory, "bob@example.com", &["b1"]).await;

    let mut session = factory.open();
    assert_eq!(session.revoke_user_refresh_tokens(alice.id).await.unwrap(), 2);
    assert_eq!(session.revoke_user_refresh_tokens(alice.id).await.unwrap(), 0);
    assert_eq!(session.revoke_user_refresh_tokens(9_999).await.unwrap(), 0);
    session.commit().await.unwrap();

    let mut session = factory.open();
    let b1 = session.find_refresh_token("b1").await.unwrap().unwrap();
    assert!(!b1.is_revoked);
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn racing_revokes_only_one_wins() {
    let factory = spawn_factory().await;
    seed_tokens(&factory, "user@example.com", &["digest"]).await;

    let mut first = factory.open();
    let mut second = factory.open();
    second.find_refresh_token("digest").await.unwrap();
    assert!(first.revoke_refresh_token("digest").await.unwrap());

    // The second UPDATE waits on the first transaction's row lock
    let (second_revoked, first_commit) =
        tokio::join!(second.revoke_refresh_token("digest"), first.commit());
    first_commit.unwrap();

    assert!(!second_revoked.unwrap());
    second.commit().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn rotated_refresh_token_cannot_be_spent_twice() {
    let factory = spawn_factory().await;
    let auth = AuthService::new(
        TokenCodec::new(SECRET, jsonwebtoken::Algorithm::HS256),
        Duration::minutes(15),
        Duration::days(7),
    )
    .with_rotation(true)
    .with_password_cost(TEST_COST);
    seed_tokens(&factory, "user@example.com", &[]).await;

    let mut session = factory.open();
    let outcome = auth
        .login(&mut session, "user@example.com", "password123")
        .await
        .unwrap();
    session.commit().await.unwrap();

    let mut first = factory.open();
    let mut second = factory.open();
    let rotated = auth.refresh(&mut first, &outcome.refresh_token).await.unwrap();

    let (second_refresh, first_commit) =
        tokio::join!(auth.refresh(&mut second, &outcome.refresh_token), first.commit());
    first_commit.unwrap();

    assert!(matches!(
        second_refresh,
        Err(AppError::Auth(AuthError::InvalidRefreshToken))
    ));
    second.rollback().await.unwrap();

    let mut session = factory.open();
    assert!(auth
        .refresh(&mut session, &rotated.refresh_token.unwrap())
        .await
        .is_ok());
}
