//! Integration tests for the health endpoint

use async_trait::async_trait;
use serde_json::Value;
use std::net::TcpListener;
use todo_auth::auth::{AuthService, TokenCodec};
use todo_auth::configuration::CookieSettings;
use todo_auth::error::{AppError, DatabaseError};
use todo_auth::session::{MemoryDatabase, MemorySession, SessionFactory};
use todo_auth::startup::run;

const SECRET: &str = "test-secret-key-at-least-32-characters-long";

/// Backend whose ping always fails
#[derive(Clone, Default)]
struct UnreachableDatabase(MemoryDatabase);

#[async_trait]
impl SessionFactory for UnreachableDatabase {
    type Session = MemorySession;

    fn open(&self) -> MemorySession {
        self.0.open()
    }

    async fn ping(&self) -> Result<(), AppError> {
        Err(DatabaseError::ConnectionPool("connection refused".to_string()).into())
    }
}

fn spawn_app<F: SessionFactory>(factory: F) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let auth = AuthService::new(
        TokenCodec::new(SECRET, jsonwebtoken::Algorithm::HS256),
        chrono::Duration::minutes(1440),
        chrono::Duration::days(7),
    );
    let cookies = CookieSettings {
        secure: false,
        domain: None,
    };
    let server = run(listener, factory, auth, cookies).expect("Failed to create server");

    let _ = tokio::spawn(server);

    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn health_check_works() {
    let addr = spawn_app(MemoryDatabase::new());

    let response = reqwest::Client::new()
        .get(&format!("{}/health", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(200, response.status().as_u16());
    assert!(response.headers().contains_key("x-request-id"));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn health_check_reports_unavailable_database() {
    let addr = spawn_app(UnreachableDatabase::default());

    let response = reqwest::Client::new()
        .get(&format!("{}/health", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(503, response.status().as_u16());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["database"], "unavailable");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let addr = spawn_app(MemoryDatabase::new());

    let response = reqwest::Client::new()
        .get(&format!("{}/api/nowhere", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(404, response.status().as_u16());
}
