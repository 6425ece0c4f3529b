mod admin;
mod auth;
mod health_check;
mod password;

pub use admin::{revoke_sessions, RevokeSessionsResponse};
pub use auth::{
    login, logout, me, refresh, LoginRequest, MessageResponse, RefreshResponse, UserResponse,
    COOKIE_PATH, REFRESH_TOKEN_COOKIE,
};
pub use health_check::{health_check, HealthResponse};
pub use password::{change_password, PasswordChangeRequest};
