/// Authentication module
///
/// Handles JWT token generation/validation, password hashing,
/// refresh token storage and the login/refresh/logout flows.

pub mod claims;
pub mod jwt;
pub mod password;
pub mod refresh_token;
pub mod service;

pub use claims::{AccessClaims, RefreshClaims};
pub use jwt::{TokenCodec, TokenError};
pub use password::{generate_password, hash_password, hash_password_with_cost, verify_password};
pub use refresh_token::{
    find_refresh_token, is_refresh_token_valid, normalize_utc, revoke_all_user_tokens,
    revoke_refresh_token, save_refresh_token,
};
pub use service::{AuthService, LoginOutcome, RefreshOutcome};
