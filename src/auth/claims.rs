/// JWT Claims structures
///
/// Access tokens carry identity for stateless checks; refresh tokens carry
/// only the owner and a random `jti` that ties them to a stored row.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Role, User};

/// Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AccessClaims {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl AccessClaims {
    pub fn new(user: &User, ttl: Duration) -> Self {
        let now = Utc::now().timestamp();
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            iat: now,
            exp: now + ttl.num_seconds(),
        }
    }
}

/// Claims for refresh tokens
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RefreshClaims {
    pub user_id: i64,
    /// Random identifier, unique per issued token
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl RefreshClaims {
    pub fn new(user_id: i64, ttl: Duration) -> Self {
        let now = Utc::now().timestamp();
        Self {
            user_id,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl.num_seconds(),
        }
    }
}
