/// Middleware module
///
/// Authentication and role gates plus the per-request session lifecycle.

mod jwt_middleware;
mod role;
mod session_middleware;

pub use jwt_middleware::{AuthenticatedUser, JwtAuth, ACCESS_TOKEN_COOKIE};
pub use role::RequireRole;
pub use session_middleware::SessionLifecycle;
