/// Administrative routes (role `admin` only)

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::AuthService;
use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::session::{RequestSession, Session};

#[derive(Serialize, Deserialize)]
pub struct RevokeSessionsResponse {
    pub revoked: u64,
}

/// POST /api/admin/users/{id}/revoke-sessions
///
/// Revokes every live refresh token of the user. Access tokens already
/// issued stay valid until they expire.
pub async fn revoke_sessions<S: Session + 'static>(
    admin: AuthenticatedUser,
    path: web::Path<i64>,
    session: RequestSession<S>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();

    let mut session = session.lock().await;
    let revoked = auth.revoke_sessions(&mut *session, user_id).await?;

    tracing::info!(
        admin_id = admin.user_id,
        user_id = user_id,
        revoked = revoked,
        "Sessions revoked by administrator"
    );

    Ok(HttpResponse::Ok().json(RevokeSessionsResponse { revoked }))
}
