/// Password management routes

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::AuthService;
use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::routes::auth::MessageResponse;
use crate::session::{RequestSession, Session};
use crate::validation::validate_password_change;

#[derive(Deserialize)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
}

/// POST /api/password/change
///
/// **Requires a valid access token.**
///
/// # Errors
/// - 400: New password does not meet the password rules
/// - 401: Current password does not verify
pub async fn change_password<S: Session + 'static>(
    identity: AuthenticatedUser,
    body: web::Json<PasswordChangeRequest>,
    session: RequestSession<S>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let input = validate_password_change(&body.current_password, &body.new_password)?;

    let mut session = session.lock().await;
    auth.change_password(
        &mut *session,
        identity.user_id,
        &input.current_password,
        &input.new_password,
    )
    .await?;

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Password changed".to_string(),
    }))
}
