/// Authentication Routes
///
/// Login, token refresh, logout and current user information. Tokens travel
/// in `HttpOnly` cookies scoped to `/api`; bodies only carry the user view.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::AuthService;
use crate::configuration::CookieSettings;
use crate::error::{AppError, AuthError};
use crate::middleware::{AuthenticatedUser, ACCESS_TOKEN_COOKIE};
use crate::models::UserView;
use crate::session::{RequestSession, Session};
use crate::validation::validate_login;

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const COOKIE_PATH: &str = "/api";

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// `{"user": {...}}`
#[derive(Serialize, Deserialize)]
pub struct UserResponse {
    pub user: UserView,
}

#[derive(Serialize, Deserialize)]
pub struct RefreshResponse {
    pub message: String,
    pub user: UserView,
}

#[derive(Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Credential cookie. A zero `max_age` clears it on the client.
pub(crate) fn credential_cookie(
    name: &'static str,
    value: String,
    max_age: chrono::Duration,
    settings: &CookieSettings,
) -> Cookie<'static> {
    let mut builder = Cookie::build(name, value)
        .path(COOKIE_PATH)
        .http_only(true)
        .secure(settings.secure)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(max_age.num_seconds()));

    if let Some(domain) = &settings.domain {
        builder = builder.domain(domain.clone());
    }

    builder.finish()
}

fn refresh_token_from(req: &HttpRequest) -> Option<String> {
    req.cookie(REFRESH_TOKEN_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// POST /api/auth/login
///
/// Authenticate with email and password. Sets the `access_token` and
/// `refresh_token` cookies.
///
/// # Errors
/// - 400: Validation error (email format, password rules)
/// - 401: Invalid credentials (same error for unknown email and wrong password)
/// - 500: Internal server error
pub async fn login<S: Session + 'static>(
    body: web::Json<LoginRequest>,
    session: RequestSession<S>,
    auth: web::Data<AuthService>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let input = validate_login(&body.email, &body.password)?;

    let mut session = session.lock().await;
    let outcome = auth.login(&mut *session, &input.email, &input.password).await?;

    Ok(HttpResponse::Ok()
        .cookie(credential_cookie(
            ACCESS_TOKEN_COOKIE,
            outcome.access_token,
            auth.access_token_ttl(),
            &cookies,
        ))
        .cookie(credential_cookie(
            REFRESH_TOKEN_COOKIE,
            outcome.refresh_token,
            auth.refresh_token_ttl(),
            &cookies,
        ))
        .json(UserResponse { user: outcome.user }))
}

/// POST /api/auth/refresh
///
/// Reads the `refresh_token` cookie and sets a fresh `access_token` cookie.
/// The refresh cookie is replaced only when rotation is enabled.
///
/// # Errors
/// - 401: Missing, tampered, expired or revoked refresh token
pub async fn refresh<S: Session + 'static>(
    req: HttpRequest,
    session: RequestSession<S>,
    auth: web::Data<AuthService>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let token = refresh_token_from(&req).ok_or_else(|| {
        tracing::warn!("Refresh token cookie not found");
        AppError::Auth(AuthError::InvalidRefreshToken)
    })?;

    let mut session = session.lock().await;
    let outcome = auth.refresh(&mut *session, &token).await?;

    let mut response = HttpResponse::Ok();
    response.cookie(credential_cookie(
        ACCESS_TOKEN_COOKIE,
        outcome.access_token,
        auth.access_token_ttl(),
        &cookies,
    ));
    if let Some(rotated) = outcome.refresh_token {
        response.cookie(credential_cookie(
            REFRESH_TOKEN_COOKIE,
            rotated,
            auth.refresh_token_ttl(),
            &cookies,
        ));
    }

    Ok(response.json(RefreshResponse {
        message: "Token refreshed".to_string(),
        user: outcome.user,
    }))
}

/// POST /api/auth/logout
///
/// Revokes the refresh token (if any) and clears both cookies. Always 200
/// unless storage fails.
pub async fn logout<S: Session + 'static>(
    req: HttpRequest,
    session: RequestSession<S>,
    auth: web::Data<AuthService>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    if let Some(token) = refresh_token_from(&req) {
        let mut session = session.lock().await;
        auth.logout(&mut *session, &token).await?;
    }

    let cleared = chrono::Duration::zero();
    Ok(HttpResponse::Ok()
        .cookie(credential_cookie(ACCESS_TOKEN_COOKIE, String::new(), cleared, &cookies))
        .cookie(credential_cookie(REFRESH_TOKEN_COOKIE, String::new(), cleared, &cookies))
        .json(MessageResponse {
            message: "Logged out".to_string(),
        }))
}

/// GET /api/auth/me
///
/// **Requires a valid access token.** The user is re-read from storage.
///
/// # Errors
/// - 401: Missing or invalid token, or the user no longer exists
pub async fn me<S: Session + 'static>(
    identity: AuthenticatedUser,
    session: RequestSession<S>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let mut session = session.lock().await;
    let user = auth.current_user(&mut *session, identity.user_id).await?;

    Ok(HttpResponse::Ok().json(UserResponse { user }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_cookie_attributes() {
        let settings = CookieSettings {
            secure: true,
            domain: Some("example.com".to_string()),
        };
        let cookie = credential_cookie(
            ACCESS_TOKEN_COOKIE,
            "value".to_string(),
            chrono::Duration::minutes(1440),
            &settings,
        );

        assert_eq!(cookie.name(), "access_token");
        assert_eq!(cookie.path(), Some("/api"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.max_age(), Some(CookieDuration::seconds(86_400)));
    }

    #[test]
    fn test_cleared_cookie_has_zero_max_age() {
        let settings = CookieSettings {
            secure: false,
            domain: None,
        };
        let cookie = credential_cookie(
            REFRESH_TOKEN_COOKIE,
            String::new(),
            chrono::Duration::zero(),
            &settings,
        );

        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(CookieDuration::ZERO));
        assert_eq!(cookie.domain(), None);
    }
}
