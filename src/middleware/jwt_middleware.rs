/// JWT Authentication Middleware
///
/// Validates the access token carried by the `access_token` cookie (or an
/// `Authorization: Bearer` header when the cookie is absent) and injects the
/// caller's identity into request extensions for use by route handlers.

use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http::header, Error, FromRequest, HttpMessage, HttpRequest,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;

use crate::auth::{AccessClaims, TokenCodec};
use crate::error::{AppError, AuthError};
use crate::models::Role;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Identity resolved from a verified access token
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
}

impl From<AccessClaims> for AuthenticatedUser {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// Handlers behind [`JwtAuth`] take the identity as an argument. Outside the
/// gate the extractor fails with `Unauthorized`.
impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthenticatedUser>()
                .cloned()
                .ok_or(AppError::Auth(AuthError::Unauthorized)),
        )
    }
}

/// Cookie first, then bearer header
fn extract_token(req: &ServiceRequest) -> Option<String> {
    if let Some(cookie) = req.cookie(ACCESS_TOKEN_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Authentication gate for protected scopes
pub struct JwtAuth {
    codec: Arc<TokenCodec>,
}

impl JwtAuth {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtAuthService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthService {
            service: Rc::new(service),
            codec: Arc::clone(&self.codec),
        }))
    }
}

pub struct JwtAuthService<S> {
    service: Rc<S>,
    codec: Arc<TokenCodec>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = match extract_token(&req) {
            Some(token) => token,
            None => {
                tracing::warn!(path = %req.path(), "Missing access token");
                return Box::pin(async { Err(AppError::Auth(AuthError::Unauthorized).into()) });
            }
        };

        match self.codec.decode::<AccessClaims>(&token) {
            Ok(claims) => {
                tracing::debug!(
                    user_id = claims.user_id,
                    role = %claims.role,
                    "Access token validated"
                );
                req.extensions_mut().insert(AuthenticatedUser::from(claims));

                let service = Rc::clone(&self.service);
                Box::pin(async move { service.call(req).await })
            }
            Err(e) => {
                tracing::warn!(path = %req.path(), error = %e, "Access token rejected");
                Box::pin(async { Err(AppError::Auth(AuthError::Unauthorized).into()) })
            }
        }
    }
}
