/// Role gate
///
/// Composes on top of [`JwtAuth`](super::JwtAuth): the gate must be wrapped
/// inside it so the identity is already attached. A request that reaches
/// this gate without an identity is rejected as unauthenticated.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;

use crate::error::{AppError, AuthError};
use crate::middleware::AuthenticatedUser;
use crate::models::Role;

pub struct RequireRole {
    role: Role,
}

impl RequireRole {
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireRole
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireRoleService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireRoleService {
            service: Rc::new(service),
            role: self.role,
        }))
    }
}

pub struct RequireRoleService<S> {
    service: Rc<S>,
    role: Role,
}

impl<S, B> Service<ServiceRequest> for RequireRoleService<S>
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
        let caller_role = req.extensions().get::<AuthenticatedUser>().map(|u| u.role);

        match caller_role {
            Some(role) if role == self.role => {
                let service = Rc::clone(&self.service);
                Box::pin(async move { service.call(req).await })
            }
            Some(role) => {
                tracing::warn!(
                    path = %req.path(),
                    required = %self.role,
                    actual = %role,
                    "Role check failed"
                );
                Box::pin(async { Err(AppError::Auth(AuthError::Forbidden).into()) })
            }
            None => {
                tracing::warn!(path = %req.path(), "Role check reached without identity");
                Box::pin(async { Err(AppError::Auth(AuthError::Unauthorized).into()) })
            }
        }
    }
}
