/// Session Lifecycle Middleware
///
/// Opens one session per request, exposes it to handlers as a
/// [`RequestSession`], and performs the request's single terminal action
/// once the inner service is done: commit when the response carries no
/// error, rollback otherwise.

use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    Error, FromRequest, HttpMessage, HttpRequest,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;

use crate::error::AppError;
use crate::session::{RequestSession, Session, SessionFactory};

pub struct SessionLifecycle<F> {
    factory: F,
}

impl<F: SessionFactory> SessionLifecycle<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<S, B, F> Transform<S, ServiceRequest> for SessionLifecycle<F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
    F: SessionFactory,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SessionLifecycleService<S, F>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SessionLifecycleService {
            service: Rc::new(service),
            factory: self.factory.clone(),
        }))
    }
}

pub struct SessionLifecycleService<S, F> {
    service: Rc<S>,
    factory: F,
}

impl<S, B, F> Service<ServiceRequest> for SessionLifecycleService<S, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
    F: SessionFactory,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let handle = RequestSession::new(self.factory.open());
        req.extensions_mut().insert(handle.clone());

        let service = Rc::clone(&self.service);

        Box::pin(async move {
            let result = service.call(req).await;

            let failed = match &result {
                Ok(res) => res.response().error().is_some(),
                Err(_) => true,
            };

            if let Err(e) = handle.finish(failed).await {
                tracing::error!(error = %e, failed = failed, "Session terminal action failed");
                // Only a failed commit replaces an otherwise successful response
                if !failed {
                    return Err(e.into());
                }
            }

            result
        })
    }
}

/// Handlers inside the lifecycle scope take the session as an argument
impl<S: Session + 'static> FromRequest for RequestSession<S> {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<RequestSession<S>>()
                .cloned()
                .ok_or_else(|| AppError::Internal("no session attached to request".to_string())),
        )
    }
}
