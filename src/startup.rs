use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::configuration::CookieSettings;
use crate::error::{AppError, ValidationError};
use crate::logger::LoggerMiddleware;
use crate::middleware::{JwtAuth, RequireRole, SessionLifecycle};
use crate::models::Role;
use crate::routes::{change_password, health_check, login, logout, me, refresh, revoke_sessions};
use crate::session::SessionFactory;

/// Malformed or missing JSON bodies get the same 400 shape as field errors
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        tracing::warn!(error = %err, "Rejected request body");
        AppError::from(ValidationError::MalformedBody(err.to_string())).into()
    })
}

pub fn run<F: SessionFactory>(
    listener: TcpListener,
    factory: F,
    auth: AuthService,
    cookies: CookieSettings,
) -> Result<Server, std::io::Error> {
    let codec = Arc::new(auth.codec().clone());
    let factory_data = web::Data::new(factory.clone());
    let auth_data = web::Data::new(auth);
    let cookie_data = web::Data::new(cookies);

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())      // Standard access log
            .wrap(LoggerMiddleware)       // Timing + request id

            // Shared state
            .app_data(json_config())
            .app_data(factory_data.clone())
            .app_data(auth_data.clone())
            .app_data(cookie_data.clone())

            .route("/health", web::get().to(health_check::<F>))

            // Every /api request runs inside one session
            .service(
                web::scope("/api")
                    .wrap(SessionLifecycle::new(factory.clone()))
                    .service(
                        web::scope("/auth")
                            .route("/login", web::post().to(login::<F::Session>))
                            .route("/refresh", web::post().to(refresh::<F::Session>))
                            .route("/logout", web::post().to(logout::<F::Session>))
                            .service(
                                web::resource("/me")
                                    .wrap(JwtAuth::new(codec.clone()))
                                    .route(web::get().to(me::<F::Session>)),
                            ),
                    )
                    .service(
                        web::scope("/password")
                            .wrap(JwtAuth::new(codec.clone()))
                            .route("/change", web::post().to(change_password::<F::Session>)),
                    )
                    .service(
                        web::scope("/admin")
                            .wrap(RequireRole::new(Role::Admin))
                            .wrap(JwtAuth::new(codec.clone()))
                            .route(
                                "/users/{id}/revoke-sessions",
                                web::post().to(revoke_sessions::<F::Session>),
                            ),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
