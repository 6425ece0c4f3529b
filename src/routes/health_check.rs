use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::session::SessionFactory;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

/// GET /health
///
/// 503 when the storage backend does not answer.
pub async fn health_check<F: SessionFactory>(factory: web::Data<F>) -> HttpResponse {
    match factory.ping().await {
        Ok(()) => {
            tracing::debug!("Health check endpoint called");
            HttpResponse::Ok().json(HealthResponse {
                status: "ok".to_string(),
                database: "ok".to_string(),
            })
        }
        Err(e) => {
            tracing::error!(error = %e, "Health check failed: database unavailable");
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "unavailable".to_string(),
                database: "unavailable".to_string(),
            })
        }
    }
}
