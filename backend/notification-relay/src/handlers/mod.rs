/// HTTP and WebSocket handlers
pub mod listen;
pub mod notify;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::metrics;
use crate::state::AppState;

pub use listen::listen;
pub use notify::notify;

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/notify").route(web::route().to(notify)))
        .route("/listen", web::get().to(listen))
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics::serve_metrics));
}

/// Liveness endpoint for orchestrators
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "notification-relay",
        "connections": state.registry.len().await,
    }))
}
