//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and service construction
//! - `routes/`: HTTP routes + handlers (one file per domain area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses
//! - `extract.rs`: JSON body / query extractors that reject with those responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::config::Settings;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod extract;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(settings: &Settings) -> anyhow::Result<Router> {
    let services = services::build_services(settings).await?;
    Ok(router(Arc::new(services)))
}

/// Router over already-built services.
pub fn router(services: Arc<AppServices>) -> Router {
    // Domain routes require tenant + user context.
    let protected = routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(middleware::request_context))
            .layer(Extension(services)),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
