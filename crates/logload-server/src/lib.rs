//! logload trigger host
//!
//! An HTTP receiver for the events that start the pipeline stages. Each route
//! decodes a CloudEvent, runs one stage invocation and answers `200` with a
//! JSON report, `400` for an event that can never succeed, or `500` so the
//! trigger redelivers.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use routes::AppState;

use axum::Router;

/// Build the application router with all routes and middleware
pub fn app(state: AppState) -> Router {
    routes::router(state).layer(middleware::tracing_layer())
}
