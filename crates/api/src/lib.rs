//! HTTP API server for the allocation service.
//!
//! Exposes batch registration and order-line allocation over REST, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use persistence::SessionFactory;
use service::{AllocationService, LogNotifier, MessageBus, Notifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::allocations::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<F: SessionFactory + Clone + 'static>(
    state: Arc<AppState<F>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/batches", post(routes::allocations::add_batch::<F>))
        .route("/allocate", post(routes::allocations::allocate::<F>))
        .route("/deallocate", post(routes::allocations::deallocate::<F>))
        .route("/allocations/{sku}", get(routes::allocations::list::<F>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state with the given notifier.
pub fn create_state<F: SessionFactory + Clone>(
    factory: F,
    notifier: Arc<dyn Notifier>,
) -> Arc<AppState<F>> {
    let bus = Arc::new(MessageBus::with_default_handlers(notifier));
    Arc::new(AppState {
        service: AllocationService::new(factory, bus),
    })
}

/// Creates the default application state, logging notifications.
pub fn create_default_state<F: SessionFactory + Clone>(factory: F) -> Arc<AppState<F>> {
    create_state(factory, Arc::new(LogNotifier))
}
