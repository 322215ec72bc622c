//! Order service host.
//!
//! Provides REST endpoints over the order coordinator, the broker jobs the
//! order service runs in the background, structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod jobs;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use messaging::{BrokerEventPublisher, BrokerRpcClient, Transport};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{OrderCoordinator, OrderRepository};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            get(routes::orders::list).post(routes::orders::create),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get)
                .put(routes::orders::update)
                .delete(routes::orders::delete),
        )
        .route("/orders/{id}/status", axum::routing::put(routes::orders::update_status))
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

/// Wires the order coordinator to a broker transport and a repository.
pub fn create_coordinator<T: Transport>(
    transport: Arc<T>,
    repository: Arc<dyn OrderRepository>,
    config: &Config,
) -> Arc<OrderCoordinator> {
    let rpc = BrokerRpcClient::from_config(transport.clone(), &config.broker);
    let publisher = BrokerEventPublisher::new(transport);
    Arc::new(OrderCoordinator::new(
        repository,
        Arc::new(rpc),
        Arc::new(publisher),
        config.coordinator(),
    ))
}

/// Creates the application state around a coordinator.
pub fn create_state(coordinator: Arc<OrderCoordinator>) -> Arc<AppState> {
    Arc::new(AppState { coordinator })
}
