//! Payment worker: consumes settled payments from a durable queue and runs
//! the fulfillment saga for each, one at a time.
//!
//! Also serves `/health` and Prometheus `/metrics` over HTTP.

pub mod config;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod routes;
pub mod telemetry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemorySagaJournal, SagaCoordinator};
use services::{
    RpcOrderService, RpcProductService, RpcReceiptService, RpcTransport, RpcUserService,
    TcpTransport,
};
use tower_http::trace::TraceLayer;

pub use config::{LogFormat, ServiceEndpoint, WorkerConfig};
pub use consumer::{MessageOutcome, QueueConsumer};
pub use error::{Result, WorkerError};
pub use handler::PaymentHandler;

/// Saga coordinator wired to the downstream services over TCP.
pub type RpcCoordinator = SagaCoordinator<
    RpcReceiptService,
    RpcOrderService,
    RpcProductService,
    RpcUserService,
    InMemorySagaJournal,
>;

/// Creates the Axum router for the health and metrics endpoints.
pub fn create_app(metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}

/// Builds the saga coordinator with one TCP client per downstream service.
pub fn create_coordinator(config: &WorkerConfig) -> RpcCoordinator {
    let transport = |service: &str, endpoint: &ServiceEndpoint| -> Arc<dyn RpcTransport> {
        Arc::new(TcpTransport::new(service, endpoint.addr()))
    };
    let timeout: Duration = config.rpc_timeout;

    SagaCoordinator::new(
        RpcReceiptService::new(transport("receipt", &config.receipt_service), timeout),
        RpcOrderService::new(transport("order", &config.order_service), timeout),
        RpcProductService::new(transport("product", &config.product_service), timeout),
        RpcUserService::new(transport("user", &config.user_service), timeout),
        InMemorySagaJournal::with_capacity(config.journal_capacity),
    )
}

/// Binds the health listener and serves until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    metrics_handle: PrometheusHandle,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_app(metrics_handle))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
