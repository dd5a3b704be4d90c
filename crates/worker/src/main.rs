//! Payment worker entry point.

use std::sync::Arc;

use broker::AmqpBroker;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use worker::{QueueConsumer, WorkerConfig};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = WorkerConfig::from_env();
    worker::telemetry::init(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Wire the saga to the downstream services and the broker
    let coordinator = Arc::new(worker::create_coordinator(&config));
    let broker = Arc::new(AmqpBroker::new(&config.rabbitmq_url));
    let consumer = QueueConsumer::from_config(broker, coordinator, &config);

    // 4. Start consuming
    let shutdown = CancellationToken::new();
    let consumer_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { consumer.run(shutdown).await }
    });

    // 5. Serve health and metrics until a signal arrives
    let addr = config.addr();
    tracing::info!(%addr, queue = %config.queue_name, "starting payment worker");
    let server_shutdown = shutdown.clone();
    worker::serve(&addr, metrics_handle, async move {
        shutdown_signal().await;
        server_shutdown.cancel();
    })
    .await
    .expect("server error");

    // 6. Let the in-flight saga finish and close the broker connection
    shutdown.cancel();
    if let Err(e) = consumer_task.await {
        tracing::error!(error = %e, "consumer task failed");
    }

    tracing::info!("worker shut down gracefully");
}
