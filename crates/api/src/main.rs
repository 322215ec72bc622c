//! Order service entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use messaging::{AmqpTransport, Supervisor};
use saga::InMemoryOrderRepository;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

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

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect to the broker; the service is useless without it
    let transport = match AmqpTransport::connect(&config.broker).await {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to the message broker");
            std::process::exit(1);
        }
    };

    // 4. Wire the coordinator and start the broker jobs
    let repository = Arc::new(InMemoryOrderRepository::new());
    let coordinator = api::create_coordinator(transport.clone(), repository, &config);
    let mut supervisor = Supervisor::default();
    api::jobs::spawn_jobs(&mut supervisor, transport, coordinator.clone(), &config);

    // 5. Build the application
    let app = api::create_app(api::create_state(coordinator), metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, log_format = %config.log_format, "starting order service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    supervisor.shutdown().await;
    tracing::info!("server shut down gracefully");
}
