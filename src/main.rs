use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mailbox_auth::config::Configuration;
use mailbox_auth::issuer::TokenIssuer;
use mailbox_auth::{app, initialize_state, telemetry};
use opentelemetry::global;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Configuration::default()
        .path(
            std::env::var("CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_default(),
        )
        .read()?;

    // initialize tracing, with OTLP export when configured.
    let endpoint = config
        .telemetry
        .as_ref()
        .and_then(|telemetry| telemetry.otlp_endpoint.clone());
    let otlp_logs = match endpoint.as_deref() {
        Some(endpoint) => {
            global::set_tracer_provider(telemetry::setup_tracer(endpoint)?);
            Some(telemetry::setup_logging(endpoint)?)
        },
        None => None,
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(otlp_logs)
        .init();

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "prometheus recorder not installed");
            None
        },
    };

    let state = initialize_state(Arc::clone(&config), metrics).await?;

    purge_expired_tokens(
        Arc::clone(&state.issuer),
        Duration::from_secs(config.token.purge_interval.max(1)),
    );

    let listener = TcpListener::bind(("0.0.0.0", config.port())).await?;
    tracing::info!(address = %listener.local_addr()?, version = config.version(), "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Periodically drop refresh tokens past their expiry from the store.
fn purge_expired_tokens(issuer: Arc<TokenIssuer>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match issuer.purge_expired().await {
                Ok(0) => (),
                Ok(count) => tracing::info!(count, "expired refresh tokens purged"),
                Err(err) => tracing::error!(error = %err, "failed to purge refresh tokens"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => tracing::error!(error = %err, "failed to install signal handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
