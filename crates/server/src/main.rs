mod bootstrap;
mod events;
mod health;
mod services;

use std::time::Duration;

use anyhow::Result;
use knowbot_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use knowbot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let mut app = bootstrap::bootstrap_with_config(config).await?;
    app.resolve_bot_user_id().await;

    let server = app.config.server.clone();
    health::spawn(&server.bind_address, server.health_check_port, app.health_state()).await?;

    let address = format!("{}:{}", server.bind_address, server.events_port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let events_app = events::router(&server.events_path, app.events_state());
    let events_server = tokio::spawn(async move {
        axum::serve(listener, events_app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let socket_runner = app.socket_runner();
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        events_address = %address,
        events_path = %server.events_path,
        signature_verification = app.config.slack.signing_secret.is_some(),
        socket_mode = socket_runner.is_some(),
        "knowbot-server started"
    );
    let socket_task = socket_runner.map(|runner| tokio::spawn(async move { runner.start().await }));

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = server.graceful_shutdown_secs,
        "knowbot-server stopping"
    );

    if let Some(task) = socket_task {
        task.abort();
    }
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(Duration::from_secs(server.graceful_shutdown_secs), events_server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(error))) => {
            tracing::warn!(event_name = "system.server.serve_failed", correlation_id = "shutdown", error = %error, "events server exited with error");
        }
        Ok(Err(join_error)) => {
            tracing::warn!(event_name = "system.server.serve_failed", correlation_id = "shutdown", error = %join_error, "events server task failed");
        }
        Err(_) => {
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                correlation_id = "shutdown",
                "in-flight requests did not drain before the grace period"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
