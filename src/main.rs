use anyhow::Result;
use std::sync::Arc;

use session_keeper::{
    config, ApiClient, HttpSessionApi, QueryCache, SessionApi, SessionController, SessionState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = config::Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Session probe starting...");
    tracing::info!("API base URL: {}", config.base_url);

    // Initialize HTTP client
    let client = Arc::new(ApiClient::new(&config)?);
    tracing::info!("✅ HTTP client initialized with cookie store");

    let api: Arc<dyn SessionApi> = Arc::new(HttpSessionApi::new(client, &config));
    let controller = SessionController::new(api, QueryCache::new(), &config);

    // Resolve the current identity
    match controller.load().await {
        Ok(SessionState::Authenticated(identity)) => {
            tracing::info!(
                "✅ Authenticated as id={} role={}",
                identity.id,
                identity.role
            );
        }
        Ok(SessionState::Unauthenticated) => {
            tracing::info!("Not logged in - sign in and run the probe again");
            return Ok(());
        }
        Ok(SessionState::Unknown) => {
            tracing::warn!("Identity could not be resolved yet");
            return Ok(());
        }
        Err(e) => {
            tracing::error!("❌ Could not determine session state: {}", e);
            anyhow::bail!("Identity request failed: {}", e);
        }
    }

    tracing::info!(
        "Keeping session alive (refresh every {}s), press Ctrl+C to stop",
        config.refresh_interval.as_secs()
    );
    shutdown_signal().await;

    controller.shutdown();
    tracing::info!("👋 Session probe stopped");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
