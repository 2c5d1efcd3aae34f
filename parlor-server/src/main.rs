use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ri-utilizziamo le funzioni e strutture definite in lib.rs
use parlor_server::{config::Settings, serve, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Leggi la configurazione dall'ambiente
    let settings = Settings::from_env().context("load settings")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(settings.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Store (con migrazioni) e bus
    let state = AppState::from_settings(&settings).await?;

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .context("bind tcp listener")?;
    tracing::info!(addr = %settings.bind_addr, "listening");

    // Al segnale di stop cancelliamo il token: le sessioni relay si chiudono e serve() drena
    tokio::spawn(cancel_on_signal(state.shutdown.clone()));

    serve(listener, state).await.context("server shutdown")?;
    tracing::info!("bye");
    Ok(())
}

async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
    token.cancel();
}
