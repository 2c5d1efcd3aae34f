use anyhow::Context;
use axum::http::StatusCode;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub mod bus;
pub mod config;
pub mod controllers;
pub mod error;
pub mod mutations;
pub mod relay;
pub mod routes;
pub mod store;

use bus::EventBus;
use config::Settings;
use mutations::WriteLocks;
use store::MessageStore;

const MEMORY_URL: &str = "sqlite::memory:";

/// Stato condiviso da handler HTTP e sessioni WS.
/// Non contiene nessuna lista di client connessi: ogni sessione ha la sua sottoscrizione al bus.
#[derive(Clone)]
pub struct AppState {
    pub store: MessageStore,
    pub bus: EventBus,
    pub page_limit: u32,
    pub cors_origins: Vec<String>,
    /// Cancellato allo shutdown: tutte le sessioni relay si chiudono.
    pub shutdown: CancellationToken,
    /// Tiene traccia dei task delle sessioni per poterle aspettare allo shutdown.
    pub sessions: TaskTracker,
    pub write_locks: WriteLocks,
}

impl AppState {
    pub fn new(store: MessageStore, bus: EventBus, page_limit: u32) -> Self {
        Self {
            store,
            bus,
            page_limit,
            cors_origins: Vec::new(),
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
            write_locks: WriteLocks::default(),
        }
    }

    /// Connette store e bus secondo le impostazioni ed esegue le migrazioni.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let db_url = build_sqlite_url(&settings.database_url, &settings.db_name)
            .context("build sqlite url")?;
        tracing::info!(db_url = %db_url, "using database");
        let pool = connect_pool(&db_url).await.context("connect to sqlite")?;
        run_migrations(&pool).await.context("run migrations")?;

        tracing::info!(broker = %settings.redacted_broker_dsn(), "connecting to event bus");
        let bus = EventBus::connect(&settings.broker_dsn, settings.bus_capacity)
            .await
            .context("connect to event bus")?;

        let mut state = Self::new(MessageStore::new(pool), bus, settings.page_limit);
        state.cors_origins = settings.cors_origins.clone();
        Ok(state)
    }
}

// Dato un percorso di file, restituisce un URL SQLite valido. Crea le directory genitrici se non esistono.
pub fn sqlite_url_for_path(p: &Path) -> anyhow::Result<String> {
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()?.join(p)
    };
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent dirs for {:?}", parent))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&abs)
        .with_context(|| format!("create/open sqlite file {:?}", abs))?;
    let s = abs.to_string_lossy().replace('\\', "/");
    Ok(format!("sqlite://{}", s))
}

/// Costruisce l'URL SQLite a partire dall'indirizzo dello store (una directory, anche con
/// prefisso "sqlite://") e dal nome del database: il file è `<dir>/<db_name>.db`.
/// "sqlite::memory:" viene passato così com'è.
pub fn build_sqlite_url(database_url: &str, db_name: &str) -> anyhow::Result<String> {
    if database_url == MEMORY_URL {
        return Ok(database_url.to_string());
    }
    let dir = database_url.strip_prefix("sqlite://").unwrap_or(database_url);
    sqlite_url_for_path(&PathBuf::from(dir).join(format!("{db_name}.db")))
}

// Connect to the database and return a connection pool.
pub async fn connect_pool(db_url: &str) -> anyhow::Result<SqlitePool> {
    // in memoria ogni connessione avrebbe il suo database: ne teniamo una sola, per sempre
    let pool = if db_url == MEMORY_URL {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(db_url)
            .await
    } else {
        SqlitePool::connect(db_url).await
    };
    pool.with_context(|| format!("connect to sqlite via {}", db_url))
}

// Esegue le migrazioni del database. Crea tabelle e indici se non esistono.
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            id          TEXT NOT NULL UNIQUE,
            body        TEXT NOT NULL,
            author_id   TEXT NOT NULL,
            author_name TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER
        );"#,
        r#"
        CREATE INDEX IF NOT EXISTS messages_newest_first
            ON messages (created_at DESC, seq DESC);"#,
    ];
    // applica ogni statement di migrazione
    for s in &stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .with_context(|| format!("apply migration: {}", &s[..s.len().min(40)].replace('\n', " ")))?;
    }
    Ok(())
}

/// Controlla lo stato di salute del database tentando di acquisire una connessione dal pool.
pub async fn health_with_pool(pool: &SqlitePool) -> StatusCode {
    match pool.acquire().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Salute complessiva: store raggiungibile e bus che risponde al ping.
pub async fn health(state: &AppState) -> StatusCode {
    let store = health_with_pool(state.store.pool()).await;
    if !store.is_success() {
        return store;
    }
    match state.bus.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "event bus ping failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Serve HTTP e WS finché `state.shutdown` non viene cancellato, poi drena:
/// prima chiude tutte le sessioni relay (ognuna toglie la sua sottoscrizione),
/// poi rilascia bus e pool del database.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = routes::router(state.clone());
    let shutdown = state.shutdown.clone();

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("http server")?;

    // le connessioni WS "upgraded" non sono seguite da axum: le aspettiamo noi
    state.shutdown.cancel();
    state.sessions.close();
    state.sessions.wait().await;
    tracing::info!("all relay sessions closed");

    state.bus.close();
    state.store.pool().close().await;
    Ok(())
}
