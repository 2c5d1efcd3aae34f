use std::net::SocketAddr;

use anyhow::Context;

use crate::bus;

// Valori di default, sovrascrivibili da variabili d'ambiente
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_BROKER_DSN: &str = "redis://localhost:6379";
const DEFAULT_BUS_CAPACITY: usize = 1024;
const DEFAULT_DATABASE_URL: &str = "sqlite://data";
const DEFAULT_DB_NAME: &str = "default";
const DEFAULT_PAGE_LIMIT: u32 = 50;
const DEFAULT_RUST_LOG: &str = "info,parlor_server=debug";

/// Impostazioni del server, lette una volta sola all'avvio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    /// Indirizzo del bus: `redis://...` oppure `memory://` per il bus in-process.
    pub broker_dsn: String,
    /// Buffer per subscriber; oltre questa soglia un client lento perde i payload più vecchi.
    pub bus_capacity: usize,
    /// Directory del database (anche con prefisso `sqlite://`) oppure `sqlite::memory:`.
    pub database_url: String,
    pub db_name: String,
    pub page_limit: u32,
    /// Origini ammesse per CORS; `*` le ammette tutte.
    pub cors_origins: Vec<String>,
    pub rust_log: String,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Come `from_env` ma con una sorgente qualsiasi, comodo nei test.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let bind = var("BIND_ADDR", DEFAULT_BIND_ADDR);
        let bind_addr: SocketAddr = bind.parse().with_context(|| format!("parse BIND_ADDR {bind:?}"))?;

        let bus_capacity = match get("BUS_CAPACITY") {
            Some(raw) => raw.parse::<usize>().with_context(|| format!("parse BUS_CAPACITY {raw:?}"))?,
            None => DEFAULT_BUS_CAPACITY,
        };
        if bus_capacity == 0 || bus_capacity > bus::MAX_CAPACITY {
            anyhow::bail!("BUS_CAPACITY must be between 1 and {}", bus::MAX_CAPACITY);
        }
        let page_limit = match get("PAGE_LIMIT") {
            Some(raw) => raw.parse::<u32>().with_context(|| format!("parse PAGE_LIMIT {raw:?}"))?,
            None => DEFAULT_PAGE_LIMIT,
        };
        if page_limit == 0 {
            anyhow::bail!("PAGE_LIMIT must be greater than zero");
        }

        let cors_origins: Vec<String> = get("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            broker_dsn: var("BROKER_DSN", DEFAULT_BROKER_DSN),
            bus_capacity,
            database_url: var("DATABASE_URL", DEFAULT_DATABASE_URL),
            db_name: var("DB_NAME", DEFAULT_DB_NAME),
            page_limit,
            cors_origins,
            rust_log: var("RUST_LOG", DEFAULT_RUST_LOG),
        })
    }

    /// DSN del broker con le credenziali mascherate, da usare nei log.
    pub fn redacted_broker_dsn(&self) -> String {
        let dsn = &self.broker_dsn;
        match (dsn.find("://"), dsn.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}***{}", &dsn[..scheme_end + 3], &dsn[at..])
            }
            _ => dsn.clone(),
        }
    }
}
