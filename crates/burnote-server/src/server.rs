use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    handlers::{create_note, head_note, health, read_note, reap_notes},
    service::NoteService,
    store::Store,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    /// Keep notes in memory only (`$BURNOTE_IN_MEMORY`).
    pub in_memory: bool,
    pub sweep_interval: Duration,
    /// Base for returned note links (`$BURNOTE_PUBLIC_URL`); defaults to `http://{host}:{port}`.
    pub public_url: Option<String>,
    pub cors_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("BURNOTE_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("BURNOTE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("BURNOTE_DATA_DIR").ok().map(PathBuf::from),
            in_memory: std::env::var("BURNOTE_IN_MEMORY")
                .map(|v| is_truthy(&v))
                .unwrap_or(false),
            sweep_interval: Duration::from_secs(
                std::env::var("BURNOTE_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|&secs| secs > 0)
                    .unwrap_or(300),
            ),
            public_url: std::env::var("BURNOTE_PUBLIC_URL").ok(),
            cors_origins: std::env::var("BURNOTE_CORS_ORIGINS").ok(),
        }
    }
}

impl ServerConfig {
    fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Resolve the data directory holding `burnote.db`, creating it if needed.
///
/// Priority: explicit `data_dir`, then `$BURNOTE_DATA_DIR`, then the platform
/// app data dir (`~/.local/share/burnote/`, etc.).
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let dir = match data_dir {
        Some(d) => d.clone(),
        None => match std::env::var("BURNOTE_DATA_DIR") {
            Ok(d) => PathBuf::from(d),
            Err(_) => ProjectDirs::from("", "", "burnote")
                .context("could not determine platform data directory")?
                .data_dir()
                .to_owned(),
        },
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create data dir: {}", dir.display()))?;
    Ok(dir)
}

fn open_store(cfg: &ServerConfig) -> Result<Store> {
    if cfg.in_memory {
        info!("using in-memory store; notes will not survive a restart");
        return Store::in_memory().context("open in-memory store");
    }
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");
    Store::open(&data_dir.join("burnote.db")).context("open store")
}

/// Build the HTTP router. `HEAD /notes/{id}` is routed separately so a check
/// never falls through to the consuming `GET` handler.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/notes", post(create_note))
        .route("/notes/{id}", get(read_note).head(head_note))
        .route("/reap", post(reap_notes))
        .with_state(state)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let store = open_store(&cfg)?;

    store.clone().spawn_sweep(cfg.sweep_interval);
    info!(interval_secs = cfg.sweep_interval.as_secs(), "expiry sweep started");

    let state = AppState {
        service: NoteService::new(store),
        public_url: cfg.public_url(),
    };

    let app = router(state)
        .layer(build_cors(cfg.cors_origins.as_deref()))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "burnote server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::HEAD,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers([
            http::HeaderName::from_static("x-burnote-remaining-views"),
            http::HeaderName::from_static("x-burnote-expires-at"),
            http::HeaderName::from_static("x-burnote-created-at"),
        ]);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
