use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "burnote", about = "Burnote: notes that burn after reading", version)]
struct Cli {
    /// Burnote server URL (default: http://localhost:8080 or $BURNOTE_SERVER)
    #[arg(long, env = "BURNOTE_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Burnote HTTP server
    Serve {
        /// Port to listen on (default: $BURNOTE_PORT or 8080)
        #[arg(long, env = "BURNOTE_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $BURNOTE_HOST or 0.0.0.0)
        #[arg(long, env = "BURNOTE_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Directory for burnote.db (default: $BURNOTE_DATA_DIR or the platform data dir)
        #[arg(long, env = "BURNOTE_DATA_DIR")]
        data_dir: Option<PathBuf>,
        /// Keep notes in memory only
        #[arg(long, env = "BURNOTE_IN_MEMORY")]
        in_memory: bool,
    },
    /// Create a note and print its link
    Create {
        /// Note content
        content: String,
        /// How many times the note may be read
        #[arg(long)]
        views: u32,
        /// Expiry date, YYYY-MM-DD
        #[arg(long)]
        expires: String,
    },
    /// Read a note, spending one view
    Read {
        /// Note id
        id: String,
    },
    /// Delete all expired notes immediately
    Reap,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("BURNOTE_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            data_dir,
            in_memory,
        } => {
            let cfg = burnote_server::ServerConfig {
                host,
                port,
                data_dir,
                in_memory,
                ..Default::default()
            };
            burnote_server::run(cfg).await
        }

        Commands::Create {
            content,
            views,
            expires,
        } => cmd_create(&cli.server, &content, views, &expires).await,

        Commands::Read { id } => cmd_read(&cli.server, &id).await,

        Commands::Reap => cmd_reap(&cli.server).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_create(server: &str, content: &str, views: u32, expires: &str) -> Result<()> {
    let body = serde_json::json!({
        "content": content,
        "max_views": views,
        "expire_at": expires,
    });

    let resp = Client::new()
        .post(endpoint(server, "/notes"))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;

    match status {
        StatusCode::CREATED => {
            println!("{}", json["url"].as_str().unwrap_or_default());
            Ok(())
        }
        StatusCode::BAD_REQUEST => {
            let errors: Vec<&str> = json["errors"]
                .as_array()
                .map(|a| a.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            anyhow::bail!("{}", errors.join(" "));
        }
        _ => anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        ),
    }
}

async fn cmd_read(server: &str, id: &str) -> Result<()> {
    let resp = Client::new()
        .get(endpoint(server, &format!("/notes/{id}")))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;

    if status.is_success() {
        println!("{}", json["content"].as_str().unwrap_or_default());
        if let Some(left) = json["remaining_views"].as_u64() {
            eprintln!("({left} view(s) left)");
        }
        Ok(())
    } else {
        let error = json["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("{error}");
    }
}

async fn cmd_reap(server: &str) -> Result<()> {
    let resp = Client::new()
        .post(endpoint(server, "/reap"))
        .send()
        .await
        .context("HTTP request failed")?;

    if resp.status().is_success() {
        let json: Value = resp.json().await?;
        let n = json["reaped"].as_u64().unwrap_or(0);
        println!("reaped {n} expired note(s)");
        Ok(())
    } else {
        let status = resp.status();
        anyhow::bail!("server returned {status}");
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn endpoint(server: &str, path: &str) -> String {
    format!("{}{}", server.trim_end_matches('/'), path)
}
