//! Playground UI server - web front end for editing and running sessions.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use playground::io::compat_file::load_compat_table;
use playground::io::config::{DEFAULT_CONFIG_FILE, load_config};
use playground::io::worker::ProcessSpawner;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "playground-ui")]
#[command(about = "Web UI for running playground sessions")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Engine config file (TOML)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory containing UI static files (defaults to ./ui/dist)
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("playground_ui=info".parse()?)
                .add_directive("playground=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = load_config(&args.config)?;
    let compat = load_compat_table(config.compat_path.as_deref())?;
    info!(
        config = %args.config.display(),
        worker = ?config.worker.command,
        "starting playground-ui"
    );

    let spawner = ProcessSpawner::new(config.worker.command.clone());
    let state = AppState::new(spawner, config, compat);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state);

    let ui_dir = args
        .ui_dir
        .unwrap_or_else(|| PathBuf::from("ui").join("dist"));

    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
