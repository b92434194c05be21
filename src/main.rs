use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceprofile::{config, create_router, profile, Analyzer, AppState};
use log::info;

#[derive(Parser)]
#[command(name = "faceprofile")]
#[command(version, about = "Face profile service - describe and verify faces in photos")]
struct Cli {
    /// Config file (defaults to the system config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the profile HTTP API
    Serve {
        /// Address to listen on, overrides the config file
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Print the profile of a local image as JSON
    Analyze {
        /// Image file to analyze
        image: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => serve(cfg, bind).await,
        Commands::Analyze { image } => analyze(&cfg, &image),
    }
}

fn load_analyzer(cfg: &config::Config) -> Result<Analyzer> {
    info!(
        "Loading models: cascade={}, age={}, gender={}",
        cfg.models.cascade.display(),
        cfg.models.age.display(),
        cfg.models.gender.display()
    );
    Analyzer::load(&cfg.models).context("Failed to load models")
}

async fn serve(cfg: config::Config, bind: Option<String>) -> Result<()> {
    let analyzer = load_analyzer(&cfg)?;
    let app = create_router(AppState::new(analyzer), cfg.max_upload_bytes);

    let addr = bind.unwrap_or(cfg.bind);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

fn analyze(cfg: &config::Config, path: &Path) -> Result<()> {
    let analyzer = load_analyzer(cfg)?;
    let img = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let profile = profile::create_profile(&analyzer, &img)?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}
