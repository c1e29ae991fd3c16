//! Service entrypoint.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use langid::config::ServerConfig;
use langid::corpus::{CorpusPool, NgramCorpus, UserLanguageIndex};
use langid::detector::Detector;
use langid::server::{self, AppState};

/// Statistical language identification service.
#[derive(Debug, Parser)]
#[command(name = "langid", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Corpus database location (overrides the config file).
    #[arg(long)]
    database: Option<PathBuf>,

    /// Bind address as host:port (overrides the config file).
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "langid=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(database) = args.database {
        config.database = database;
    }
    if let Some(listen) = args.listen {
        let addr: std::net::SocketAddr =
            listen.parse().context("invalid --listen address")?;
        config.host = addr.ip().to_string();
        config.port = addr.port();
    }

    let pool = Arc::new(CorpusPool::open(&config.database).with_context(|| {
        format!("failed to open corpus database {}", config.database.display())
    })?);
    tracing::info!(database = %config.database.display(), "corpus opened");

    let detector = Detector::new(
        NgramCorpus::new(Arc::clone(&pool)),
        UserLanguageIndex::new(pool),
    );
    let state = AppState {
        detector: Arc::new(detector),
    };

    server::serve(config.bind_addr()?, state).await
}
