use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use theresa::config::Config;
use theresa::feed::FeedPoller;
use theresa::irc::SessionFactory;
use theresa::twitter::{HttpStatusLookup, StatusLookup};

#[derive(Parser, Debug)]
#[command(
    name = "theresa",
    version,
    about = "IRC bot that announces webcomic updates and expands status links"
)]
struct Args {
    /// Config file (default: ~/.config/theresa/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Load and validate the configuration, print it, and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("theresa=info")),
        )
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_path()
            .context("HOME environment variable not set; pass --config explicitly")?,
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    if args.check_config {
        println!("{config:#?}");
        return Ok(());
    }

    let client = reqwest::Client::builder()
        .user_agent(concat!("theresa/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let lookup: Arc<dyn StatusLookup> = Arc::new(
        HttpStatusLookup::new(
            client.clone(),
            &config.twitter_api_base,
            config.bearer_token(),
        )
        .context("Invalid twitter_api_base")?,
    );
    let router = Arc::new(config.chat_router(lookup));
    let factory = Arc::new(SessionFactory::new());

    let poller = FeedPoller::new(client, config.poller_config(), Arc::clone(&factory));
    let poller_task = tokio::spawn(poller.run());

    tracing::info!(
        server = %config.endpoint(),
        channel = %config.channel,
        feed = %config.feed_url,
        "Starting"
    );

    tokio::select! {
        _ = Arc::clone(&factory).run(
            config.endpoint(),
            Arc::new(config.session_config()),
            router,
        ) => {}
        _ = shutdown_signal() => {
            tracing::info!("Shutting down");
        }
    }

    poller_task.abort();
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
