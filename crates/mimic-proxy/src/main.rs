use clap::Parser;
use mimic_proxy::cache::MatchTree;
use mimic_proxy::config::Config;
use mimic_proxy::filter::FilterRegistry;
use mimic_proxy::proxy::{run_metrics_server, HyperUpstream, LoopGuard, ProxyServer, Simulator};
use mimic_proxy::recording::{FileRecordingStore, Mode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mimic - record HTTP traffic and replay it from regex-matched recordings
#[derive(Parser, Debug)]
#[command(name = "mimic")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, env = "MIMIC_CONFIG")]
    config: Option<String>,

    /// Listen port, overrides the configuration file
    #[arg(short, long, env = "MIMIC_PORT")]
    port: Option<u16>,

    /// Mode at startup (PLAYBACK, RECORD, PLAYBACK_OR_RECORD, PASSTHROUGH,
    /// PLAYBACK_OR_PASSTHROUGH)
    #[arg(short, long, env = "MIMIC_MODE")]
    mode: Option<Mode>,

    /// Recording directory, overrides the configuration file
    #[arg(short, long, env = "MIMIC_RECORDINGS")]
    recordings: Option<String>,
}

fn load_config(args: &Args) -> Result<Config, anyhow::Error> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path);
            Config::from_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to load configuration '{path}': {e:#}"))?
        }
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(recordings) = &args.recordings {
        config.recordings.directory = recordings.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;

    let guard = Arc::new(LoopGuard::new(&config.management.hosts));
    let store = Arc::new(FileRecordingStore::new(&config.recordings.directory));
    let upstream = Arc::new(HyperUpstream::new(&config.upstream, Arc::clone(&guard))?);
    let filters = Arc::new(FilterRegistry::from_configs(&config.filters));
    let simulator = Arc::new(
        Simulator::new(Arc::new(MatchTree::new()), store, upstream, filters)
            .with_mode(config.mode)
            .with_allow_multiple_matching(config.recordings.allow_multiple_matching)
            .with_request_timeout(Duration::from_millis(config.listen.request_timeout_ms)),
    );

    match simulator.reload_recordings() {
        Ok(count) => info!(
            "Loaded {} recording(s) from {}",
            count, config.recordings.directory
        ),
        Err(e) => warn!("Could not load recordings: {}", e),
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    if config.recordings.stats_interval_secs > 0 {
        let simulator = Arc::clone(&simulator);
        let mut shutdown = shutdown_tx.subscribe();
        let period = Duration::from_secs(config.recordings.stats_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => info!("Replay statistics\n{}", simulator.collect_stats().render()),
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    let mut servers = vec![tokio::spawn(
        ProxyServer::new(Arc::clone(&simulator), guard, config.listen.clone())
            .run(shutdown_tx.subscribe()),
    )];
    if config.metrics.enabled {
        servers.push(tokio::spawn(run_metrics_server(
            config.metrics.clone(),
            shutdown_tx.subscribe(),
        )));
    }

    let servers = futures::future::try_join_all(servers);
    tokio::pin!(servers);

    let results = tokio::select! {
        results = &mut servers => results?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(());
            servers.await?
        }
    };
    for result in results {
        result?;
    }
    Ok(())
}
