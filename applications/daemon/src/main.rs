/// Ambience daemon - background music with scheduled content
use ambience_daemon::{config::DaemonConfig, join_tasks, open_output, rotation};
use ambience_playback::{MediaLoader, PlaybackEngine, RecoveryWatchdog, SymphoniaLoader};
use ambience_schedule::{
    evaluator, Catalog, ExecutionStore, JsonCatalogProvider, JsonExecutionStore,
    ScheduleOrchestrator,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ambience-daemon")]
#[command(about = "Background music player with scheduled content injection", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "AMBIENCE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play the music bed and fire schedules until interrupted
    Run,
    /// Validate the configuration and the catalog
    Check,
    /// Show when each schedule fires next
    NextFire {
        /// Only this schedule
        #[arg(short, long)]
        schedule: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout may carry PCM
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ambience_daemon=info,ambience_playback=info,ambience_schedule=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = DaemonConfig::load(cli.config.as_deref())?;
    config.validate()?;

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::Check => check(&config).await?,
        Commands::NextFire { schedule } => next_fire(&config, schedule.as_deref()).await?,
    }

    Ok(())
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    tracing::info!("Starting Ambience daemon");
    tracing::info!("Catalog: {}", config.catalog.path.display());

    let catalog = Catalog::load(&config.catalog.path).await?;
    tracing::info!(
        "Catalog loaded: {} music tracks, {} schedules",
        catalog.music.len(),
        catalog.schedules.len()
    );

    // Initialize playback engine
    let output = open_output(&config.output)?;
    let loader: Arc<dyn MediaLoader> = Arc::new(SymphoniaLoader::new(config.engine.sample_rate));
    let engine = PlaybackEngine::start(config.engine.clone(), loader, output);
    tracing::info!("Playback engine started at {} Hz", config.engine.sample_rate);

    // Start the music bed
    let rotation = Arc::new(Mutex::new(rotation::MusicRotation::new(
        catalog.music.clone(),
        config.rotation.avoid_same_artist,
        config.rotation.seed,
    )));
    rotation::attach(&engine, Arc::clone(&rotation));
    if !rotation::advance(&engine, &rotation).await {
        tracing::warn!("Running without a music bed");
    }

    let cancel = CancellationToken::new();

    // Initialize watchdog
    let watchdog = RecoveryWatchdog::new(engine.clone(), config.watchdog.clone())
        .spawn(cancel.child_token());

    // Initialize schedule orchestrator
    let store = open_store(&config).await?;
    let orchestrator = ScheduleOrchestrator::new(
        JsonCatalogProvider::new(&config.catalog.path),
        store,
        engine.clone(),
        config.schedule.clone(),
    )
    .spawn(cancel.child_token());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    cancel.cancel();
    join_tasks(vec![("watchdog", watchdog), ("orchestrator", orchestrator)]).await;
    engine.destroy().await;

    Ok(())
}

async fn open_store(config: &DaemonConfig) -> anyhow::Result<JsonExecutionStore> {
    let path = &config.state.executions_path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(JsonExecutionStore::open(path, config.schedule.retention()).await?)
}

async fn check(config: &DaemonConfig) -> anyhow::Result<()> {
    let catalog = Catalog::load(&config.catalog.path).await?;
    let valid = catalog.valid_schedules();

    println!("Catalog: {}", config.catalog.path.display());
    println!("  Music tracks: {}", catalog.music.len());
    println!(
        "  Schedules: {} valid, {} invalid",
        valid.len(),
        catalog.schedules.len() - valid.len()
    );

    let missing: Vec<&str> = catalog
        .music
        .iter()
        .filter(|t| SymphoniaLoader::resolve_path(&t.source_uri).is_err())
        .map(|t| t.source_uri.as_str())
        .collect();
    for uri in &missing {
        println!("  Not playable locally: {}", uri);
    }

    if valid.len() < catalog.schedules.len() {
        anyhow::bail!("catalog contains invalid schedules");
    }
    Ok(())
}

async fn next_fire(config: &DaemonConfig, only: Option<&str>) -> anyhow::Result<()> {
    let catalog = Catalog::load(&config.catalog.path).await?;
    let store = JsonExecutionStore::open(&config.state.executions_path, config.schedule.retention()).await?;
    let now = Local::now().naive_local();

    for def in catalog.valid_schedules() {
        if only.is_some_and(|id| id != def.id.as_str()) {
            continue;
        }
        let last = store.last_execution(&def.id).await?;
        match evaluator::next_fire_after(&def, now, last) {
            Some(at) => println!(
                "{:<24} {}  ({})",
                def.id.as_str(),
                at.format("%Y-%m-%d %H:%M"),
                def.name
            ),
            None => println!("{:<24} never  ({})", def.id.as_str(), def.name),
        }
    }

    Ok(())
}
