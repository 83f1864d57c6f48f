use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tarantella_import_server::config::{self, AppConfig};
use tarantella_import_server::fingerprint::{FolderClassifier, HashCache};
use tarantella_import_server::jobs::{JobDispatcher, WorkerEnv};
use tarantella_import_server::library::{MusicLibrary, PluginHub, SqliteMusicLibrary};
use tarantella_import_server::matcher::{MetadataSource, NoOpMetadataSource};
use tarantella_import_server::server::websocket::ConnectionManager;
use tarantella_import_server::server::{run_server, ServerState};
use tarantella_import_server::state::DuplicateAction;
use tarantella_import_server::status::StatusBroadcaster;
use tarantella_import_server::store::{SessionStore, SqliteSessionStore};
use tarantella_import_server::watcher::InboxWatcher;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {e}"))?;
    Ok(cwd.join(path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {s}"));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {s}"));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
#[command(version = env!("APP_VERSION"))]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI
    /// arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the databases (sessions.db, library.db).
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Directory the library moves imported audio files into.
    #[clap(long, value_parser = parse_path)]
    pub library_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 5001)]
    pub port: u16,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            library_dir: args.library_dir.clone(),
            port: args.port,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  library_dir: {:?}", app_config.library_dir);
    info!("  port: {}", app_config.port);
    info!("  inboxes: {}", app_config.inboxes.len());

    let classifier = FolderClassifier::new(
        app_config
            .fingerprint
            .audio_extensions
            .clone()
            .unwrap_or_else(|| {
                FolderClassifier::default_audio_extensions()
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            }),
        app_config
            .fingerprint
            .multidisc_patterns
            .clone()
            .unwrap_or_else(|| {
                FolderClassifier::default_multidisc_patterns()
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            }),
    )?;

    if !app_config.session_db_path().exists() {
        info!(
            "Creating new session database at {:?}",
            app_config.session_db_path()
        );
    }
    let store: Arc<dyn SessionStore> =
        Arc::new(SqliteSessionStore::new(app_config.session_db_path())?);

    let library: Arc<dyn MusicLibrary> = Arc::new(SqliteMusicLibrary::new(
        app_config.library_db_path(),
        app_config.library_dir.clone(),
    )?);

    // The matching backend is a capability; without one configured, previews
    // surface a recoverable no-candidates failure.
    warn!("no metadata source configured, using no-op matcher");
    let matcher: Arc<dyn MetadataSource> = Arc::new(NoOpMetadataSource);

    if app_config.import.duplicate_action == DuplicateAction::Ask {
        info!("import.duplicate_action is 'ask'; duplicate imports will fail until resolved");
    }

    let shutdown = CancellationToken::new();
    let broadcaster = StatusBroadcaster::new();

    let env = Arc::new(WorkerEnv {
        store: store.clone(),
        library,
        matcher,
        plugins: Arc::new(PluginHub::new()),
        broadcaster: broadcaster.clone(),
        config: app_config.clone(),
        classifier,
        hash_cache: Arc::new(HashCache::new(app_config.fingerprint.hash_cache_size)),
        cancel: shutdown.child_token(),
    });

    let dispatcher = JobDispatcher::start(env.clone());

    let watcher = InboxWatcher::start(env.clone(), dispatcher.clone())?;
    if watcher.is_some() {
        info!("inbox watcher running");
    }

    let state = ServerState::new(dispatcher, store, Arc::new(ConnectionManager::new()));

    info!("Ready to serve at port {}!", app_config.port);

    tokio::select! {
        result = run_server(state, broadcaster, app_config.port, shutdown.child_token()) => {
            info!("HTTP server stopped: {:?}", result);
            shutdown.cancel();
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown.cancel();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Ok(())
        }
    }
}
