use super::config::{config_path_or_default, load_with_env, LoggingConfig, SurfwatchConfig};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use surfwatch::bot::RelayService;
use surfwatch::frontend::telegram::{build_bot, listen};
use surfwatch::frontend::{FrontEnd, TelegramFrontEnd};
use surfwatch::persistence::{FileDocumentStore, PreferenceStore};
use surfwatch::protocol::BridgeFactory;
use surfwatch::triage::{GeminiClassifier, KeywordFilter};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Bot updates buffered between the listener and the service
const EVENT_BUFFER: usize = 256;

/// Run the bot service
///
/// ## Configuration Loading
///
/// 1. `--config` flag if provided, else `~/.local/share/surfwatch/config.toml`
/// 2. A commented default file is generated when none exists
/// 3. Environment variables override file values
/// 4. `--store-path` overrides `storage.path`
///
/// Returns after SIGINT/SIGTERM once every session token is persisted.
pub async fn execute(
    config_path: Option<String>,
    store_path: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path_or_default(config_path);

    if !config_path.exists() {
        let default_store = store_path
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| SurfwatchConfig::default().storage.path);
        println!("📝 No config file found. Creating default configuration...");
        SurfwatchConfig::create_default(&config_path, &default_store)?;
        println!("   Created: {}", config_path.display());
    }

    let mut config = load_with_env(&config_path)?;
    if let Some(store_path) = store_path {
        config.storage.path = PathBuf::from(store_path);
    }

    init_logging(&config.logging)?;
    info!(config = %config_path.display(), "starting surfwatch");

    let token = config.bot_token()?.to_string();
    let settings = config.service_settings()?;
    let classifier = GeminiClassifier::new(
        config.classifier_endpoint()?,
        config.classifier.prompt.as_deref(),
    );
    let filter = KeywordFilter::new(config.relay.keywords.as_slice())?;

    let store = FileDocumentStore::open(&config.storage.path)
        .await
        .map_err(|e| {
            error!(path = %config.storage.path.display(), error = %e, "cannot open document store");
            e
        })?;
    let preferences = PreferenceStore::new(Arc::new(store));

    let bot = build_bot(&token);
    let frontend: Arc<dyn FrontEnd> = Arc::new(TelegramFrontEnd::new(bot.clone()));
    let bridge = BridgeFactory::new(
        &config.protocol.bridge_url,
        config.bridge_request_timeout()?,
    )?;
    let service = RelayService::new(
        bridge,
        preferences,
        frontend,
        filter,
        Arc::new(classifier),
        settings,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let listener = tokio::spawn(listen(bot, events_tx, shutdown_rx.clone()));

    service.send_restart_notice().await;

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    service.run(events_rx, shutdown_rx).await;
    if let Err(e) = listener.await {
        error!(error = %e, "telegram listener task failed");
    }
    service.shutdown().await;

    info!("surfwatch stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))?;

    let installed = match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    // A subscriber installed earlier in this process keeps working
    if installed.is_err() {
        eprintln!("logging already initialized, keeping existing subscriber");
    }
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => error!(error = %e, "cannot listen for SIGTERM, only Ctrl-C stops the bot"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl-C");
    }
}
