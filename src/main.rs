//! Loxone AudioServer protocol bridge: process entry point.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use loxone_audioserver_bridge::alert::AlertController;
use loxone_audioserver_bridge::bus;
use loxone_audioserver_bridge::config::{self, ConfigOrchestrator, Settings};
use loxone_audioserver_bridge::dispatcher::Dispatcher;
use loxone_audioserver_bridge::fade::FadeController;
use loxone_audioserver_bridge::group::GroupTracker;
use loxone_audioserver_bridge::heartbeat::HeartbeatEmitter;
use loxone_audioserver_bridge::provider::favorites::FavoritesStore;
use loxone_audioserver_bridge::provider::NullProvider;
use loxone_audioserver_bridge::transport;
use loxone_audioserver_bridge::zone::ZoneRegistry;

use tokio::signal;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// A `tracing-appender`-style file writer that rotates the target file to
/// `<path>.1` once it exceeds `max_bytes`, honoring `AUDIOSERVER_LOG_MAX_BYTES`.
struct SizeRotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    written: AtomicU64,
    file: Mutex<std::fs::File>,
}

impl SizeRotatingWriter {
    fn open(path: PathBuf, max_bytes: u64) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_bytes,
            written: AtomicU64::new(written),
            file: Mutex::new(file),
        })
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        if self.written.load(Ordering::Relaxed) < self.max_bytes {
            return Ok(());
        }
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let backup = self.path.with_extension("log.1");
        std::fs::rename(&self.path, &backup)?;
        *guard = std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written.store(0, Ordering::Relaxed);
        Ok(())
    }
}

impl std::io::Write for &SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.rotate_if_needed()?;
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let n = guard.write(buf)?;
        self.written.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.lock().unwrap_or_else(|e| e.into_inner()).flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SizeRotatingWriter {
    type Writer = &'a SizeRotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

/// Maps a config-snapshot log level string to an `EnvFilter` directive,
/// falling back to a crate-scoped default when nothing is configured.
fn resolve_log_directive(settings: &Settings) -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| {
        let level = settings
            .logging
            .console_level
            .clone()
            .or_else(|| settings.logging.file_level.clone())
            .unwrap_or_else(|| "info".to_string());
        format!("loxone_audioserver_bridge={level},tower_http=info")
    })
}

fn init_logging(settings: &Settings) {
    let filter = tracing_subscriber::EnvFilter::new(resolve_log_directive(settings));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match std::env::var("AUDIOSERVER_LOG_FILE") {
        Ok(path) => {
            let max_bytes: u64 = std::env::var("AUDIOSERVER_LOG_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024);
            match SizeRotatingWriter::open(PathBuf::from(&path), max_bytes) {
                Ok(writer) => {
                    let file_layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
                    registry.with(file_layer).init();
                }
                Err(e) => {
                    registry.init();
                    tracing::warn!(error = %e, path = %path, "failed to open log file, continuing with console logging only");
                }
            }
        }
        Err(_) => registry.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

fn print_version() {
    println!(
        "loxone-audioserver-bridge {} ({})",
        env!("BRIDGE_VERSION"),
        env!("BRIDGE_GIT_SHA")
    );
}

fn print_help() {
    print_version();
    println!();
    println!("Protocol bridge emulating a Loxone AudioServer appliance in front of");
    println!("third-party media backends (Music Assistant, Sonos, Beolink).");
    println!();
    println!("USAGE:");
    println!("    loxone-audioserver-bridge [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Print help information");
    println!("    -V, --version    Print version information");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    RUST_LOG                  Log filter directive");
    println!("    AUDIOSERVER_BIND_ADDR     Bind address for both listeners (default 0.0.0.0)");
    println!("    AUDIOSERVER_LOG_FILE      Path to a size-rotated log file");
    println!("    AUDIOSERVER_LOG_MAX_BYTES Rotation threshold in bytes (default 10MiB)");
    println!("    CONFIG_ADMIN_DIR          Directory for admin config and music cache");
    println!("    MEDIA_PROVIDER            Media provider kind");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    if let Err(e) = run().await {
        eprintln!("fatal error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let settings = config::load_settings()?;
    init_logging(&settings);

    tracing::info!(
        version = env!("BRIDGE_VERSION"),
        git_sha = env!("BRIDGE_GIT_SHA"),
        "starting loxone-audioserver-bridge"
    );

    let bind_addr = std::env::var("AUDIOSERVER_BIND_ADDR").unwrap_or(settings.bind_addr);

    let bus = bus::create_bus();
    let zones = Arc::new(ZoneRegistry::new(bus.clone()));
    let fade = Arc::new(FadeController::new());
    let alerts = Arc::new(AlertController::new(zones.clone(), fade.clone()));
    let config_orchestrator = Arc::new(ConfigOrchestrator::new(zones.clone()));
    let provider = Arc::new(NullProvider::new());
    let favorites = Arc::new(FavoritesStore::new());
    let groups = Arc::new(RwLock::new(GroupTracker::new()));

    config_orchestrator.initialize_config().await;
    tracing::info!("configuration orchestrator seeded from admin config and music cache");

    let dispatcher = Arc::new(Dispatcher {
        zones: zones.clone(),
        groups,
        alerts,
        fade,
        config: config_orchestrator.clone(),
        provider,
        favorites,
    });

    // Separate tokens so shutdown proceeds in the mandated order instead of
    // racing heartbeat-stop, websocket-close, and listener-close together.
    let heartbeat_shutdown = CancellationToken::new();
    let transport_shutdown = CancellationToken::new();

    let heartbeat_bus = bus.clone();
    let heartbeat_config = config_orchestrator.clone();
    let heartbeat_stop = heartbeat_shutdown.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let emitter = HeartbeatEmitter::new(heartbeat_bus);
        let mac_id_fn = move || heartbeat_config.cached_mac_id();
        let extension_mac_ids_fn = || Vec::new();
        emitter.run(mac_id_fn, extension_mac_ids_fn, heartbeat_stop).await;
    });

    let transport_shutdown_for_task = transport_shutdown.clone();
    let mut transport_handle = tokio::spawn(async move {
        transport::serve(&bind_addr, dispatcher, bus, transport_shutdown_for_task).await
    });

    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut transport_handle => {
            if let Ok(Err(e)) = result {
                tracing::error!(error = %e, "transport listener exited with error");
            }
        }
    }

    tracing::info!("stopping heartbeat");
    heartbeat_shutdown.cancel();
    let _ = heartbeat_handle.await;

    tracing::info!("closing websocket peers and http listeners");
    transport_shutdown.cancel();

    tracing::info!("cleaning up zone backends");
    zones.cleanup_all().await;

    let _ = transport_handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}
