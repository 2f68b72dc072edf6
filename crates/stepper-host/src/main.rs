//! Launcher for the stepper host: loads the config, brings up the motors
//! and runs the HTTP control surface until a shutdown signal arrives.

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use gpio::{PinBackend, PinOracle};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use stepper_host::api;
use stepper_host::config::{self, ConfigError};
use stepper_host::state::{AppContext, SharedMotion};

/// HTTP-commanded stepper motor axis controller.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the motor configuration file.
    config_path: PathBuf,

    /// Web server port for the control API.
    #[arg(short, long, default_value_t = 8080)]
    web_port: u16,

    /// Suppress all output-pin writes (dry run against a real config).
    #[arg(long)]
    lockout: bool,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[actix_rt::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize the logging subscriber.
    let level = if cli.quiet { tracing::Level::WARN } else { tracing::Level::DEBUG };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!(
        version = %format!("{}.{}", config::VERSION_MAJOR, config::VERSION_MINOR),
        "stepper host starting up"
    );

    // 1. Load configuration. An incompatible document is exit code 3,
    // everything else wrong with it is 4.
    info!(path = %cli.config_path.display(), "loading config");
    let (app_config, raw_config) = match config::load(&cli.config_path) {
        Ok(loaded) => loaded,
        Err(e @ ConfigError::Incompatible { .. }) => {
            error!(%e, "incompatible config specified - aborting");
            process::exit(3);
        }
        Err(e) => {
            error!(%e, "exception processing config file - aborting");
            process::exit(4);
        }
    };

    // 2. Bring up the pin oracle.
    #[cfg(feature = "hardware")]
    let backend: Arc<dyn PinBackend> = Arc::new(gpio::sysfs::SysfsBackend::new());
    #[cfg(not(feature = "hardware"))]
    let backend: Arc<dyn PinBackend> = {
        warn!("hardware backend not compiled in, using the pin simulator");
        Arc::new(gpio::SimBackend::new())
    };
    let oracle = PinOracle::new(backend);
    if cli.lockout {
        warn!("output lockout engaged - pin writes are suppressed");
        oracle.set_lockout(true);
    }
    let shared = Arc::new(SharedMotion::new(oracle));

    // 3. Instantiate and register the motors.
    let registry = match config::build_registry(&app_config, &shared) {
        Ok(registry) => registry,
        Err(e) => {
            error!(%e, "exception processing config file - aborting");
            process::exit(4);
        }
    };

    info!(motors = registry.len(), "initializing motors");
    if let Err(e) = registry.initialize_all() {
        error!(%e, "motor initialization failed - aborting");
        process::exit(4);
    }

    let ctx = Arc::new(AppContext { registry, shared, raw_config });

    // 4. Start the API server.
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let api_state = api::AppState { ctx: ctx.clone(), shutdown: shutdown_tx };
    let api_server = match api::start_api_server(cli.web_port, api_state) {
        Ok(server) => server,
        Err(e) => {
            error!(%e, "failed to bind the API server");
            ctx.registry.shutdown_all();
            process::exit(1);
        }
    };
    info!(port = cli.web_port, "API server started");

    // 5. Run until something asks us to stop.
    tokio::select! {
        _ = api_server => {
            info!("API server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, exiting");
        }
        _ = shutdown_rx.recv() => {
            info!("shutdown requested over HTTP");
        }
    }

    ctx.registry.shutdown_all();
    info!("Goodbye...");
}
