mod config;
mod routes;

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use engine::{Device, Engine, HeadlessDevice};
use parking_lot::Mutex;
use runtime::Metrics;
use scene::{teardown, warm_up, Park, SolarEphemeris};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::routes::{router, AppState};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum DeviceKind {
    /// In-process reference engine
    Headless,
    /// libospray loaded at runtime (needs the `ospray` feature)
    Ospray,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Renders park terrain tiles over HTTP")]
struct Args {
    /// JSON configuration file (default: $SUNRISE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on; overrides the config and $SUNRISE_SERVER_BIND
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on; overrides the config and $SUNRISE_SERVER_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Number of pre-built scenes
    #[arg(long)]
    pool_size: Option<usize>,

    #[arg(long, value_enum, default_value_t = DeviceKind::Headless)]
    device: DeviceKind,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            return Err(err.into());
        }
    };

    let device = open_device(args.device, &config)?;
    let engine = Engine::init(device, &config.renderer.modules)?;

    let mut park = Park::new(engine.device(), config.park_layout());
    if let Err(err) = park.make() {
        error!("failed to load park from {}: {err}", config.scene.root.display());
        park.close();
        engine.shutdown();
        return Err(err.into());
    }
    let park = park.shared();

    let pool = match warm_up(
        &engine,
        &park,
        Arc::new(SolarEphemeris),
        &config.scene_settings(),
        config.server.pool_size,
    ) {
        Ok(pool) => pool,
        Err(err) => {
            error!("failed to build scenes: {err}");
            park.write().close();
            engine.shutdown();
            return Err(err.into());
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let fatal = Arc::new(Notify::new());
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config),
        metrics: Arc::new(Mutex::new(Metrics::new())),
        fatal: fatal.clone(),
    };
    let app = router(state);

    info!("tile server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        warn!("ctrl-c handler failed: {err}");
                    }
                    info!("shutting down");
                }
                _ = fatal.notified() => error!("engine failure, shutting down"),
            }
        })
        .await;

    teardown(&pool, &park).await;
    engine.shutdown();
    served?;
    Ok(())
}

fn load_config(args: &Args) -> Result<Config, config::ConfigError> {
    let path = args
        .config
        .clone()
        .or_else(|| env::var("SUNRISE_CONFIG").ok().map(PathBuf::from));
    let mut config = match path {
        Some(path) => Config::load(&path)?,
        None => {
            warn!("no configuration file given, using defaults");
            Config::default()
        }
    };
    config.apply_overrides(|key| env::var(key).ok());
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(pool_size) = args.pool_size {
        config.server.pool_size = pool_size;
    }
    config.validate()?;
    Ok(config)
}

fn open_device(
    kind: DeviceKind,
    config: &Config,
) -> Result<Arc<dyn Device>, Box<dyn std::error::Error>> {
    match kind {
        DeviceKind::Headless => Ok(Arc::new(HeadlessDevice::new())),
        #[cfg(feature = "ospray")]
        DeviceKind::Ospray => Ok(Arc::new(engine::OsprayDevice::load(&config.scene.library)?)),
        #[cfg(not(feature = "ospray"))]
        DeviceKind::Ospray => Err(format!(
            "cannot load {}: built without the ospray feature",
            config.scene.library
        )
        .into()),
    }
}
