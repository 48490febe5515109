use std::net::{SocketAddr, TcpStream};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hf_hub::api::tokio::Api;
use lumen_core::{accelerator_available, load_model, DeviceMap, Predictor, DEFAULT_MODEL};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod codec;
mod error;
mod publish;
mod routes;
mod schema;
mod shutdown;
mod state;

use publish::OutputSink;
use shutdown::{install_signal_handlers, ShutdownEvent};
use state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lumen prediction server")]
struct Args {
    /// Number of predictions that may run at once [default: 1 on a GPU, else the CPU count]
    #[arg(long)]
    threads: Option<usize>,

    /// Upload outputs here instead of returning them inline
    #[arg(long)]
    upload_url: Option<String>,

    /// Ignore SIGTERM and only stop on POST /shutdown or SIGINT
    #[arg(long)]
    await_explicit_shutdown: bool,

    /// Model variant to use
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Host address to bind the server to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the server to
    #[arg(long, env = "PORT", default_value_t = 5001)]
    port: u16,

    /// Log level: debug, info, warning, error or critical
    #[arg(long, env = "COG_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Maps Python-style level names onto tracing's.
fn tracing_level(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(tracing_level(level)).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn default_threads(device_map: DeviceMap) -> usize {
    if accelerator_available(device_map) {
        1
    } else {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }
}

fn is_port_in_use(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_ok()
}

async fn setup(model: String, device_map: DeviceMap) -> Result<Predictor> {
    let model = load_model(&model, Api::new()?, device_map).await?;
    Ok(Predictor::new(model))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&args.log_level))
        .init();

    if is_port_in_use(args.port) {
        error!("Port {} is already in use", args.port);
        std::process::exit(1);
    }

    let device_map = DeviceMap::from_cpu_flag(args.cpu);
    let threads = args.threads.unwrap_or_else(|| default_threads(device_map));
    let shutdown = ShutdownEvent::new();
    install_signal_handlers(&shutdown, args.await_explicit_shutdown)?;

    let state = Arc::new(AppState::new(
        threads,
        shutdown.clone(),
        OutputSink::from_upload_url(args.upload_url),
        reqwest::Client::new(),
    ));

    // Setup runs in the background so health checks answer while weights load.
    tokio::spawn({
        let state = state.clone();
        let model = args.model.clone();
        async move {
            info!("loading {}", model);
            state.finish_setup(setup(model, device_map).await);
        }
    });

    let app = routes::router(state);
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!(threads, "Started server on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    info!("server stopped");

    Ok(())
}
