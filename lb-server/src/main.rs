use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use lb_server::{AppState, CanvasConfig, build_canvas_app, init_logging, spawn_sweep_task};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if wants_version_flag() {
        println!("{}", binary_version_text());
        return Ok(());
    }

    init_logging()?;
    info!("{}", binary_version_text());

    let addr = parse_addr("CANVAS_ADDR", "0.0.0.0:9400")?;
    let config = CanvasConfig {
        edit_ttl_ms: parse_u64("CANVAS_EDIT_TTL_MS", canvas::DEFAULT_EDIT_TTL_MS)?,
        sweep_interval_ms: parse_u64("CANVAS_SWEEP_INTERVAL_MS", 60_000)?,
        flow_capacity: parse_usize("CANVAS_FLOW_CAPACITY", canvas::DEFAULT_FLOW_CAPACITY)?,
        max_channel_msg_bytes: parse_usize("CANVAS_MAX_CHANNEL_MSG_BYTES", 32 * 1024 * 1024)?,
        output_dir: parse_path("CANVAS_OUTPUT_DIR", ".layerbridge/outputs"),
    };
    let sweep_interval = Duration::from_millis(config.sweep_interval_ms.max(1_000));

    let state = AppState::new(config);
    spawn_sweep_task(state.clone(), sweep_interval);

    let app = build_canvas_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("canvas bridge listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn parse_addr(key: &str, default: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    Ok(value.parse()?)
}

fn parse_u64(key: &str, default: u64) -> Result<u64, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

fn parse_usize(key: &str, default: usize) -> Result<usize, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(value) => Ok(value.parse()?),
        Err(_) => Ok(default),
    }
}

fn parse_path(key: &str, default: &str) -> PathBuf {
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    PathBuf::from(value.trim())
}

fn wants_version_flag() -> bool {
    env::args()
        .skip(1)
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
}

fn binary_version_text() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
