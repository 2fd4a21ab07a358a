use std::sync::OnceLock;

use owo_colors::OwoColorize;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let ansi = detect_ansi();
    let _ = ANSI_ENABLED.set(ansi);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

pub fn category_channel() -> String {
    if ansi_enabled() {
        format!("{}", "CHANNEL".bright_cyan().bold())
    } else {
        "CHANNEL".to_string()
    }
}

pub fn category_compute() -> String {
    if ansi_enabled() {
        format!("{}", "COMPUTE".bright_green().bold())
    } else {
        "COMPUTE".to_string()
    }
}

pub fn category_matting() -> String {
    if ansi_enabled() {
        format!("{}", "MATTING".bright_magenta().bold())
    } else {
        "MATTING".to_string()
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    supports_color::on_cached(Stream::Stdout).is_some()
}
