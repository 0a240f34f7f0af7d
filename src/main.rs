use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unpackarr::{Config, Unpacker, run_with_shutdown};

const CONFIG_ENV: &str = "UNPACKARR_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Config path: first argument, then $UNPACKARR_CONFIG, else built-in defaults.
    // Environment variables override either.
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let config = Config::load(config_path.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("unpackarr={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &config_path {
        Some(path) => tracing::info!(config = %path.display(), "configuration loaded"),
        None => tracing::info!("no configuration file given, using defaults and environment"),
    }

    let unpacker = Unpacker::new(config)?;
    unpacker.start().await?;

    run_with_shutdown(unpacker).await?;
    Ok(())
}
