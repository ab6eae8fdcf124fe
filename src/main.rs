use anyhow::{bail, Context};
use backend_relay::config::{BackendConfig, Config, LogFormat, LoggingConfig};
use backend_relay::{logging, server, BackendHandler};
use clap::Parser;
use log::info;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "Forwards requests to a single backend, answering failures with empty error responses"
)]
struct Args {
    #[clap(short, long, value_name = "ADDR", help = "Listen address (e.g., 127.0.0.1:8080)")]
    listen: Option<String>,

    #[clap(short, long, value_name = "URL", help = "Backend URL (e.g., http://backend:3000)")]
    backend: Option<String>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(long, value_name = "MILLIS", help = "Timeout for establishing a backend connection")]
    connect_timeout_ms: Option<u64>,

    #[clap(long, value_name = "MILLIS", help = "Timeout for receiving backend response headers")]
    header_timeout_ms: Option<u64>,

    #[clap(long, value_name = "FORMAT", help = "Diagnostic log format: text or json")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(config_file) => {
            if !Path::new(config_file).exists() {
                bail!("Configuration file not found: {}", config_file);
            }
            Config::from_file(config_file)
                .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", config_file, e))?
        }
        None => create_config_from_args(&args)?,
    };
    config.validate()?;

    let logging_config = config.logging.clone().unwrap_or_default();
    let level = logging_config.level.as_ref().map(|l| l.to_string());
    logging::init_fallback(level.as_deref(), logging_config.format.as_ref());

    let backend_logger = logging::backend_logger(Some(&logging_config))
        .map_err(|e| anyhow::anyhow!("Failed to open backend log: {}", e))?;

    let backend_url = config.backend.url()?;
    let handler = BackendHandler::with_options(
        &backend_url,
        &config.backend.transport_options(),
        Arc::from(backend_logger),
    )?;

    let server_handle = tokio::spawn(server::run(config.listen_addr, handler));

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        result = server_handle => {
            result.context("Server task panicked")??;
        }
    }

    Ok(())
}

fn create_config_from_args(args: &Args) -> anyhow::Result<Config> {
    let backend_url = args
        .backend
        .clone()
        .context("Either --backend or --config is required")?;

    let listen_addr = args.listen.as_deref().unwrap_or("127.0.0.1:8080");
    let listen_addr = listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address: {}", listen_addr))?;

    let mut backend = BackendConfig::new(backend_url);
    if let Some(ms) = args.connect_timeout_ms {
        backend.connect_timeout_ms = ms;
    }
    if let Some(ms) = args.header_timeout_ms {
        backend.header_timeout_ms = ms;
    }

    let format = match args.log_format.as_deref() {
        None | Some("text") => LogFormat::Text,
        Some("json") => LogFormat::Json,
        Some(other) => bail!("Invalid log format: {}. Must be one of: text, json", other),
    };

    Ok(Config {
        listen_addr,
        backend,
        logging: Some(LoggingConfig {
            level: None,
            format: Some(format),
            target: None,
        }),
    })
}
