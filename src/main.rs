//! Request pipeline server.
//!
//! ```text
//!  Client ──▶ access log ──▶ error tail ──▶ security headers ──▶ body parsers
//!                                              │
//!             sanitizers ◀─────────────────────┘
//!                │
//!                ▼
//!  compression ──▶ CORS ──▶ preflight ──▶ auth ──▶ rate limit ──▶ routes
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use request_pipeline::config::{
    apply_env_overrides, read_config, validate_config, AppConfig, ConfigError, Environment,
};
use request_pipeline::lifecycle::{wait_for_signal, Shutdown};
use request_pipeline::observability::init_tracing;
use request_pipeline::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "request-pipeline", version, about)]
struct Args {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Deployment environment, overriding the file and APP_ENV.
    #[arg(short, long)]
    env: Option<Environment>,
}

fn load(args: &Args) -> Result<AppConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    if let Some(environment) = args.env {
        config.environment = environment;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load(&args)?;

    init_tracing(&config.observability, config.environment);

    tracing::info!(
        environment = %config.environment,
        bind_address = %config.listener.bind_address,
        body_limit_bytes = config.body.limit_bytes,
        trust_forwarded = config.proxy.trust_forwarded,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, "Listening for connections");

    let server = HttpServer::new(&config);
    tracing::debug!(
        stages = ?server.application().stages(),
        "Pipeline assembled"
    );

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
