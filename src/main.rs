//! microhost: runs a demo service on the hosting substrate.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────── parent ─────────────────────────┐
//!                     │  config → SharedSockets::bind → Orchestrator::spawn × N │
//!                     └──────────────┬──────────────────────────────────────────┘
//!                                    │ inherited tcp/http sockets
//!              ┌─────────────────────┼─────────────────────┐
//!              ▼                     ▼                     ▼
//!      ┌──────────────┐      ┌──────────────┐      ┌──────────────┐
//!      │   worker 0   │      │   worker 1   │      │   worker n   │
//!      │ packet conns │      │     ...      │      │     ...      │
//!      │ http routes  │      │              │      │              │
//!      │ pubsub bus   │      │              │      │              │
//!      └──────┬───────┘      └──────────────┘      └──────────────┘
//!             │ register / discover / x_subscribe
//!             ▼
//!        registry process            broker (Redis)
//! ```
//!
//! The demo hosts an `echo` packet endpoint and `GET /ping`.

use std::path::PathBuf;

use clap::Parser;
use serde_json::json;

use microhost::config::{read_config, validate_config, ConfigError, HostConfig};
use microhost::{Host, HttpRoutes, TcpService};

#[derive(Parser, Debug)]
#[command(name = "microhost")]
#[command(about = "Host a service over the packet protocol and HTTP", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker processes (overrides the file).
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    workers: Option<u16>,

    /// Run without a registry.
    #[arg(long)]
    ronin: bool,
}

/// The file (or defaults) with command-line overrides applied, validated as a whole.
fn resolve_config(cli: &Cli) -> Result<HostConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => HostConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.workers.count = usize::from(workers);
    }
    if cli.ronin {
        config.registry.ronin = true;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let echo = TcpService::builder(&config.service.name, &config.service.version)
        .endpoint("echo", |args| async move { Ok(args) })
        .build();
    let routes = HttpRoutes::new().get("/ping", || async { axum::Json(json!({"pong": true})) });

    Host::new(config).tcp_service(echo).http_routes(routes).run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("microhost").chain(args.iter().copied())).unwrap()
    }

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn defaults_with_overrides_are_validated() {
        let config = resolve_config(&parse(&["--workers", "3", "--ronin"])).unwrap();
        assert_eq!(config.workers.count, 3);
        assert!(config.registry.ronin);
    }

    #[test]
    fn overrides_apply_before_validation() {
        let file = config_file("[registry]\nport = 0\n");
        let path = file.path().to_str().unwrap();

        let err = resolve_config(&parse(&["--config", path])).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));

        let config = resolve_config(&parse(&["--config", path, "--ronin"])).unwrap();
        assert_eq!(config.registry.port, 0);
    }

    #[test]
    fn invalid_file_is_rejected_despite_overrides() {
        let file = config_file("[timeouts]\nrequest_secs = 0\n");
        let path = file.path().to_str().unwrap();
        assert!(matches!(
            resolve_config(&parse(&["--config", path, "--workers", "2"])),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn zero_workers_is_rejected_by_the_parser() {
        assert!(Cli::try_parse_from(["microhost", "--workers", "0"]).is_err());
    }
}
