//! Relay Hub - broker host process.
//!
//! Starts a broker session on the in-process hub and runs until Ctrl-C or an
//! accepted `shutdownBroker` call.

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::config::RpcConfig;
use relay_core::{Broker, LocalHub, ModuleRegistry, SessionConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "relay-hub")]
#[command(about = "Broker host for the relay RPC engine")]
struct Args {
    /// Allow remote modules to change the registry, read files and stop the broker
    #[arg(long)]
    insecure: bool,

    /// JSON session config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Registry file (overrides the config file)
    #[arg(short, long)]
    registry: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Merge the config file, if any, with command line overrides.
fn session_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if args.insecure {
        config.secure = false;
    }
    if let Some(registry) = &args.registry {
        config.registry_path = Some(registry.clone());
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = session_config(&args)?;
    let registry = match &config.registry_path {
        Some(path) => ModuleRegistry::open(path)
            .with_context(|| format!("opening registry {}", path.display()))?,
        None => ModuleRegistry::new(),
    };

    let broker = Broker::start(LocalHub::new(), Arc::new(registry), &config)?;
    let shutdown = broker.registry().shutdown_token();
    ctrlc::set_handler(move || shutdown.cancel()).context("installing Ctrl-C handler")?;

    info!("Relay hub running, press Ctrl-C to stop");
    broker.wait_for_shutdown_request();
    info!("Shutdown requested, exiting");

    broker.registry().save()?;
    broker.shutdown();
    if !broker
        .engine()
        .wait_for_disconnect_timeout(RpcConfig::DISCONNECT_WAIT)
    {
        warn!("Broker did not finish disconnecting in time");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_secure_and_in_memory() {
        let args = Args::try_parse_from(["relay-hub"]).unwrap();
        let config = session_config(&args).unwrap();
        assert!(config.secure);
        assert!(config.registry_path.is_none());
    }

    #[test]
    fn test_flags_override_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("hub.json");
        std::fs::write(
            &config_path,
            r#"{"secure": true, "registryPath": "/var/lib/relay/a.json"}"#,
        )
        .unwrap();
        let registry_path = temp_dir.path().join("b.json");

        let args = Args::try_parse_from([
            "relay-hub",
            "--insecure",
            "--config",
            config_path.to_str().unwrap(),
            "--registry",
            registry_path.to_str().unwrap(),
        ])
        .unwrap();
        let config = session_config(&args).unwrap();
        assert!(!config.secure);
        assert_eq!(config.registry_path, Some(registry_path));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let absent = temp_dir.path().join("absent.json");
        let args =
            Args::try_parse_from(["relay-hub", "--config", absent.to_str().unwrap()]).unwrap();
        assert!(session_config(&args).is_err());
    }
}
