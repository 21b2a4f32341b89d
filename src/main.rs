mod cli;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use voltgate_core::{AcquisitionMode, Config, ConfigValidator, GatewayConfig};
use voltgate_gateway::{GatewayClient, GatewayServer};

use crate::cli::{Cli, Commands};

const DEFAULT_FILTER: &str = "voltgate=info,voltgate_gateway=info,warn";
const VERBOSE_FILTER: &str = "voltgate=debug,voltgate_gateway=debug,voltgate_core=debug,warn";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    // Handle ConfigSample immediately without loading config
    if let Some(Commands::ConfigSample { output }) = &cli.command {
        let sample_config = Config::sample();
        let path = output
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("./voltgate.sample.yaml"));
        sample_config.save(&path)?;
        println!("Sample configuration written to {}", path.display());
        return Ok(());
    }

    let mut config = Config::load(&cli.config_path)?;

    match cli.command {
        Some(Commands::Serve {
            host,
            device_port,
            http_port,
            mode,
        }) => {
            apply_serve_flags(&mut config.gateway, host, device_port, http_port, mode);
            ConfigValidator::validate(&config)?;
            serve(config.gateway).await?;
        }
        None => {
            serve(config.gateway).await?;
        }
        Some(Commands::Devices { url }) => {
            let client = client_for(&config, url);
            let list = client.list_devices().await?;
            if list.devices.is_empty() {
                println!("No devices connected");
            } else {
                println!("Devices ({}):", list.count);
                for device in list.devices {
                    println!("  • {}", device);
                }
            }
        }
        Some(Commands::Metrics { url }) => {
            let client = client_for(&config, url);
            match client.fetch_metrics().await {
                Some(reading) => println!("{}", serde_json::to_string_pretty(&reading)?),
                None => println!("No metrics this cycle from {}", client.base_url()),
            }
        }
        Some(Commands::ConfigSample { .. }) => {
            // Already handled
        }
    }

    Ok(())
}

fn apply_serve_flags(
    config: &mut GatewayConfig,
    host: Option<String>,
    device_port: Option<u16>,
    http_port: Option<u16>,
    mode: Option<AcquisitionMode>,
) {
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = device_port {
        config.device_port = port;
    }
    if let Some(port) = http_port {
        config.http_port = port;
    }
    if let Some(mode) = mode {
        config.mode = mode;
    }
}

fn client_for(config: &Config, url: Option<String>) -> GatewayClient {
    match url {
        Some(url) => GatewayClient::new(url, config.client.timeout()),
        None => GatewayClient::from_config(&config.client),
    }
}

/// Run both listeners until one fails or Ctrl-C arrives
async fn serve(config: GatewayConfig) -> Result<()> {
    info!("Voltgate v{}", env!("CARGO_PKG_VERSION"));
    info!(
        mode = %config.mode,
        "Starting gateway (devices on {}, HTTP on {})",
        config.device_addr(),
        config.http_addr()
    );

    let bound = GatewayServer::new(config).bind().await?;

    tokio::select! {
        result = bound.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_flags_override_config() {
        let mut config = GatewayConfig::default();
        apply_serve_flags(
            &mut config,
            Some("127.0.0.1".to_string()),
            None,
            Some(9100),
            Some(AcquisitionMode::Push),
        );

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.device_port, 8765);
        assert_eq!(config.http_port, 9100);
        assert_eq!(config.mode, AcquisitionMode::Push);
    }

    #[test]
    fn test_client_url_flag_wins() {
        let config = Config::default();
        assert_eq!(client_for(&config, None).base_url(), "http://127.0.0.1:8766");
        assert_eq!(
            client_for(&config, Some("http://gw:9000/".to_string())).base_url(),
            "http://gw:9000"
        );
    }
}
