use clap::{Parser, Subcommand};
use std::path::PathBuf;
use voltgate_core::AcquisitionMode;

#[derive(Parser, Debug)]
#[command(name = "voltgate", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path
    #[arg(short, long = "config", value_name = "FILE", global = true)]
    pub config_path: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the device endpoint and HTTP facade
    Serve {
        /// Bind host for both listeners
        #[arg(long)]
        host: Option<String>,

        /// Port devices connect to
        #[arg(long)]
        device_port: Option<u16>,

        /// Port of the HTTP facade
        #[arg(long)]
        http_port: Option<u16>,

        /// Acquisition mode: push or pull
        #[arg(long)]
        mode: Option<AcquisitionMode>,
    },

    /// List devices known to a running gateway
    Devices {
        /// Gateway base URL
        #[arg(long)]
        url: Option<String>,
    },

    /// Fetch one metrics reading from a running gateway
    Metrics {
        /// Gateway base URL
        #[arg(long)]
        url: Option<String>,
    },

    /// Generate sample configuration
    ConfigSample {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
