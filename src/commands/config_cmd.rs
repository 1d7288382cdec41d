use clap::{Args, Subcommand, ValueEnum};
use std::fmt::Display;

use datashare::config::{ConfigValue, ServerConfig};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_text(config),
                }
                Ok(())
            }
        }
    }
}

fn print_text(config: &ServerConfig) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            ServerConfig::default_config_path().display()
        );
    }
    println!();

    print_value("data_dir", &config.data_dir, |p| p.display().to_string());
    print_value("shared_path", &config.shared_path, |p| match p {
        Some(path) => path.display().to_string(),
        None => "(not set)".to_string(),
    });
    print_value("port", &config.port, ToString::to_string);
    print_value("discovery_port", &config.discovery_port, ToString::to_string);
    print_value(
        "broadcast_interval_secs",
        &config.broadcast_interval_secs,
        ToString::to_string,
    );
    print_value("sync_interval_ms", &config.sync_interval_ms, ToString::to_string);
    print_value("mode", &config.mode, ToString::to_string);
    print_value("node_id", &config.node_id, ToString::to_string);
    print_value("discovery", &config.discovery, ToString::to_string);
    print_value("auto_sync", &config.auto_sync, ToString::to_string);

    if config.peers.is_empty() {
        println!("peers: (none)");
    } else {
        println!("peers: {}", config.peers.join(", "));
    }
}

fn print_value<T, D: Display>(name: &str, value: &ConfigValue<T>, show: impl Fn(&T) -> D) {
    println!("{}: {}", name, show(&value.value));
    println!("  source: {}", value.source);
    println!();
}
