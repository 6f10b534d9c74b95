//! Configuration management

use clap::Parser;
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid server configuration: {0}")]
    InvalidServer(String),

    #[error("Invalid plugin configuration: {0}")]
    InvalidPlugin(String),

    #[error("Invalid results configuration: {0}")]
    InvalidResults(String),

    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub plugins: PluginsConfig,
    pub results: ResultsConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_with_args(cli_args)
    }

    fn load_with_args(cli_args: CliArgs) -> Result<Self, ConfigError> {
        let mut builder = Self::defaults()?;

        // Config file, when given, sits between defaults and env vars
        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(
                    config_path.display().to_string(),
                ));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Environment variables are prefixed with NETPROBE_ and use __ for nesting
        // Example: NETPROBE_SERVER__PORT=8080
        builder = builder.add_source(
            Environment::with_prefix("NETPROBE")
                .separator("__")
                .try_parsing(true),
        );

        // CLI arguments take the highest priority
        if let Some(host) = &cli_args.host {
            builder = builder.set_override("server.host", host.clone())?;
        }
        if let Some(port) = cli_args.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(plugin_dir) = &cli_args.plugin_dir {
            builder = builder.set_override(
                "plugins.directories",
                vec![plugin_dir.display().to_string()],
            )?;
        }
        if let Some(interface) = &cli_args.interface {
            builder = builder.set_override("network.interface", interface.clone())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = Self::defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        // Per-user data directory when the platform provides one, otherwise
        // relative to the working directory.
        let data_dir = dirs::data_local_dir()
            .map(|d| d.join("netprobe"))
            .unwrap_or_else(|| PathBuf::from("./data"));
        let results_dir = data_dir.join("results");

        let builder = ConfigBuilder::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.request_timeout", 30)?
            .set_default("plugins.directories", vec!["./plugins"])?
            .set_default("plugins.data_dir", data_dir.display().to_string())?
            .set_default("plugins.execution_timeout", 60)?
            .set_default("plugins.max_concurrent_runs", 8)?
            .set_default("results.directory", results_dir.display().to_string())?
            .set_default("results.max_stored", 100)?
            .set_default("network.interface", "eth0")?
            .set_default("network.poll_interval", 5)?
            .set_default("network.monitor_method", "poll")?
            .set_default("network.auto_run_on_connect", true)?
            .set_default(
                "network.default_plugins",
                vec!["ip_info".to_string(), "ping".to_string()],
            )?
            .set_default("network.helper_status_file", "/tmp/netprobe_link_status")?
            .set_default("network.event_log_capacity", 1000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "text")?
            .set_default("logging.output", "stdout")?;
        Ok(builder)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.plugins.validate()?;
        self.results.validate()?;
        self.network.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Command-line arguments for configuration override
#[derive(Debug, Parser)]
#[command(name = "netprobe")]
#[command(about = "NetProbe network diagnostics host", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server host address
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Plugin directory path (replaces the configured search locations)
    #[arg(long, value_name = "DIR")]
    pub plugin_dir: Option<PathBuf>,

    /// Network interface to monitor
    #[arg(short, long, value_name = "IFACE")]
    pub interface: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: u64, // seconds
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidServer("host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidServer(
                "port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginsConfig {
    /// Search locations scanned for plugin packages, in priority order
    pub directories: Vec<PathBuf>,
    /// Directory for engine state (enabled-flag overlay, plugin data)
    pub data_dir: PathBuf,
    /// Execution deadline applied to every run, in seconds
    pub execution_timeout: u64,
    /// Upper bound on concurrently executing plugin bodies
    pub max_concurrent_runs: usize,
}

impl PluginsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directories.is_empty() {
            return Err(ConfigError::InvalidPlugin(
                "at least one plugin directory must be configured".to_string(),
            ));
        }

        if self.execution_timeout == 0 {
            return Err(ConfigError::InvalidPlugin(
                "execution_timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_runs == 0 {
            return Err(ConfigError::InvalidPlugin(
                "max_concurrent_runs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn execution_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.execution_timeout)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultsConfig {
    pub directory: PathBuf,
    /// Cap on retained run records; oldest evicted past this
    pub max_stored: usize,
}

impl ResultsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.as_os_str().is_empty() {
            return Err(ConfigError::InvalidResults(
                "directory cannot be empty".to_string(),
            ));
        }

        if self.max_stored == 0 {
            return Err(ConfigError::InvalidResults(
                "max_stored must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Primary interface watched for link-state changes
    pub interface: String,
    /// Poll interval in seconds (also the helper strategy's safety-net interval)
    pub poll_interval: u64,
    /// Detection strategy: "poll", "push" or "helper"
    pub monitor_method: String,
    /// Run the default plugin sequence when the link comes up
    pub auto_run_on_connect: bool,
    /// Sequence run (sequentially) by the connect handler
    pub default_plugins: Vec<String>,
    /// Status file written by the external helper daemon
    pub helper_status_file: PathBuf,
    /// Bounded event log capacity
    pub event_log_capacity: usize,
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interface.is_empty() {
            return Err(ConfigError::InvalidNetwork(
                "interface cannot be empty".to_string(),
            ));
        }

        if self.poll_interval == 0 {
            return Err(ConfigError::InvalidNetwork(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        let valid_methods = ["poll", "push", "helper"];
        if !valid_methods.contains(&self.monitor_method.as_str()) {
            return Err(ConfigError::InvalidNetwork(format!(
                "monitor_method must be one of: {:?}",
                valid_methods
            )));
        }

        if self.event_log_capacity == 0 {
            return Err(ConfigError::InvalidNetwork(
                "event_log_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                request_timeout: 30,
            },
            plugins: PluginsConfig {
                directories: vec![PathBuf::from("./plugins")],
                data_dir: PathBuf::from("./data"),
                execution_timeout: 60,
                max_concurrent_runs: 8,
            },
            results: ResultsConfig {
                directory: PathBuf::from("./data/results"),
                max_stored: 100,
            },
            network: NetworkConfig {
                interface: "eth0".to_string(),
                poll_interval: 5,
                monitor_method: "poll".to_string(),
                auto_run_on_connect: true,
                default_plugins: vec!["ip_info".to_string()],
                helper_status_file: PathBuf::from("/tmp/netprobe_link_status"),
                event_log_capacity: 1000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
                output: "stdout".to_string(),
                log_file: None,
            },
        }
    }

    #[test]
    fn test_valid_config_passes_validation() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = sample_config();
        config.plugins.execution_timeout = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPlugin(_))
        ));
    }

    #[test]
    fn test_unknown_monitor_method_rejected() {
        let mut config = sample_config();
        config.network.monitor_method = "carrier-pigeon".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNetwork(_))
        ));
    }

    #[test]
    fn test_file_output_requires_log_file() {
        let mut config = sample_config();
        config.logging.output = "file".to_string();
        config.logging.log_file = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogging(_))
        ));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/netprobe.toml"));
        assert!(matches!(err, Err(ConfigError::FileNotFound(_))));
    }
}
