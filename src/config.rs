//! Configuration module for the sync agent
//!
//! CLI argument parsing with environment variable support, plus an optional
//! TOML settings file. CLI and environment values win over file values.

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::logger::LogLevel;
use crate::security::TransportSecurity;

/// Parse duration string (e.g., "60s", "2m", "1h") or plain seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '60s', '2m', '1h' or plain seconds",
            s
        )
    })
}

/// Default path of the configuration file the xray process reads
const DEFAULT_XRAY_CONFIG: &str = "/etc/xray/config.json";

/// Default systemd service name of the supervised process
const DEFAULT_SERVICE: &str = "xray";

/// CLI arguments for the sync agent
///
/// Supports environment variables with XRAY_SYNC_ prefix
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Configuration sync agent for a panel-managed Xray core")]
pub struct CliArgs {
    /// Optional TOML settings file
    #[arg(long = "config-file", short = 'c', env = "XRAY_SYNC_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Path of the configuration file the xray process reads
    #[arg(long, env = "XRAY_SYNC_XRAY_CONFIG")]
    pub xray_config: Option<PathBuf>,

    /// Systemd service name of the supervised xray process
    #[arg(long, env = "XRAY_SYNC_SERVICE")]
    pub service: Option<String>,

    /// Interval between reconciliation cycles (e.g., "60s", "2m")
    #[arg(long, env = "XRAY_SYNC_RECONCILE_INTERVAL", value_parser = parse_duration)]
    pub reconcile_interval: Option<Duration>,

    /// Confirmation window for a restart before rolling back (e.g., "15s")
    #[arg(long, env = "XRAY_SYNC_RESTART_TIMEOUT", value_parser = parse_duration)]
    pub restart_timeout: Option<Duration>,

    /// TLS certificate file path
    #[arg(long, env = "XRAY_SYNC_CERT_FILE")]
    pub cert_file: Option<PathBuf>,

    /// TLS private key file path
    #[arg(long, env = "XRAY_SYNC_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Enable transport security for inbounds requesting it
    #[arg(long, env = "XRAY_SYNC_TLS_ENABLED")]
    pub tls_enabled: Option<bool>,

    /// Log level: trace, debug, info, warn, error (default: info)
    #[arg(long, env = "XRAY_SYNC_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// `[xray]` section of the settings file
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct XraySection {
    pub config_path: Option<PathBuf>,
    pub service: Option<String>,
    pub restart_timeout_secs: Option<u64>,
}

/// `[reconcile]` section of the settings file
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconcileSection {
    pub interval_secs: Option<u64>,
}

/// `[log]` section of the settings file
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LogSection {
    pub level: Option<String>,
}

/// TOML settings file shape
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SettingsFile {
    pub xray: XraySection,
    pub reconcile: ReconcileSection,
    pub tls: TransportSecurity,
    pub log: LogSection,
}

impl SettingsFile {
    /// Parse a settings file from TOML text
    pub fn from_toml(text: &str) -> crate::error::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Fully resolved agent configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Path of the configuration file the xray process reads
    pub xray_config_path: PathBuf,
    /// Systemd service name of the supervised process
    pub service: String,
    /// Confirmation window for restart before rolling back
    pub restart_timeout: Duration,
    /// Interval between reconciliation cycles
    pub reconcile_interval: Duration,
    /// Transport security settings shared by all TLS inbounds
    pub security: TransportSecurity,
    /// Agent log level
    pub log_level: Option<LogLevel>,
}

impl SyncConfig {
    /// Resolve the effective configuration from CLI args and the optional
    /// settings file. CLI values win over file values, file values win over
    /// built-in defaults.
    pub fn load(cli: &CliArgs) -> Result<Self> {
        let file = match &cli.config_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow!("Cannot read settings file {}: {}", path.display(), e))?;
                SettingsFile::from_toml(&text)?
            }
            None => SettingsFile::default(),
        };

        let mut security = file.tls;
        if let Some(enabled) = cli.tls_enabled {
            security.enabled = enabled;
        }
        if let (Some(cert), Some(key)) = (&cli.cert_file, &cli.key_file) {
            security.set_certificate(cert.clone(), key.clone());
        }

        let log_level = cli
            .log_level
            .as_deref()
            .or(file.log.level.as_deref())
            .and_then(LogLevel::from_str);

        Ok(Self {
            xray_config_path: cli
                .xray_config
                .clone()
                .or(file.xray.config_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_XRAY_CONFIG)),
            service: cli
                .service
                .clone()
                .or(file.xray.service)
                .unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
            restart_timeout: cli
                .restart_timeout
                .or(file.xray.restart_timeout_secs.map(Duration::from_secs))
                .unwrap_or(Duration::from_secs(15)),
            reconcile_interval: cli
                .reconcile_interval
                .or(file.reconcile.interval_secs.map(Duration::from_secs))
                .unwrap_or(Duration::from_secs(60)),
            security,
            log_level,
        })
    }

    /// Validate the resolved configuration
    pub fn validate(&self) -> Result<()> {
        if self.service.is_empty() {
            return Err(anyhow!("Service name must not be empty"));
        }
        if self.reconcile_interval.is_zero() {
            return Err(anyhow!("reconcile_interval must be greater than 0"));
        }
        if self.restart_timeout.is_zero() {
            return Err(anyhow!("restart_timeout must be greater than 0"));
        }

        if self.security.enabled {
            let cert = self
                .security
                .certificate_file
                .as_ref()
                .ok_or_else(|| anyhow!("TLS enabled but certificate file path is not set"))?;
            let key = self
                .security
                .key_file
                .as_ref()
                .ok_or_else(|| anyhow!("TLS enabled but key file path is not set"))?;
            if !cert.exists() {
                return Err(anyhow!("TLS certificate file not found: {}", cert.display()));
            }
            if !key.exists() {
                return Err(anyhow!("TLS private key file not found: {}", key.display()));
            }
        }

        Ok(())
    }
}
