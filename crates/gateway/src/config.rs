//! Gateway configuration
//!
//! Settings are layered: built-in defaults, then an optional config file,
//! then `CALLWIRE_*` environment variables, then command-line flags.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use callwire_signal_core::SignalConfig;
use clap::Parser;
use serde::Deserialize;

use crate::logging::parse_log_level;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "callwire-gateway", version, about = "WebSocket gateway for call signaling")]
pub struct Args {
    /// Path to a TOML, YAML or JSON config file
    #[arg(short, long, env = "CALLWIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Ring timeout in milliseconds
    #[arg(long)]
    pub call_timeout: Option<u64>,

    /// Media engine session limit reported to clients
    #[arg(long)]
    pub media_limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
    /// Log span enter and exit events
    pub log_spans: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            log_spans: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    /// Session limit of the media engine
    pub limit: usize,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self { limit: 500 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_address: SocketAddr,
    pub log: LogSettings,
    pub media: MediaSettings,
    pub signal: SignalConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log: LogSettings::default(),
            media: MediaSettings::default(),
            signal: SignalConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load from an optional file plus the `CALLWIRE_` environment
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.as_path()));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CALLWIRE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }

    /// Command-line flags win over file and environment
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(bind) = args.bind {
            self.bind_address = bind;
        }
        if let Some(level) = &args.log_level {
            self.log.level = level.clone();
        }
        if args.json_logs {
            self.log.json = true;
        }
        if let Some(timeout) = args.call_timeout {
            self.signal.call_timeout_ms = timeout;
        }
        if let Some(limit) = args.media_limit {
            self.media.limit = limit;
        }
    }

    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.log.level)?;
        if self.media.limit == 0 {
            bail!("media.limit must be greater than zero");
        }
        self.signal
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid signal settings: {}", e))
    }
}
