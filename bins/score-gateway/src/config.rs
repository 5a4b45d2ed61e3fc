use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use ingest_pipeline::{FramingConfig, PipelineConfig, PublisherConfig};
use score_log::LogConfig;

use crate::error::GatewayError;

#[derive(Parser)]
#[command(name = "score-gateway", about = "Score update ingestion gateway")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Accept score updates over TCP and publish them to the log
    Serve(ServeArgs),
    /// Print the records of a persisted log as JSON lines
    Dump(DumpArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "gateway.toml", env = "GATEWAY_CONFIG")]
    pub config: String,
    /// Listen port, overrides `listen.port`
    #[arg(long)]
    pub port: Option<u16>,
    /// Log directory, overrides `log.data_dir`
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct DumpArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "gateway.toml", env = "GATEWAY_CONFIG")]
    pub config: String,
    /// Log directory, overrides `log.data_dir`
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Only this partition
    #[arg(long)]
    pub partition: Option<u32>,
    /// First offset to print in each partition
    #[arg(long, default_value_t = 0)]
    pub from: u64,
    /// Records per partition
    #[arg(long)]
    pub limit: Option<usize>,
}

// ---- TOML Config ----

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ListenConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    7000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// How long open connections get to finish after Ctrl+C.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

impl GatewayConfig {
    /// Read `path`. A file that does not exist yields the defaults.
    pub fn load(path: &str) -> Result<Self, GatewayError> {
        if !Path::new(path).exists() {
            tracing::info!(config = %path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| GatewayError::Config { context: "parse", detail: format!("'{path}': {e}") })?;
        tracing::info!(config = %path, "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        self.log.validate()?;
        self.pipeline().validate()?;
        Ok(())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            framing: self.framing.clone(),
            publisher: self.publisher.clone(),
        }
    }
}
