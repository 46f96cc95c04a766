// src/config.rs

//! Manages server configuration: loading, defaults, and validation.

use crate::forward::{self, ForwardRule};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "127.0.0.1:9998".to_string()
}

/// Configuration for the HTTP admin API (connection listing and kicking).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_address")]
    pub address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_api_address(),
        }
    }
}

fn default_api_address() -> String {
    "127.0.0.1:9997".to_string()
}

/// The resolved relay configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Address the RTMP listener binds to.
    #[serde(default = "default_rtmp_address")]
    pub rtmp_address: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Size in bytes of each connection's read buffer.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Address of the RTSP side of the relay.
    #[serde(default = "default_rtsp_address")]
    pub rtsp_address: String,
    #[serde(default)]
    pub run_on_connect: String,
    #[serde(default)]
    pub run_on_connect_restart: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub forwards: Vec<ForwardRule>,
}

fn default_rtmp_address() -> String {
    "0.0.0.0:1935".to_string()
}
fn default_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_read_buffer_size() -> usize {
    4096
}
fn default_rtsp_address() -> String {
    "0.0.0.0:8554".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rtmp_address: default_rtmp_address(),
            read_timeout: default_timeout(),
            write_timeout: default_timeout(),
            read_buffer_size: default_read_buffer_size(),
            rtsp_address: default_rtsp_address(),
            run_on_connect: String::new(),
            run_on_connect_restart: false,
            log_level: default_log_level(),
            metrics: MetricsConfig::default(),
            api: ApiConfig::default(),
            forwards: Vec::new(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        let rtmp_addr = parse_addr("rtmp_address", &self.rtmp_address)?;
        parse_addr("rtsp_address", &self.rtsp_address)?;

        if self.read_timeout.is_zero() {
            return Err(anyhow!("read_timeout cannot be 0"));
        }
        if self.write_timeout.is_zero() {
            return Err(anyhow!("write_timeout cannot be 0"));
        }
        if self.read_buffer_size == 0 {
            return Err(anyhow!("read_buffer_size cannot be 0"));
        }

        if self.metrics.enabled {
            let addr = parse_addr("metrics.address", &self.metrics.address)?;
            if addr == rtmp_addr {
                return Err(anyhow!(
                    "metrics.address cannot be the same as rtmp_address"
                ));
            }
        }
        if self.api.enabled {
            let addr = parse_addr("api.address", &self.api.address)?;
            if addr == rtmp_addr {
                return Err(anyhow!("api.address cannot be the same as rtmp_address"));
            }
            if self.metrics.enabled && self.metrics.address == self.api.address {
                return Err(anyhow!("api.address cannot be the same as metrics.address"));
            }
        }

        forward::validate_rules(&self.forwards).map_err(|e| anyhow!("forwards: {}", e))?;
        Ok(())
    }

    /// Caveats about a valid configuration that operators should see at startup.
    pub fn advisories(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if !self.run_on_connect.is_empty() && self.run_on_connect_restart {
            notes.push(format!(
                "run_on_connect_restart is set: '{}' will be restarted for as long as each connection lives.",
                self.run_on_connect
            ));
        }
        if !self.forwards.is_empty() {
            notes.push(format!(
                "{} forward rule(s) configured: packets are sent as RTSP interleaved frames over plain TCP \
                 without an ANNOUNCE/SETUP/RECORD handshake, so the destination must accept raw frames.",
                self.forwards.len()
            ));
        }
        notes
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .with_context(|| format!("{field} '{value}' is not a valid socket address"))
}
