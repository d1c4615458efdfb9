use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub aggregator: AggregatorConfig,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Ping interval for viewer WebSockets
    pub heartbeat_interval_seconds: u64,
    /// Agent ingest sockets that stay silent this long are dropped
    pub ingest_idle_timeout_seconds: u64,
    /// Largest accepted WebSocket frame in bytes
    pub max_message_size: usize,
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            heartbeat_interval_seconds: 30,
            ingest_idle_timeout_seconds: 300,
            max_message_size: 1024 * 1024,
            shutdown_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Buffering, flushing and fan-out knobs of the log aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Buffered entries per stream that trigger a flush
    pub buffer_size: usize,
    /// Periodic flush interval per stream
    pub flush_interval_ms: u64,
    /// Capacity of every live subscriber queue
    pub subscriber_capacity: usize,
    /// Maximum historical entries replayed at the start of a tail
    pub history_limit: usize,
    /// How long a closed source keeps rejecting pushes
    pub closed_retention_seconds: u64,
    /// Upper bound of remembered closed sources
    pub max_closed_sources: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            flush_interval_ms: 3000,
            subscriber_capacity: 100,
            history_limit: 1000,
            closed_retention_seconds: 3600,
            max_closed_sources: 100_000,
        }
    }
}

impl AggregatorConfig {
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub const fn closed_retention(&self) -> Duration {
        Duration::from_secs(self.closed_retention_seconds)
    }
}

/// Which persistence sink backs the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// In-process storage, lost on restart
    #[default]
    Memory,
    /// ClickHouse over its HTTP interface
    Clickhouse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub clickhouse: ClickHouseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickHouseConfig {
    /// HTTP endpoint, e.g. `http://localhost:8123`
    pub url: String,
    pub database: String,
    pub table: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout_seconds: u64,
    /// Issue `CREATE TABLE IF NOT EXISTS` at startup
    pub create_table: bool,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            database: "default".to_string(),
            table: "step_run_logs".to_string(),
            user: None,
            password: None,
            timeout_seconds: 10,
            create_table: true,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // STEPLOG_SERVER__HTTP_PORT, STEPLOG_AGGREGATOR__BUFFER_SIZE, ...
        builder = builder.add_source(
            Environment::with_prefix("STEPLOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check values that would otherwise fail at runtime
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.aggregator.buffer_size == 0 {
            errors.push("aggregator.buffer_size must be greater than 0".to_string());
        }
        if self.aggregator.flush_interval_ms == 0 {
            errors.push("aggregator.flush_interval_ms must be greater than 0".to_string());
        }
        if self.aggregator.subscriber_capacity == 0 {
            errors.push("aggregator.subscriber_capacity must be greater than 0".to_string());
        }
        if self.aggregator.history_limit == 0 {
            errors.push("aggregator.history_limit must be greater than 0".to_string());
        }
        if self.server.heartbeat_interval_seconds == 0 {
            errors.push("server.heartbeat_interval_seconds must be greater than 0".to_string());
        }
        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level '{}' is not a valid level", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be 'json' or 'pretty', got '{}'",
                self.logging.format
            ));
        }
        if self.sink.kind == SinkKind::Clickhouse && self.sink.clickhouse.url.is_empty() {
            errors.push("sink.clickhouse.url is required when sink.kind = clickhouse".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}
