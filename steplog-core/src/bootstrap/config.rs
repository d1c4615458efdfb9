//! Configuration loading

use std::path::Path;

use anyhow::{Context, Result};

use crate::Config;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "STEPLOG_CONFIG_PATH";

const SEARCH_PATHS: [&str; 2] = ["config.yaml", "/config/config.yaml"];

/// Load configuration from a config file and environment variables
///
/// Config file search order:
/// 1. `explicit` (the `--config` flag), which must exist
/// 2. `STEPLOG_CONFIG_PATH` environment variable
/// 3. ./config.yaml (current working directory)
/// 4. /config/config.yaml (container mount path)
/// 5. Fall back to environment variables only
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config = if let Some(path) = explicit {
        if !Path::new(path).exists() {
            anyhow::bail!("Config file {path} does not exist");
        }
        Config::from_file(path).with_context(|| format!("Failed to load config file {path}"))?
    } else if let Some(path) = resolve_config_path() {
        eprintln!("Loading config from {path}");
        Config::from_file(&path).unwrap_or_else(|e| {
            eprintln!("Failed to load {path}: {e}");
            eprintln!("Falling back to environment variables");
            Config::from_env().unwrap_or_default()
        })
    } else {
        Config::from_env().unwrap_or_else(|e| {
            eprintln!("Failed to load config from environment: {e}");
            eprintln!("Using default configuration");
            Config::default()
        })
    };

    // Fail fast on misconfigurations; logging is not initialized yet
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}

fn resolve_config_path() -> Option<String> {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            SEARCH_PATHS
                .iter()
                .find(|p| Path::new(p).exists())
                .map(ToString::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_path_is_loaded() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "aggregator:\n  buffer_size: 7\nserver:\n  http_port: 9123").unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.aggregator.buffer_size, 7);
        assert_eq!(config.server.http_port, 9123);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        assert!(load_config(Some("/nonexistent/steplog.yaml")).is_err());
    }

    #[test]
    fn test_invalid_config_fails_validation() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "aggregator:\n  buffer_size: 0\nsink:\n  kind: clickhouse").unwrap();

        let err = load_config(file.path().to_str()).unwrap_err().to_string();
        assert!(err.contains("2 error(s)"), "{err}");
        assert!(err.contains("buffer_size"));
        assert!(err.contains("sink.clickhouse.url"));
    }

    #[test]
    fn test_validation_error_carries_every_problem() {
        // Nothing is logged yet at this point, so the returned error is all the caller sees
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  heartbeat_interval_seconds: 0\naggregator:\n  history_limit: 0\n  subscriber_capacity: 0"
        )
        .unwrap();

        let err = load_config(file.path().to_str()).unwrap_err().to_string();
        assert!(err.contains("3 error(s)"), "{err}");
        assert!(err.contains("server.heartbeat_interval_seconds"));
        assert!(err.contains("history_limit"));
        assert!(err.contains("subscriber_capacity"));
    }
}
