//! Configuration management for Servrack.
//!
//! This module defines the structure of the `servrack.toml` configuration
//! file and resolves it into the concrete `Settings` the supervisor runs
//! with (timings, log caps, runtime command, failure marker).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

const DEFAULT_RUNTIME: &str = "java -jar";
const DEFAULT_WARMUP_MS: u64 = 15_000;
const DEFAULT_STAGGER_MS: u64 = 1_000;
const DEFAULT_GRACE_MS: u64 = 2_000;
const DEFAULT_POLL_MS: u64 = 2_000;
const DEFAULT_MAX_LOG_BYTES: usize = 64 * 1024;
const DEFAULT_TRIM_CHUNK_BYTES: usize = 8 * 1024;
const DEFAULT_FAILURE_MARKER: &str = "APPLICATION FAILED TO START";

/// Top-level configuration structure corresponding to `servrack.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory that artifact paths are resolved against and the
    /// working directory for spawned processes.
    pub root: Option<String>,
    /// Command invoking the platform runtime, e.g. `"java -jar"`; the
    /// resolved artifact path is appended as the final argument.
    pub runtime: Option<String>,
    /// Warm-up delay after starting the foundational service, in ms.
    pub warmup_ms: Option<u64>,
    /// Stagger delay between the remaining services, in ms.
    pub stagger_ms: Option<u64>,
    /// Grace period before a stop escalates to a forced kill, in ms.
    pub grace_ms: Option<u64>,
    /// Status monitor poll period, in ms.
    pub poll_ms: Option<u64>,
    /// Per-service log retention cap, in bytes.
    pub max_log_bytes: Option<usize>,
    /// Chunk discarded from the oldest end when the cap is exceeded.
    pub trim_chunk_bytes: Option<usize>,
    /// Regex matched against every captured output line; a match flags the
    /// service as failed without waiting for the poller.
    pub failure_marker: Option<String>,
    /// Ordered list of services; the first entry is the foundational
    /// dependency all others wait on.
    #[serde(rename = "service")]
    pub services: Vec<ServiceConfig>,
}

/// Configuration for a single service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Display name of the service.
    pub name: String,
    /// Path to the executable artifact, relative to the root.
    pub artifact: String,
}

/// Resolved runtime settings with defaults applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    /// Runtime program followed by its leading arguments.
    pub runtime: Vec<String>,
    pub warmup: Duration,
    pub stagger: Duration,
    pub grace: Duration,
    pub poll: Duration,
    pub max_log_bytes: usize,
    pub trim_chunk_bytes: usize,
    pub failure_marker: Regex,
}

impl Config {
    /// Resolves the raw configuration into concrete settings.
    pub fn settings(&self) -> Result<Settings> {
        let runtime_raw = self.runtime.as_deref().unwrap_or(DEFAULT_RUNTIME);
        let runtime =
            shell_words::split(runtime_raw).context("failed to parse runtime command")?;
        if runtime.is_empty() {
            bail!("runtime command is empty");
        }
        let marker_raw = self
            .failure_marker
            .as_deref()
            .unwrap_or(DEFAULT_FAILURE_MARKER);
        let failure_marker = Regex::new(marker_raw)
            .with_context(|| format!("invalid failure_marker pattern {marker_raw:?}"))?;
        Ok(Settings {
            root: PathBuf::from(self.root.as_deref().unwrap_or(".")),
            runtime,
            warmup: Duration::from_millis(self.warmup_ms.unwrap_or(DEFAULT_WARMUP_MS)),
            stagger: Duration::from_millis(self.stagger_ms.unwrap_or(DEFAULT_STAGGER_MS)),
            grace: Duration::from_millis(self.grace_ms.unwrap_or(DEFAULT_GRACE_MS)),
            poll: Duration::from_millis(self.poll_ms.unwrap_or(DEFAULT_POLL_MS)),
            max_log_bytes: self.max_log_bytes.unwrap_or(DEFAULT_MAX_LOG_BYTES),
            trim_chunk_bytes: self.trim_chunk_bytes.unwrap_or(DEFAULT_TRIM_CHUNK_BYTES),
            failure_marker,
        })
    }
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let raw = r#"
root = ".."
runtime = "java -jar"
warmup_ms = 12000
stagger_ms = 1500
grace_ms = 3000
poll_ms = 1000
max_log_bytes = 10000
trim_chunk_bytes = 2000
failure_marker = "APPLICATION FAILED TO START"

[[service]]
name = "Eureka Server"
artifact = "eurekaserver/target/EurekaServer-0.0.1-SNAPSHOT.jar"

[[service]]
name = "Api Medico"
artifact = "apimedico/target/ApiMedico-0.0.1-SNAPSHOT.jar"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].name, "Eureka Server");

        let settings = config.settings().unwrap();
        assert_eq!(settings.root, PathBuf::from(".."));
        assert_eq!(settings.runtime, vec!["java", "-jar"]);
        assert_eq!(settings.warmup, Duration::from_millis(12_000));
        assert_eq!(settings.stagger, Duration::from_millis(1_500));
        assert_eq!(settings.grace, Duration::from_millis(3_000));
        assert_eq!(settings.max_log_bytes, 10_000);
        assert!(settings.failure_marker.is_match("... APPLICATION FAILED TO START ..."));
    }

    #[test]
    fn applies_defaults() {
        let raw = r#"
[[service]]
name = "api"
artifact = "api/target/api.jar"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.runtime, vec!["java", "-jar"]);
        assert_eq!(settings.warmup, Duration::from_millis(15_000));
        assert_eq!(settings.stagger, Duration::from_millis(1_000));
        assert_eq!(settings.grace, Duration::from_millis(2_000));
        assert_eq!(settings.poll, Duration::from_millis(2_000));
        assert_eq!(settings.max_log_bytes, 64 * 1024);
    }

    #[test]
    fn rejects_bad_marker_pattern() {
        let config = Config {
            root: None,
            runtime: None,
            warmup_ms: None,
            stagger_ms: None,
            grace_ms: None,
            poll_ms: None,
            max_log_bytes: None,
            trim_chunk_bytes: None,
            failure_marker: Some("(unclosed".into()),
            services: Vec::new(),
        };
        assert!(config.settings().is_err());
    }
}
