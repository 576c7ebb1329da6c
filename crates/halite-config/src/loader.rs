//! Configuration loader with multi-source merging.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::HaliteConfig;

/// Loads configuration from defaults, an optional TOML file, and
/// `HAL_`-prefixed environment variables, in that precedence order.
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    /// Creates a loader with defaults only.
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: "HAL".to_string(),
        }
    }

    /// Adds a TOML config file (required to exist once set).
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Overrides the environment variable prefix (default: `HAL`).
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads, merges, deserializes, and validates the configuration.
    pub fn load(self) -> Result<HaliteConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults
        let defaults = HaliteConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. Config file (halite.toml)
        if let Some(path) = &self.file {
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        // 3. Environment variables (HAL_*)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let merged = builder.build().context("failed to build configuration")?;
        let cfg: HaliteConfig = merged
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[timing]
election_min_ms = 200
election_max_ms = 400
heartbeat_interval_ms = 40

[storage]
data_dir = "/tmp/halite-test"
segment_max_bytes = 1048576
snapshot_threshold_bytes = 0

[[nodes]]
id = 0
peer_addr = "127.0.0.1:7100"
client_addr = "127.0.0.1:7200"

[[nodes]]
id = 1
peer_addr = "127.0.0.1:7101"
client_addr = "127.0.0.1:7201"

[[nodes]]
id = 2
peer_addr = "127.0.0.1:7102"
client_addr = "127.0.0.1:7202"
"#;

    #[test]
    fn loads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let cfg = ConfigLoader::new().with_file(file.path()).load().unwrap();
        assert_eq!(cfg.nodes.len(), 3);
        assert_eq!(cfg.timing.election_min_ms, 200);
        assert_eq!(cfg.storage.snapshot_threshold_bytes, 0);
        // Unspecified sections fall back to defaults.
        assert_eq!(cfg.session.mailbox_capacity, 256);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/halite.toml")
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn invalid_timing_fails_validation() {
        let bad = SAMPLE.replace("heartbeat_interval_ms = 40", "heartbeat_interval_ms = 900");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bad.as_bytes()).unwrap();
        assert!(ConfigLoader::new().with_file(file.path()).load().is_err());
    }
}
