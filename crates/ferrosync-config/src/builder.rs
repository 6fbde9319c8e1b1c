//! Layered configuration loading
//!
//! The built-in defaults are always the bottom layer. Files and environment prefixes are
//! applied on top in the order they were added, so later layers win.

use crate::{Config, ConfigError, ConfigResult};
use config::{Environment, File, FileFormat};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum Layer {
    File { path: PathBuf, required: bool },
    Env { prefix: String },
}

/// Collects configuration layers and merges them into a validated [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    layers: Vec<Layer>,
    env_separator: String,
}

impl ConfigBuilder {
    /// Builder with only the built-in defaults
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            env_separator: "__".to_string(),
        }
    }

    /// Layer a file that must exist
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.layers.push(Layer::File {
            path: path.as_ref().to_path_buf(),
            required: true,
        });
        self
    }

    /// Layer a file that is skipped when missing
    pub fn optional_file(mut self, path: impl AsRef<Path>) -> Self {
        self.layers.push(Layer::File {
            path: path.as_ref().to_path_buf(),
            required: false,
        });
        self
    }

    /// Layer `PREFIX__SECTION__KEY` environment variables
    pub fn env(mut self, prefix: impl Into<String>) -> Self {
        self.layers.push(Layer::Env {
            prefix: prefix.into(),
        });
        self
    }

    /// Separator between nested keys in variable names (default `__`)
    pub fn env_separator(mut self, separator: impl Into<String>) -> Self {
        self.env_separator = separator.into();
        self
    }

    /// Merge the layers and validate the result
    pub fn build(self) -> ConfigResult<Config> {
        let mut merged =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        for layer in self.layers {
            merged = match layer {
                Layer::File { path, required } => {
                    if required && !path.exists() {
                        return Err(ConfigError::File {
                            path,
                            source: std::io::Error::new(
                                std::io::ErrorKind::NotFound,
                                "configuration file not found",
                            ),
                        });
                    }
                    let format = file_format(&path);
                    merged.add_source(File::from(path).format(format).required(required))
                }
                Layer::Env { prefix } => merged.add_source(
                    Environment::with_prefix(&prefix)
                        .separator(&self.env_separator)
                        .try_parsing(true),
                ),
            };
        }

        let config: Config = merged.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Yaml,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn test_defaults_only() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = yaml_file(
            r#"
scheduler:
  check_interval_ms: 15000
  max_concurrent_runs: 4
retry:
  transfer:
    max_attempts: 5
    initial_delay_ms: 200
    max_delay_ms: 5000
    backoff_multiplier: 1.5
"#,
        );

        let config = ConfigBuilder::new().file(file.path()).build().unwrap();

        assert_eq!(config.scheduler.check_interval_ms, 15000);
        assert_eq!(config.scheduler.max_concurrent_runs, 4);
        assert_eq!(config.retry.transfer.max_attempts, 5);
        assert_eq!(config.retry.connect.max_attempts, 3);
        assert!(config.scheduler.use_local_time);
    }

    #[test]
    fn test_out_of_range_value_is_rejected() {
        let file = yaml_file("scheduler:\n  check_interval_ms: 10\n");

        let error = ConfigBuilder::new().file(file.path()).build().unwrap_err();
        assert!(matches!(
            error,
            ConfigError::Invalid {
                field: "scheduler.check_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_required_file_fails() {
        let result = ConfigBuilder::new()
            .file("/nonexistent/ferrosync.yaml")
            .build();
        assert!(matches!(result, Err(ConfigError::File { .. })));
    }

    #[test]
    fn test_missing_optional_file_is_skipped() {
        let config = ConfigBuilder::new()
            .optional_file("/nonexistent/ferrosync.yaml")
            .build()
            .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_later_file_wins() {
        let base = yaml_file("transport:\n  connect_timeout_secs: 10\n  passive_mode: false\n");
        let site = yaml_file("transport:\n  connect_timeout_secs: 5\n");

        let config = ConfigBuilder::new()
            .file(base.path())
            .file(site.path())
            .build()
            .unwrap();
        assert_eq!(config.transport.connect_timeout_secs, 5);
        assert!(!config.transport.passive_mode);
    }
}
