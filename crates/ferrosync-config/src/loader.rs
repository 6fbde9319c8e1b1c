//! Locating, loading and writing configuration files

use crate::{Config, ConfigBuilder, ConfigError, ConfigResult};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "FERROSYNC";

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "toml"];

/// Entry points used by the CLI
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from `path` when given, otherwise from the first file in [`Self::search_paths`].
    /// Environment overrides apply in both cases.
    pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
        let builder = match path {
            Some(path) => ConfigBuilder::new().file(path),
            None => match Self::config_exists() {
                Some(found) => ConfigBuilder::new().optional_file(found),
                None => ConfigBuilder::new(),
            },
        };
        builder.env(ENV_PREFIX).build()
    }

    /// Load from the search paths only
    pub fn load_default() -> ConfigResult<Config> {
        Self::load(None)
    }

    /// Load from a file that must exist
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Config> {
        Self::load(Some(path.as_ref()))
    }

    /// Render in the format implied by the extension; YAML unless `.toml` or `.json`
    pub fn render(config: &Config, path: &Path) -> ConfigResult<String> {
        let render_error =
            |format: &'static str, message: String| ConfigError::Render { format, message };
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                toml::to_string_pretty(config).map_err(|e| render_error("TOML", e.to_string()))
            }
            Some("json") => {
                serde_json::to_string_pretty(config).map_err(|e| render_error("JSON", e.to_string()))
            }
            _ => serde_yaml::to_string(config).map_err(|e| render_error("YAML", e.to_string())),
        }
    }

    /// Write `config` to `path`, creating the parent directory if needed
    pub fn save_to_file(config: &Config, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = Self::render(config, path)?;
        let io_error = |source| ConfigError::File {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, content).map_err(io_error)
    }

    /// Write the built-in defaults to `path`
    pub fn generate_default_config(path: impl AsRef<Path>) -> ConfigResult<()> {
        Self::save_to_file(&Config::default(), path)
    }

    /// Candidate files in lookup order: working directory, user config dir, `/etc/ferrosync`
    pub fn search_paths() -> Vec<PathBuf> {
        let mut dirs_and_stems = vec![
            (PathBuf::new(), "ferrosync"),
            (PathBuf::new(), ".ferrosync"),
        ];
        if let Some(dir) = user_config_dir() {
            dirs_and_stems.push((dir.join("ferrosync"), "config"));
        }
        #[cfg(unix)]
        dirs_and_stems.push((PathBuf::from("/etc/ferrosync"), "config"));

        dirs_and_stems
            .into_iter()
            .flat_map(|(dir, stem)| {
                EXTENSIONS
                    .iter()
                    .map(move |ext| dir.join(format!("{stem}.{ext}")))
            })
            .collect()
    }

    /// First existing file among [`Self::search_paths`]
    pub fn config_exists() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.is_file())
    }
}

#[cfg(windows)]
fn user_config_dir() -> Option<PathBuf> {
    std::env::var_os("APPDATA").map(PathBuf::from)
}

#[cfg(not(windows))]
fn user_config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("ferrosync.yaml")]
    #[case("ferrosync.toml")]
    #[case("ferrosync.json")]
    fn test_saved_config_loads_back(#[case] file_name: &str) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(file_name);

        let mut original = Config::default();
        original.scheduler.check_interval_ms = 30_000;
        original.storage.state_file = Some(temp_dir.path().join("state.json"));
        ConfigLoader::save_to_file(&original, &config_path).unwrap();

        let loaded = ConfigLoader::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.scheduler.check_interval_ms, 30_000);
        assert_eq!(loaded.storage.state_file, original.storage.state_file);
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let result = ConfigLoader::load(Some(Path::new("/nonexistent/ferrosync.toml")));
        assert!(matches!(result, Err(ConfigError::File { .. })));
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.yaml");

        ConfigLoader::generate_default_config(&config_path).unwrap();

        let config = ConfigLoader::load_from_file(&config_path).unwrap();
        assert_eq!(config.scheduler.check_interval_ms, 60_000);
    }

    #[test]
    fn test_search_paths_start_in_working_directory() {
        let paths = ConfigLoader::search_paths();
        assert_eq!(paths[0], PathBuf::from("ferrosync.yaml"));
        #[cfg(unix)]
        assert_eq!(
            paths.last(),
            Some(&PathBuf::from("/etc/ferrosync/config.toml"))
        );
    }
}
