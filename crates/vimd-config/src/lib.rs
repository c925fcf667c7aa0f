//! Configuration management for vimd.
//!
//! Parses `vimd.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories, falling back to the
//! per-user file at `~/.vimd/config.toml`.
//!
//! CLI settings can be applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! `server.host` supports environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default

mod expand;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "vimd.toml";

/// Per-user configuration file, used when no project file is found.
const GLOBAL_CONFIG_PATH: &str = "~/.vimd/config.toml";

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preview server configuration.
    pub server: ServerConfig,
    /// Source file watching configuration.
    pub watch: WatchConfig,

    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Preview server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Requested server port. Another port is negotiated when it is taken.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 38080,
        }
    }
}

/// Source file watching configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Glob patterns (relative to the watched directory) to ignore.
    pub ignored: Vec<String>,
    /// Quiet period before a change triggers reconversion, in milliseconds.
    pub debounce_ms: u64,
}

impl WatchConfig {
    /// Debounce interval as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            ignored: vec![
                "node_modules/**".to_owned(),
                ".git/**".to_owned(),
                "dist/**".to_owned(),
            ],
            debounce_ms: 100,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`server.host`").
        field: String,
        /// Error message (e.g., "${`VIMD_HOST`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file. Otherwise searches
    /// for `vimd.toml` in the current directory and its parents, then for
    /// `~/.vimd/config.toml`, and finally falls back to defaults.
    ///
    /// CLI settings are applied after loading, so CLI arguments take
    /// precedence over file values. The merged result is validated.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the merged configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
    }

    /// Search for a project config file, then the per-user one.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        let global = PathBuf::from(shellexpand::tilde(GLOBAL_CONFIG_PATH).into_owned());
        global.exists().then_some(global)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        config.server.host = expand::expand_env(&config.server.host, "server.host")?;
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;

        // Port 0 would let the OS pick a port, which defeats port-keyed sessions
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }

        if let Some(pattern) = self.watch.ignored.iter().find(|p| p.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "watch.ignored contains an empty pattern: {pattern:?}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 38080);
        assert_eq!(
            config.watch.ignored,
            vec!["node_modules/**", ".git/**", "dist/**"]
        );
        assert_eq!(config.watch.debounce(), Duration::from_millis(100));
        assert!(config.config_path.is_none());
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 38080);
    }

    #[test]
    fn test_parse_server_config() {
        let toml = r#"
[server]
host = "0.0.0.0"
port = 9000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_parse_watch_config() {
        let toml = r#"
[watch]
ignored = ["target/**"]
debounce_ms = 250
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.watch.ignored, vec!["target/**"]);
        assert_eq!(config.watch.debounce(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_watch_section_keeps_defaults() {
        let toml = r"
[watch]
debounce_ms = 10
";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.watch.ignored.len(), 3);
        assert_eq!(config.watch.debounce_ms, 10);
    }

    #[test]
    fn test_apply_cli_settings_port() {
        let mut config = Config::default();
        let overrides = CliSettings {
            port: Some(9000),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "localhost"); // Unchanged
    }

    #[test]
    fn test_apply_cli_settings_host() {
        let mut config = Config::default();
        let overrides = CliSettings {
            host: Some("127.0.0.1".to_owned()),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 38080); // Unchanged
    }

    #[test]
    fn test_validate_rejects_port_zero() {
        let mut config = Config::default();
        config.server.port = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("server.port"));
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let mut config = Config::default();
        config.server.host = "  ".to_owned();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.host"));
    }

    #[test]
    fn test_validate_rejects_empty_ignore_pattern() {
        let mut config = Config::default();
        config.watch.ignored.push(String::new());

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vimd.toml");
        std::fs::write(&path, "[server]\nport = 4000\n").unwrap();

        let config = Config::load(Some(&path), None).unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.config_path, Some(path));
    }

    #[test]
    fn test_load_applies_cli_over_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vimd.toml");
        std::fs::write(&path, "[server]\nport = 4000\n").unwrap();
        let cli = CliSettings {
            port: Some(5000),
            ..Default::default()
        };

        let config = Config::load(Some(&path), Some(&cli)).unwrap();

        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_load_rejects_invalid_cli_port() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vimd.toml");
        std::fs::write(&path, "").unwrap();
        let cli = CliSettings {
            port: Some(0),
            ..Default::default()
        };

        let result = Config::load(Some(&path), Some(&cli));

        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let result = Config::load(Some(Path::new("/nonexistent/vimd.toml")), None);
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_reports_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vimd.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        let result = Config::load(Some(&path), None);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
