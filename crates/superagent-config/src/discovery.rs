//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `<config dir>/superagent/config.toml` (user config)
//! 2. `./superagent.toml` (project-local)
//! 3. CLI arguments (handled externally)

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, SuperagentConfig};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "superagent.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for platform directory resolution.
const APP_NAME: &str = "superagent";

/// Environment variable to override the user config directory.
const CONFIG_DIR_ENV: &str = "SUPERAGENT_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: SuperagentConfig,
    /// Sources that were checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Warnings generated during loading (e.g. plaintext API keys).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load configuration by discovering and merging all config layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Load configuration with explicit control over the user config directory.
///
/// `config_dir` overrides both `SUPERAGENT_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = SuperagentConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    check_plaintext_keys(&config, &mut warnings);

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<SuperagentConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    SuperagentConfig::from_toml(&contents)
}

/// Save configuration to a file, creating parent directories.
pub fn save_config(config: &SuperagentConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// Path of the user config file.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// The user config directory: `SUPERAGENT_CONFIG_DIR`, then the platform default.
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Load one layer and merge it. A malformed file is a warning, not an error.
fn load_layer(config: &mut SuperagentConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}

fn check_plaintext_keys(config: &SuperagentConfig, warnings: &mut Vec<String>) {
    let mut names: Vec<&String> = config
        .providers
        .iter()
        .filter(|(_, p)| p.has_plaintext_api_key())
        .map(|(name, _)| name)
        .collect();
    names.sort();

    for name in names {
        warnings.push(format!(
            "[providers.{}] contains a plaintext API key. Consider using an environment variable instead.",
            name
        ));
    }

    if config
        .tools
        .as_ref()
        .is_some_and(|t| t.search.api_key.as_deref().is_some_and(|k| !k.is_empty()))
    {
        warnings.push(
            "[tools.search] contains a plaintext API key. Consider using an environment variable instead."
                .to_string(),
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nport = 4000\n").unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.server().port, 4000);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_no_files() {
        let dir = TempDir::new().unwrap();
        let empty_config_dir = TempDir::new().unwrap();
        let loaded =
            load_config_with_options(Some(dir.path()), Some(empty_config_dir.path())).unwrap();
        assert!(loaded.config.models.is_none());
        assert!(loaded.loaded_from().is_empty());
    }

    #[test]
    fn test_project_overrides_user() {
        let user_dir = TempDir::new().unwrap();
        let project_dir = TempDir::new().unwrap();

        fs::write(
            user_dir.path().join("config.toml"),
            r#"
[models]
default = "openai/gpt-4o-mini"
critic = "openai/gpt-4o"

[server]
port = 8080
"#,
        )
        .unwrap();
        fs::write(
            project_dir.path().join("superagent.toml"),
            r#"
[models]
default = "local/llama3"

[server]
port = 3000
"#,
        )
        .unwrap();

        let loaded =
            load_config_with_options(Some(project_dir.path()), Some(user_dir.path())).unwrap();
        let models = loaded.config.models.as_ref().unwrap();
        assert_eq!(models.default.as_deref(), Some("local/llama3"));
        assert_eq!(models.critic.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(loaded.config.server().port, 3000);
        assert_eq!(loaded.loaded_from().len(), 2);
    }

    #[test]
    fn test_plaintext_key_warning() {
        let dir = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        fs::write(
            dir.path().join("superagent.toml"),
            r#"
[providers.openai]
api_key = "sk-secret"

[tools.search]
provider = "brave"
api_key = "brave-secret"
"#,
        )
        .unwrap();

        let loaded = load_config_with_options(Some(dir.path()), Some(empty.path())).unwrap();
        assert_eq!(loaded.warnings.len(), 2);
        assert!(loaded.warnings[0].contains("[providers.openai]"));
        assert!(loaded.warnings[1].contains("[tools.search]"));
    }

    #[test]
    fn test_malformed_config_warns_but_continues() {
        let dir = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        fs::write(dir.path().join("superagent.toml"), "not valid toml {{{{").unwrap();

        let loaded = load_config_with_options(Some(dir.path()), Some(empty.path())).unwrap();
        assert!(!loaded.warnings.is_empty());
        assert!(loaded.warnings[0].contains("Failed to load"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = SuperagentConfig::new();
        config.server = Some(crate::ServerConfig {
            port: 9100,
            ..Default::default()
        });

        save_config(&config, &path).unwrap();
        let loaded = load_config_file(&path).unwrap();
        assert_eq!(loaded.server().port, 9100);
    }
}
