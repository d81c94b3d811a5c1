use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;
use toml;

use crate::error::ConfigError;

pub const CONFIG_PATH: &str = "config.toml";
pub const CLIENT_ID_VAR: &str = "ENCORE_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "ENCORE_CLIENT_SECRET";

pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: "encore.db".to_string() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig {
                client_id: "your_catalog_client_id".to_string(),
                client_secret: "your_catalog_client_secret".to_string(),
                token_url: default_token_url(),
                api_base_url: default_api_base_url(),
                timeout_secs: default_timeout_secs(),
            },
            storage: StorageConfig::default(),
        }
    }
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Loads `.env`, then the TOML file at `config_path`, then applies the
/// credential overrides from the environment.
///
/// A missing file is replaced by a default one and reported as
/// [`ConfigError::Missing`].
pub fn load_config(config_path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config_path = config_path.as_ref();
    dotenv::dotenv().ok();

    if !config_path.exists() {
        let toml_string = toml::to_string_pretty(&Config::default())?;

        let mut file = fs::File::create(config_path)?;
        file.write_all(toml_string.as_bytes())?;

        log::warn!("Wrote default configuration to {}", config_path.display());
        return Err(ConfigError::Missing(config_path.display().to_string()));
    }

    let config_str = fs::read_to_string(config_path)?;
    let mut config = parse_config(&config_str)?;
    apply_overrides(&mut config, |key| env::var(key).ok());
    Ok(config)
}

pub fn parse_config(config_str: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(config_str)?)
}

fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(client_id) = lookup(CLIENT_ID_VAR).filter(|v| !v.is_empty()) {
        log::debug!("Using client id from {}", CLIENT_ID_VAR);
        config.catalog.client_id = client_id;
    }
    if let Some(client_secret) = lookup(CLIENT_SECRET_VAR).filter(|v| !v.is_empty()) {
        log::debug!("Using client secret from {}", CLIENT_SECRET_VAR);
        config.catalog.client_secret = client_secret;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = parse_config(
            r#"
            [catalog]
            client_id = "id"
            client_secret = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.catalog.client_id, "id");
        assert_eq!(config.catalog.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.catalog.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.catalog.timeout_secs, 10);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn rejects_config_without_catalog_section() {
        let err = parse_config("[storage]\npath = \"x.db\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn writes_default_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(parse_config(&written).unwrap(), Config::default());
    }

    #[test]
    fn environment_overrides_credentials() {
        let mut config = Config::default();
        apply_overrides(&mut config, |key| match key {
            CLIENT_ID_VAR => Some("env-id".to_string()),
            CLIENT_SECRET_VAR => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.catalog.client_id, "env-id");
        assert_eq!(config.catalog.client_secret, "your_catalog_client_secret");
    }
}
