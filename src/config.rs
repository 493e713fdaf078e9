//! User configuration.
//!
//! Loaded from `config.toml` in the platform config directory (for example
//! `~/.config/sidx/config.toml` on Linux):
//!
//! ```toml
//! variable = "SEARCH_INDEX"
//! active = "papers"          # omit to leave the variable unset
//!
//! [[indices]]
//! name = "scratch"
//! id = "5a8a2b3c-0000-4000-8000-000000000001"
//! description = "throwaway test index"
//! ```
//!
//! Every key is optional. A missing file means built-in defaults.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::catalog::{CatalogError, IndexCatalog, IndexEntry};
use crate::env::{DEFAULT_VARIABLE, EnvError, validate_var_name};
use crate::search::auth::{AUTH_BASE_URL, AuthSettings, NATIVE_CLIENT_ID};
use crate::search::client::SEARCH_BASE_URL;
use crate::selection::ConfiguredActive;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const TOKEN_FILE_NAME: &str = "refresh-tokens.json";

/// Overrides the configured client secret (confidential app mode).
pub const CLIENT_SECRET_ENV: &str = "SIDX_CLIENT_SECRET";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// On-disk shape of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub variable: Option<String>,
    pub active: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub search_base_url: Option<String>,
    pub auth_base_url: Option<String>,
    #[serde(default)]
    pub indices: Vec<IndexEntry>,
}

impl ConfigFile {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Config file that was loaded, if any.
    pub path: Option<PathBuf>,
    pub variable: String,
    pub catalog: IndexCatalog,
    pub active: ConfiguredActive,
    pub search_base_url: String,
    pub auth: AuthSettings,
    pub token_file: PathBuf,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "search-index-env", "sidx")
}

pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

pub fn default_token_file() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().join(TOKEN_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(TOKEN_FILE_NAME))
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist; the default location may be missing.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let file = match std::fs::read_to_string(&path) {
            Ok(text) => Some(ConfigFile::parse(&text, &path)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if explicit {
                    return Err(ConfigError::NotFound(path));
                }
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                None
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let secret_override = std::env::var(CLIENT_SECRET_ENV).ok().filter(|s| !s.is_empty());
        let mut config = Self::from_file(file, secret_override)?;
        if config.active != ConfiguredActive::NoConfigFile {
            config.path = Some(path);
        }
        Ok(config)
    }

    /// Build settings from an already parsed file (or none).
    pub fn from_file(
        file: Option<ConfigFile>,
        client_secret: Option<String>,
    ) -> Result<Self, ConfigError> {
        let present = file.is_some();
        let file = file.unwrap_or_default();

        let variable = file.variable.unwrap_or_else(|| DEFAULT_VARIABLE.to_string());
        validate_var_name(&variable)?;

        let mut catalog = IndexCatalog::builtin();
        catalog.merge(file.indices)?;

        let active = match (present, file.active) {
            (false, _) => ConfiguredActive::NoConfigFile,
            (true, None) => ConfiguredActive::Unset,
            (true, Some(name)) => {
                if !name.eq_ignore_ascii_case(crate::selection::NONE_KEYWORD) {
                    catalog.lookup(&name)?;
                }
                ConfiguredActive::Named(name)
            }
        };

        let auth = AuthSettings {
            client_id: file.client_id.unwrap_or_else(|| NATIVE_CLIENT_ID.to_string()),
            client_secret: client_secret.or(file.client_secret),
            auth_base_url: file.auth_base_url.unwrap_or_else(|| AUTH_BASE_URL.to_string()),
        };

        Ok(Self {
            path: None,
            variable,
            catalog,
            active,
            search_base_url: file
                .search_base_url
                .unwrap_or_else(|| SEARCH_BASE_URL.to_string()),
            auth,
            token_file: default_token_file(),
        })
    }
}
