use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::KiraError;
use crate::fs_util::write_atomic;
use crate::migration::Migrator;
use crate::store::{DEFAULT_SCHEMA_VERSION, SampleStore};

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub search_roots: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrations_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub path: PathBuf,
    pub search_roots: Vec<Utf8PathBuf>,
    pub schema_version: String,
    pub migrations_path: Option<Utf8PathBuf>,
    config: Config,
}

impl ResolvedConfig {
    /// Builds the record store this configuration describes. A missing patch
    /// file disables migrations; an unreadable one is an error.
    pub fn store(&self) -> Result<SampleStore, KiraError> {
        let migrator = match &self.migrations_path {
            Some(path) => Migrator::load(path)?,
            None => Migrator::empty(),
        };
        Ok(SampleStore::new(self.schema_version.clone(), migrator))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns false when the root was already present.
    pub fn add_search_root(&mut self, root: &str) -> Result<bool, KiraError> {
        if self.config.search_roots.iter().any(|existing| existing == root) {
            return Ok(false);
        }
        self.config.search_roots.push(root.to_string());
        self.save()?;
        Ok(true)
    }

    pub fn remove_search_root(&mut self, root: &str) -> Result<bool, KiraError> {
        let before = self.config.search_roots.len();
        self.config.search_roots.retain(|existing| existing != root);
        if self.config.search_roots.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    fn save(&mut self) -> Result<(), KiraError> {
        let path = Utf8PathBuf::from_path_buf(self.path.clone())
            .map_err(|_| KiraError::Filesystem("invalid config path".to_string()))?;
        let content = serde_json::to_vec_pretty(&self.config)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;
        write_atomic(&path, &content)?;
        self.search_roots = roots(&self.config);
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn default_path() -> Result<PathBuf, KiraError> {
        BaseDirs::new()
            .map(|dirs| {
                dirs.config_dir()
                    .join("kira-sample-manager")
                    .join("config.json")
            })
            .ok_or_else(|| KiraError::Filesystem("unable to resolve config directory".to_string()))
    }

    /// An explicit path must be readable and valid. The default location
    /// falls back to defaults when missing or corrupt.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let (config_path, explicit) = match path {
            Some(path) => (PathBuf::from(path), true),
            None => (Self::default_path()?, false),
        };

        if !explicit && !config_path.exists() {
            return Ok(Self::resolve_config(config_path, Config::default()));
        }

        let content = match fs::read_to_string(&config_path) {
            Ok(content) => content,
            Err(_) if !explicit => {
                warn!(path = %config_path.display(), "config unreadable; using defaults");
                return Ok(Self::resolve_config(config_path, Config::default()));
            }
            Err(_) => return Err(KiraError::ConfigRead(config_path)),
        };
        let config = match serde_json::from_str::<Config>(&content) {
            Ok(config) => config,
            Err(err) if !explicit => {
                warn!(path = %config_path.display(), error = %err, "config corrupt; using defaults");
                Config::default()
            }
            Err(err) => return Err(KiraError::ConfigParse(err.to_string())),
        };

        Ok(Self::resolve_config(config_path, config))
    }

    pub fn resolve_config(path: PathBuf, config: Config) -> ResolvedConfig {
        ResolvedConfig {
            path,
            search_roots: roots(&config),
            schema_version: config
                .schema_version
                .clone()
                .unwrap_or_else(|| DEFAULT_SCHEMA_VERSION.to_string()),
            migrations_path: config.migrations_path.as_ref().map(Utf8PathBuf::from),
            config,
        }
    }
}

fn roots(config: &Config) -> Vec<Utf8PathBuf> {
    config.search_roots.iter().map(Utf8PathBuf::from).collect()
}
