use crate::error::{Error, IoContext, IoOp, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub db_location: PathBuf,
    pub backup_root: PathBuf,
    pub hash_seed: u64,
}

impl Config {
    pub const DEFAULT_HASH_SEED: u64 = 1_912_251_925_143;

    /// Lays every path out under `data_location`.
    pub fn with_data_location<P: AsRef<Path>>(data_location: P) -> Config {
        let data_location = data_location.as_ref();

        Config {
            db_location: data_location.join("saves.db"),
            backup_root: data_location.join("saves"),
            hash_seed: Self::DEFAULT_HASH_SEED,
        }
    }

    pub fn platform_default() -> Result<Config> {
        let project = Self::project_dirs()?;
        Ok(Self::with_data_location(project.data_dir()))
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("moe", "paoda", "Save Vault").ok_or(Error::NoHomeDir)
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    config_file_path: PathBuf,
}

impl ConfigManager {
    /// Ensures a config file exists at `path`, writing `default` there if it doesn't.
    pub fn new(path: PathBuf, default: &Config) -> Result<ConfigManager> {
        let manager = ConfigManager {
            config_file_path: path,
        };

        if let Some(parent) = manager.config_file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_path(IoOp::CreateDir, parent)?;
            }
        }

        if !manager.config_file_path.exists() {
            manager.write_to_file(default)?;
        }

        Ok(manager)
    }

    pub fn load_from_file(&self) -> Result<Config> {
        let toml_buffer =
            fs::read(&self.config_file_path).with_path(IoOp::Read, &self.config_file_path)?;

        Ok(toml::from_slice::<Config>(&toml_buffer)?)
    }

    pub fn write_to_file(&self, config: &Config) -> Result<()> {
        let toml_string = toml::to_string(config)?;

        fs::write(&self.config_file_path, toml_string)
            .with_path(IoOp::Write, &self.config_file_path)
    }

    pub fn path(&self) -> &Path {
        &self.config_file_path
    }

    pub fn default_path() -> Result<PathBuf> {
        let project = Config::project_dirs()?;
        Ok(project.config_dir().join("config.toml"))
    }
}
