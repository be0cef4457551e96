use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use sealstore_storage::{
    registry::{StoreOptions, WriteFormat},
    symmetric::KeySize,
};
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/sealstore/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the data directory holding the encrypted store.
    pub data_dir: Option<PathBuf>,
    /// Size of a newly generated storage key: 128 or 256.
    pub key_size_bits: Option<u16>,
    /// Record format for new writes: `aes-cbc` or `aes-gcm`.
    pub write_format: Option<WriteFormat>,
    pub keyring: Option<KeyringConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct KeyringConfig {
    pub service: String,
    pub account: String,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            service: "sealstore".to_string(),
            account: "device-key".to_string(),
        }
    }
}

impl Config {
    pub fn store_options(&self) -> Result<StoreOptions> {
        let key_size = match self.key_size_bits {
            None => KeySize::default(),
            Some(bits) => KeySize::from_bits(bits).ok_or_else(|| {
                color_eyre::eyre::eyre!("key_size_bits must be 128 or 256, got {bits}")
            })?,
        };
        Ok(StoreOptions {
            key_size,
            write_format: self.write_format.unwrap_or_default(),
        })
    }

    pub fn keyring(&self) -> KeyringConfig {
        self.keyring.clone().unwrap_or_default()
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("sealstore").join("config.toml"))
}

/// Write `config` to the default path unless a file already exists there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
