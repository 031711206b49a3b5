use crate::{AppConfig, DistCheckError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "distcheck.toml";

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub exists: bool,
    pub portable: bool,
}

pub fn load_config(prefer_portable: bool) -> Result<LoadedConfig, DistCheckError> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    load_config_from(&path, portable)
}

/// Loads a config file from an explicit location; a missing file yields defaults
pub fn load_config_from(path: &Path, portable: bool) -> Result<LoadedConfig, DistCheckError> {
    let exists = path.exists();

    let mut config = if exists {
        let data = fs::read_to_string(path)?;
        toml::from_str(&data).map_err(|e| DistCheckError::Config(format!("{}: {}", path.display(), e)))?
    } else {
        AppConfig::default()
    };

    config.portable_mode = portable;

    Ok(LoadedConfig {
        config,
        path: path.to_path_buf(),
        exists,
        portable,
    })
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), DistCheckError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = toml::to_string_pretty(config)
        .map_err(|e| DistCheckError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

fn resolve_config_path(prefer_portable: bool) -> Result<(PathBuf, bool), DistCheckError> {
    if let Some(portable_path) = portable_config_path() {
        if prefer_portable || portable_path.exists() {
            return Ok((portable_path, true));
        }
    }

    let dirs = ProjectDirs::from("", "aecs4u", "distcheck")
        .ok_or_else(|| DistCheckError::Config("Unable to determine config directory".to_string()))?;
    Ok((dirs.config_dir().join(CONFIG_FILE_NAME), false))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}
