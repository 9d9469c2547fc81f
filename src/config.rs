use serde::Deserialize;
use anyhow::{Context, Result};
use std::{fs, path::{Path, PathBuf}};

/// Paths and knobs of the updater. Every field has a default so the tool
/// works without a settings file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub config_path: PathBuf,
    pub backup_dir: PathBuf,
    pub service: String,
    pub service_manager: String,
    pub restart_timeout_secs: u64,
    pub hash_alg: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/opt/tblocker/config.yaml"),
            backup_dir: PathBuf::from("/opt/tblocker/backups"),
            service: "tblocker".to_string(),
            service_manager: "systemctl".to_string(),
            restart_timeout_secs: 30,
            hash_alg: default_hash_alg(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path))?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("invalid TOML in {}", path))?;
        Ok(cfg)
    }

    /// Settings for a config file living in `dir`, backups under `dir/backups`.
    pub fn rooted_at(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            config_path: dir.join("config.yaml"),
            backup_dir: dir.join("backups"),
            ..Self::default()
        }
    }

    /// Resolve symlinks and relative segments of paths that already exist,
    /// so a symlinked config is replaced at its target.
    pub fn normalized(mut self) -> Self {
        self.config_path = normalize_path(&self.config_path);
        self.backup_dir = normalize_path(&self.backup_dir);
        self
    }
}

fn normalize_path(p: &Path) -> PathBuf {
    dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

fn default_hash_alg() -> String { "blake3".to_string() }
