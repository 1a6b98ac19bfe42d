//! Configuration file discovery and loading.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use common::errors::{AppError, AppResult};
use common::models::Config;

use crate::{resolver, validation};

/// Annotated sample printed by the `example` subcommand.
pub const EXAMPLE_CONFIG: &str = include_str!("../example.yml");

/// A configuration file and its last successfully loaded content.
#[derive(Debug, Clone)]
pub struct ProbeFile {
    pub path: PathBuf,
    pub config: Arc<Config>,
}

impl ProbeFile {
    pub fn load(path: PathBuf) -> AppResult<Self> {
        let config = Arc::new(load_config(&path)?);
        Ok(Self { path, config })
    }

    /// Re-reads the file; the previous content stays in place on error.
    pub fn reload(&mut self) -> AppResult<()> {
        self.config = Arc::new(load_config(&self.path)?);
        Ok(())
    }
}

/// Parses a YAML file without resolving or validating it.
pub fn read_config(path: &Path) -> AppResult<Config> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&raw)?)
}

/// Reads, resolves and validates one file.
pub fn load_config(path: &Path) -> AppResult<Config> {
    let config = resolver::resolve(read_config(path)?)?;
    validation::validate(&config)?;
    debug!(path = %path.display(), tests = config.tests.len(), "configuration loaded");
    Ok(config)
}

/// Files ending in `.yml` or `.yaml` directly inside `dir`, sorted by path.
pub fn list_config_files(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Explicit files first, then the contents of each directory.
pub fn collect_paths(files: &[PathBuf], dirs: &[PathBuf]) -> AppResult<Vec<PathBuf>> {
    let mut paths = files.to_vec();
    for dir in dirs {
        paths.extend(list_config_files(dir)?);
    }
    if paths.is_empty() {
        return Err(AppError::Config(
            "no config files found, use --config or --config-dir".to_string(),
        ));
    }
    Ok(paths)
}
