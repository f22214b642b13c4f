use crate::error::{Result, StreamError};
use crate::stage::{StageId, StageOptions};
use crate::temp::{TempFiles, DEFAULT_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const TEMP_DIR_ENV: &str = "STREAMSTACK_TEMP_DIR";
pub const SUFFIX_DEPTH_ENV: &str = "STREAMSTACK_SUFFIX_DEPTH";

/// Pipeline settings, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scratch directory for materialized streams (system temp dir if unset)
    pub temp_dir: Option<PathBuf>,
    /// Prefix for scratch file names
    pub temp_prefix: String,
    /// Maximum number of suffixes peeled from a resource name (unlimited if unset)
    pub suffix_depth: Option<usize>,
    /// Default options per stage id, e.g. `{"gzip": {"level": "9"}}`
    pub options: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            temp_dir: None,
            temp_prefix: DEFAULT_PREFIX.to_string(),
            suffix_depth: None,
            options: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Read a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Defaults overridden by the environment
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(dir) = var(TEMP_DIR_ENV).filter(|d| !d.is_empty()) {
            self.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(depth) = var(SUFFIX_DEPTH_ENV).filter(|d| !d.is_empty()) {
            let depth = depth.trim().parse::<usize>().map_err(|e| {
                StreamError::Config(format!("{}={}: {}", SUFFIX_DEPTH_ENV, depth, e))
            })?;
            self.suffix_depth = Some(depth);
        }
        Ok(self)
    }

    pub fn temp_files(&self) -> TempFiles {
        let dir = self
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        TempFiles::new(dir, self.temp_prefix.clone())
    }

    /// Configured defaults for one stage
    pub fn defaults_for(&self, id: &StageId) -> StageOptions {
        let mut options = StageOptions::new();
        if let Some(values) = self.options.get(id.as_str()) {
            for (key, value) in values {
                options.set(key.clone(), value.clone());
            }
        }
        options
    }

    pub fn set_default(&mut self, id: &StageId, key: &str, value: &str) {
        self.options
            .entry(id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
}
