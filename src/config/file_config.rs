use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub tick_interval_secs: Option<u64>,
    pub base_tick_secs: Option<u64>,
    pub seed: Option<u64>,
    pub community_velocity: Option<i64>,

    /// Per-job overrides keyed by job name.
    pub jobs: BTreeMap<String, JobOverrideConfig>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct JobOverrideConfig {
    pub enabled: Option<bool>,
    pub period_secs: Option<u64>,
    pub trigger_probability: Option<f64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
