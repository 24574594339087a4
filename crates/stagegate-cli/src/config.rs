use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stagegate_core::{DependencyTable, StageCatalog};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_STORE_PATH: &str = "dp_log.sqlite";
pub const DEFAULT_ROSTER_COLUMN: &str = "recording";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub store_path: Option<PathBuf>,
    pub busy_timeout_ms: Option<u64>,
    pub roster: RosterConfig,
    pub stages: Vec<StageConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RosterConfig {
    pub path: Option<PathBuf>,
    pub column: String,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            path: None,
            column: DEFAULT_ROSTER_COLUMN.to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StageConfig {
    pub name: String,
    #[serde(default)]
    pub requires: Vec<u8>,
    #[serde(default)]
    pub requires_when: BTreeMap<String, Vec<u8>>,
}

impl TrackerConfig {
    /// A missing file means defaults; a file that fails to parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn store_path(&self, override_path: Option<&Path>) -> PathBuf {
        override_path
            .map(Path::to_path_buf)
            .or_else(|| self.store_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS))
    }

    /// Configured stages, or the reference pipeline when none are listed.
    pub fn catalog(&self) -> Result<StageCatalog> {
        if self.stages.is_empty() {
            return Ok(StageCatalog::reference());
        }
        Ok(StageCatalog::new(
            self.stages.iter().map(|stage| stage.name.clone()),
        )?)
    }

    pub fn dependency_table(&self) -> Result<DependencyTable> {
        if self.stages.is_empty() {
            return Ok(DependencyTable::reference());
        }
        let mut table = DependencyTable::new(self.catalog()?);
        for (index, stage) in self.stages.iter().enumerate() {
            let ordinal = u8::try_from(index + 1).context("too many stages")?;
            for prerequisite in &stage.requires {
                table
                    .require(ordinal, *prerequisite)
                    .with_context(|| format!("stage {:?}", stage.name))?;
            }
            for (condition, prerequisites) in &stage.requires_when {
                for prerequisite in prerequisites {
                    table
                        .require_when(ordinal, condition, *prerequisite)
                        .with_context(|| format!("stage {:?}", stage.name))?;
                }
            }
        }
        Ok(table)
    }
}

/// `--config` / `STAGEGATE_CONFIG` first, then the user config directory.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stagegate/config.toml")
}
