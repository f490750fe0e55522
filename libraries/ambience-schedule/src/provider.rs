//! Schedule providers
//!
//! The orchestrator asks its provider for the current definitions on
//! every tick, so catalog edits take effect without a restart.

use crate::error::{Result, ScheduleError};
use ambience_core::{AudioTrack, ScheduleDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Source of schedule definitions, in declaration order
#[async_trait]
pub trait ScheduleProvider: Send + Sync {
    async fn schedules(&self) -> Result<Vec<ScheduleDefinition>>;
}

/// Fixed list of definitions
#[derive(Debug, Clone, Default)]
pub struct StaticScheduleProvider {
    schedules: Vec<ScheduleDefinition>,
}

impl StaticScheduleProvider {
    pub fn new(schedules: Vec<ScheduleDefinition>) -> Self {
        Self { schedules }
    }
}

#[async_trait]
impl ScheduleProvider for StaticScheduleProvider {
    async fn schedules(&self) -> Result<Vec<ScheduleDefinition>> {
        Ok(self.schedules.clone())
    }
}

/// Catalog file contents: the music bed plus the schedules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub music: Vec<AudioTrack>,
    #[serde(default)]
    pub schedules: Vec<ScheduleDefinition>,
}

impl Catalog {
    /// Read and parse a catalog file
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ScheduleError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| ScheduleError::parse(path, e))
    }

    /// Definitions that pass validation; invalid ones are logged and dropped
    pub fn valid_schedules(&self) -> Vec<ScheduleDefinition> {
        self.schedules
            .iter()
            .filter(|def| match def.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(schedule = %def.id, error = %e, "Skipping invalid schedule");
                    false
                }
            })
            .cloned()
            .collect()
    }
}

/// Reads the `schedules` section of a catalog file on every call
#[derive(Debug, Clone)]
pub struct JsonCatalogProvider {
    path: PathBuf,
}

impl JsonCatalogProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ScheduleProvider for JsonCatalogProvider {
    async fn schedules(&self) -> Result<Vec<ScheduleDefinition>> {
        Ok(Catalog::load(&self.path).await?.valid_schedules())
    }
}
