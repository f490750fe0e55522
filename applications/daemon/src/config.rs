/// Daemon configuration
use crate::error::{DaemonError, Result};
use ambience_playback::{EngineConfig, WatchdogConfig};
use ambience_schedule::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub catalog: CatalogSettings,

    #[serde(default)]
    pub output: OutputSettings,

    #[serde(default)]
    pub state: StateSettings,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,

    #[serde(default)]
    pub schedule: OrchestratorConfig,

    #[serde(default)]
    pub rotation: RotationSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogSettings {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputSettings {
    #[serde(default)]
    pub target: OutputTarget,

    /// Required when `target` is `file`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputTarget {
    /// Raw s16le stereo on stdout
    #[default]
    Stdout,
    /// Raw s16le stereo into a file
    File,
    /// Render and discard
    Null,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateSettings {
    #[serde(default = "default_executions_path")]
    pub executions_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RotationSettings {
    /// Spread tracks of the same artist apart
    #[serde(default = "default_true")]
    pub avoid_same_artist: bool,

    /// Fixed shuffle seed (random when absent)
    #[serde(default)]
    pub seed: Option<u64>,
}

impl DaemonConfig {
    /// Load configuration from an optional TOML file and the environment
    ///
    /// Environment variables use the `AMBIENCE_` prefix and `__` between
    /// nested keys, e.g. `AMBIENCE_ENGINE__SAMPLE_RATE=48000`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        let config_path = path.map_or_else(|| PathBuf::from("ambience.toml"), Path::to_path_buf);
        if config_path.exists() {
            settings = settings.add_source(config::File::from(config_path));
        } else if path.is_some() {
            return Err(DaemonError::Config(format!(
                "config file {} not found",
                config_path.display()
            )));
        }

        settings = settings.add_source(
            config::Environment::with_prefix("AMBIENCE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = settings
            .build()
            .map_err(|e| DaemonError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| DaemonError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.sample_rate == 0 {
            return Err(DaemonError::Config(
                "engine.sample_rate must be positive".to_string(),
            ));
        }

        if self.engine.block_ms == 0 {
            return Err(DaemonError::Config(
                "engine.block_ms must be positive".to_string(),
            ));
        }

        if self.output.target == OutputTarget::File && self.output.path.is_none() {
            return Err(DaemonError::Config(
                "output.path is required for the file target (set AMBIENCE_OUTPUT__PATH)"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

// Default values
impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            executions_path: default_executions_path(),
        }
    }
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            avoid_same_artist: true,
            seed: None,
        }
    }
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.json")
}

fn default_executions_path() -> PathBuf {
    PathBuf::from("./data/executions.json")
}

fn default_true() -> bool {
    true
}
