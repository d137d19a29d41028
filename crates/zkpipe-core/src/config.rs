//! Pipeline configuration loading and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::RunArgs;
use crate::error::{PipelineError, Result};

fn default_store_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_scale_min() -> u32 {
    0
}

fn default_scale_max() -> u32 {
    12
}

fn default_tolerance() -> f64 {
    0.01
}

fn default_srs_attempts() -> u32 {
    3
}

fn default_srs_backoff_ms() -> u64 {
    500
}

/// Caller-facing pipeline configuration.
///
/// Every field has a default, so a partial config file (or none at all) is
/// usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory backing the artifact store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Requested circuit visibility.
    #[serde(default)]
    pub run_args: RunArgs,

    /// Inclusive lower bound of the calibration scale search.
    #[serde(default = "default_scale_min")]
    pub scale_search_min: u32,

    /// Inclusive upper bound of the calibration scale search.
    #[serde(default = "default_scale_max")]
    pub scale_search_max: u32,

    /// Maximum tolerated quantization error during calibration.
    #[serde(default = "default_tolerance")]
    pub calibration_tolerance: f64,

    /// Bounded retries for transient SRS acquisition failures.
    #[serde(default = "default_srs_attempts")]
    pub srs_max_attempts: u32,

    /// Base backoff between SRS attempts, in milliseconds.
    #[serde(default = "default_srs_backoff_ms")]
    pub srs_backoff_ms: u64,

    /// Per-stage deadline in seconds. `None` disables stage timeouts.
    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            run_args: RunArgs::default(),
            scale_search_min: default_scale_min(),
            scale_search_max: default_scale_max(),
            calibration_tolerance: default_tolerance(),
            srs_max_attempts: default_srs_attempts(),
            srs_backoff_ms: default_srs_backoff_ms(),
            stage_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| PipelineError::ConfigNotFound {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&contents).map_err(|e| PipelineError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| PipelineError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    pub fn srs_backoff(&self) -> Duration {
        Duration::from_millis(self.srs_backoff_ms)
    }
}
