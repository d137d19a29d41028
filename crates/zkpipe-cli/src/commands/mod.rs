pub mod run;
pub mod status;
pub mod verify;

use std::path::Path;

use anyhow::Result;

use zkpipe_core::config::PipelineConfig;
use zkpipe_core::error::PipelineError;

/// Load the pipeline config, falling back to defaults when the file does
/// not exist. A present-but-broken config is still an error.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    match PipelineConfig::load(path) {
        Ok(config) => Ok(config),
        Err(PipelineError::ConfigNotFound { .. }) => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(PipelineConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}
