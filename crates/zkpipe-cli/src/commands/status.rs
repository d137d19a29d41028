use std::path::Path;

use anyhow::Result;

use zkpipe_core::error::PipelineError;
use zkpipe_core::state::{self, Stage, StageStatus};

use crate::output;

/// Show how far the pipeline got, from the persisted state file.
pub fn run(config_path: &Path) -> Result<()> {
    output::print_header("zkpipe status");

    let config = super::load_config(config_path)?;
    let state = match state::load(&config.store_dir) {
        Ok(state) => state,
        Err(PipelineError::ConfigNotFound { .. }) => {
            output::print_warning("no pipeline state found — run `zkpipe run` first");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    output::print_key_value("Store", &config.store_dir.display().to_string());
    output::print_key_value("Circuit", &state.circuit_hash);
    output::print_key_value("Input", &state.input_hash);
    println!();

    for stage in Stage::ALL {
        let status = state.status(stage);
        output::print_stage(
            stage.name(),
            &status.to_string(),
            status == StageStatus::Complete,
        );
        if let Some(error) = state.record(stage).and_then(|r| r.error.as_deref()) {
            output::print_key_value("error", error);
        }
    }

    match state.first_incomplete() {
        Some(stage) => println!("\nnext stage: {stage}"),
        None => output::print_success("pipeline complete"),
    }

    Ok(())
}
