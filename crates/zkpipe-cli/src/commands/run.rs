use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use zkpipe_core::backend::{CircuitDescription, InputAssignment, ProvingBackend};
use zkpipe_core::pipeline::PipelineOrchestrator;
use zkpipe_sim::SimBackend;

use crate::output;

/// Sample input used when no `--input` file is given. Matches the shipped
/// market-signal model: three feature values.
const SAMPLE_INPUT: [f64; 3] = [0.45, 24.0, 1.2];

/// Run the pipeline end to end: compile and calibrate the circuit, acquire
/// an SRS, derive keys, compute the witness, and generate a verified proof.
/// Completed stages from a previous run are resumed, not recomputed.
pub async fn run(
    config_path: &Path,
    model_path: &Path,
    input_path: Option<&Path>,
    values: &[f64],
    output_path: Option<&Path>,
) -> Result<()> {
    output::print_header("zkpipe run");

    let config = super::load_config(config_path)?;
    let backend = Arc::new(SimBackend::new());
    output::print_warning(
        "simulated backend — proofs are NOT cryptographically sound; for pipeline testing only",
    );

    let circuit = CircuitDescription::from_file(model_path)?;
    let input = match input_path {
        Some(path) => InputAssignment::from_json_file(path)?,
        None if !values.is_empty() => InputAssignment::new(values.to_vec()),
        None => {
            output::print_warning("no input given, using the built-in sample vector");
            InputAssignment::new(SAMPLE_INPUT.to_vec())
        }
    };

    output::print_key_value("Backend", backend.display_name());
    output::print_key_value("Model", &model_path.display().to_string());
    output::print_key_value("Store", &config.store_dir.display().to_string());

    let orchestrator = PipelineOrchestrator::new(backend, config)?;
    let bundle = orchestrator.run(&circuit, &input).await?;

    output::print_success("Proof generated and verified");
    output::print_key_value("Proof file", &bundle.proof_ref.path.display().to_string());
    output::print_key_value("Proof sha256", &bundle.proof_ref.sha256);
    output::print_key_value("Scale", &bundle.settings.scale.to_string());
    output::print_key_value("Logrows", &bundle.settings.logrows.to_string());
    output::print_key_value(
        "Public instances",
        &bundle.proof.public_instances.len().to_string(),
    );
    if let Some(contract) = &bundle.verifier_contract {
        output::print_key_value("Verifier contract", &contract.path.display().to_string());
    }

    if let Some(path) = output_path {
        let json = serde_json::to_string_pretty(&bundle.proof)?;
        std::fs::write(path, json)?;
        output::print_key_value("Copied to", &path.display().to_string());
    }

    Ok(())
}
