use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use zkpipe_core::backend::Proof;
use zkpipe_core::pipeline::PipelineOrchestrator;
use zkpipe_sim::SimBackend;

use crate::output;

/// Verify a saved proof against the verification key stored for its circuit.
///
/// Exits non-zero when the proof is invalid or malformed.
pub async fn run(config_path: &Path, proof_path: &Path) -> Result<()> {
    output::print_header("zkpipe verify");

    let config = super::load_config(config_path)?;
    let bytes = std::fs::read(proof_path)
        .with_context(|| format!("failed to read proof file {}", proof_path.display()))?;
    let proof: Proof = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a zkpipe proof file", proof_path.display()))?;

    output::print_key_value("Proof", &proof_path.display().to_string());
    output::print_key_value("Circuit", &proof.circuit_hash);
    output::print_key_value(
        "Public instances",
        &proof.public_instances.len().to_string(),
    );

    let orchestrator = PipelineOrchestrator::new(Arc::new(SimBackend::new()), config)?;
    if orchestrator.verify_proof(&proof).await? {
        output::print_success("Proof is valid");
        Ok(())
    } else {
        output::print_error("Proof failed verification");
        anyhow::bail!("proof failed verification")
    }
}
