//! Simulated proving backend for zkpipe.
//!
//! **This backend is NOT cryptographic.** Its "proofs" are deterministic
//! hash commitments that are internally consistent (a proof verifies against
//! the matching key and instances, and any tampering makes verification
//! fail) but offer zero soundness against an adversary who knows the scheme.
//! It exists so the pipeline, its persistence, and its failure handling can
//! be exercised end to end without a real prover — as an explicit,
//! separately-shipped test mode, never as a silent fallback inside the
//! pipeline itself.
//!
//! Circuits are single-layer linear models (see [`model::LinearModel`])
//! evaluated in fixed point, matching the shape of the original deployment:
//! a fixed-arity float vector in, one score out.

pub mod model;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use zkpipe_core::backend::{
    content_hash, BackendCapabilities, CalibrationReport, CircuitDescription, CompiledCircuit,
    InputAssignment, Proof, ProvingBackend, ProvingKey, RunArgs, Settings, Srs, VerificationKey,
    Visibility, Witness,
};
use zkpipe_core::error::{PipelineError, Result};

use crate::model::{encode_instance, quantization_error, quantize, LinearModel};

const SCHEME: &str = "sim-kzg";
const MAX_LOGROWS: u32 = 24;

/// Proof blob layout: 32-byte witness commitment followed by a 32-byte tag.
const PROOF_LEN: usize = 64;
/// The verification-key material is the leading slice of the proving key,
/// mirroring how a real proving key embeds its verifier.
const VK_LEN: usize = 64;
const PK_LEN: usize = 256;

/// The simulated backend. Stateless; all outputs are pure functions of the
/// inputs, so every pipeline stage is deterministic.
#[derive(Debug, Default)]
pub struct SimBackend;

impl SimBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Expand a seed into `len` bytes by hash chaining.
fn expand(seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter: u64 = 0;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_le_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

fn witness_commitment(assignments: &[i64]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"zkpipe-sim/witness");
    for a in assignments {
        hasher.update(a.to_le_bytes());
    }
    hasher.finalize().into()
}

fn proof_tag(
    vk_material: &[u8],
    circuit_hash: &str,
    commitment: &[u8; 32],
    instances: &[[u8; 32]],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"zkpipe-sim/proof");
    hasher.update(vk_material);
    hasher.update(circuit_hash.as_bytes());
    hasher.update(commitment);
    for instance in instances {
        hasher.update(instance);
    }
    hasher.finalize().into()
}

#[async_trait]
impl ProvingBackend for SimBackend {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn display_name(&self) -> &'static str {
        "simulated backend (NOT cryptographic)"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            api_version: 1,
            supports_srs_generation: true,
            supports_verifier_export: true,
            max_logrows: MAX_LOGROWS,
        }
    }

    async fn gen_settings(
        &self,
        circuit: &CircuitDescription,
        run_args: &RunArgs,
    ) -> Result<Settings> {
        let model = LinearModel::parse(circuit.bytes())?;
        Ok(Settings {
            input_visibility: run_args.input_visibility,
            output_visibility: run_args.output_visibility,
            param_visibility: run_args.param_visibility,
            // Placeholder until calibration picks a scale.
            scale: 0,
            logrows: model.logrows().min(MAX_LOGROWS),
        })
    }

    async fn calibrate(
        &self,
        circuit: &CircuitDescription,
        _settings: &Settings,
        inputs: &[InputAssignment],
        scale: u32,
    ) -> Result<CalibrationReport> {
        let model = LinearModel::parse(circuit.bytes())?;
        let mut max_error = 0f64;
        let mut overflow = false;

        for input in inputs {
            if input.arity() != model.inputs() {
                return Err(PipelineError::WitnessEvaluation(format!(
                    "calibration input has arity {}, model expects {}",
                    input.arity(),
                    model.inputs()
                )));
            }
            let mut quantized = Vec::with_capacity(input.arity());
            for x in input.values() {
                match quantize(*x, scale) {
                    Some(q) => quantized.push(q),
                    None => {
                        overflow = true;
                        continue;
                    }
                }
                if let Some(err) = quantization_error(*x, scale) {
                    max_error = max_error.max(err);
                }
            }
            // Only a fully representable input can be evaluated.
            if quantized.len() == input.arity() && model.eval_fixed(&quantized, scale).is_err() {
                overflow = true;
            }
        }

        Ok(CalibrationReport {
            scale,
            max_quantization_error: max_error,
            overflow,
        })
    }

    async fn compile_circuit(
        &self,
        circuit: &CircuitDescription,
        settings: &Settings,
    ) -> Result<CompiledCircuit> {
        // Validate before committing to a hash.
        LinearModel::parse(circuit.bytes())?;
        let mut material = Vec::new();
        material.extend_from_slice(b"zkpipe-sim/circuit");
        material.extend_from_slice(circuit.hash().as_bytes());
        material.extend_from_slice(&settings.canonical_bytes()?);
        Ok(CompiledCircuit {
            hash: content_hash(&material),
            settings: settings.clone(),
            blob: circuit.bytes().to_vec(),
        })
    }

    async fn generate_srs(&self, logrows: u32) -> Result<Srs> {
        if logrows > MAX_LOGROWS {
            return Err(PipelineError::SrsUnavailable {
                logrows,
                attempts: 1,
                reason: format!("simulated backend caps at logrows={MAX_LOGROWS}"),
            });
        }
        tracing::debug!(logrows, "generating simulated SRS");
        let mut seed = Vec::new();
        seed.extend_from_slice(b"zkpipe-sim/srs");
        seed.extend_from_slice(SCHEME.as_bytes());
        seed.extend_from_slice(&logrows.to_le_bytes());
        // Blob size tracks the requested size but stays test-friendly.
        let len = 1usize << logrows.min(12);
        Ok(Srs {
            logrows,
            scheme: SCHEME.into(),
            blob: expand(&seed, len),
        })
    }

    async fn setup_keys(
        &self,
        circuit: &CompiledCircuit,
        srs: &Srs,
    ) -> Result<(ProvingKey, VerificationKey)> {
        if srs.logrows < circuit.settings.logrows {
            return Err(PipelineError::SrsSizeMismatch {
                required: circuit.settings.logrows,
                provided: srs.logrows,
            });
        }
        let mut seed = Vec::new();
        seed.extend_from_slice(b"zkpipe-sim/keys");
        seed.extend_from_slice(circuit.hash.as_bytes());
        seed.extend_from_slice(&Sha256::digest(&srs.blob));

        let vk_blob = expand(&[&seed[..], b"/vk"].concat(), VK_LEN);
        let mut pk_blob = vk_blob.clone();
        pk_blob.extend_from_slice(&expand(&[&seed[..], b"/pk"].concat(), PK_LEN - VK_LEN));

        Ok((
            ProvingKey {
                circuit_hash: circuit.hash.clone(),
                blob: pk_blob,
            },
            VerificationKey {
                circuit_hash: circuit.hash.clone(),
                blob: vk_blob,
            },
        ))
    }

    async fn gen_witness(
        &self,
        input: &InputAssignment,
        circuit: &CompiledCircuit,
    ) -> Result<Witness> {
        let model = LinearModel::parse(&circuit.blob)?;
        if input.arity() != model.inputs() {
            return Err(PipelineError::WitnessEvaluation(format!(
                "input has arity {}, model '{}' expects {}",
                input.arity(),
                model.name,
                model.inputs()
            )));
        }
        let scale = circuit.settings.scale;
        let mut inputs_q = Vec::with_capacity(input.arity());
        for x in input.values() {
            let q = quantize(*x, scale).ok_or_else(|| {
                PipelineError::WitnessEvaluation(format!(
                    "input {x} not representable at scale {scale}"
                ))
            })?;
            inputs_q.push(q);
        }
        let outputs_q = model.eval_fixed(&inputs_q, scale)?;

        let mut public_instances = Vec::new();
        if circuit.settings.input_visibility == Visibility::Public {
            public_instances.extend(inputs_q.iter().map(|q| encode_instance(*q)));
        }
        if circuit.settings.output_visibility == Visibility::Public {
            public_instances.extend(outputs_q.iter().map(|q| encode_instance(*q)));
        }

        let mut assignments = inputs_q;
        assignments.extend_from_slice(&outputs_q);
        Ok(Witness {
            circuit_hash: circuit.hash.clone(),
            assignments,
            public_instances,
        })
    }

    async fn prove(
        &self,
        witness: &Witness,
        pk: &ProvingKey,
        circuit: &CompiledCircuit,
    ) -> Result<Proof> {
        if witness.circuit_hash != circuit.hash {
            return Err(PipelineError::ProvingFailed(format!(
                "witness belongs to circuit {}, not {}",
                witness.circuit_hash, circuit.hash
            )));
        }
        if pk.circuit_hash != circuit.hash || pk.blob.len() != PK_LEN {
            return Err(PipelineError::ProvingFailed(
                "proving key does not match the circuit".into(),
            ));
        }

        tracing::debug!(
            circuit = %circuit.hash,
            instances = witness.public_instances.len(),
            "producing simulated proof"
        );
        let commitment = witness_commitment(&witness.assignments);
        let tag = proof_tag(
            &pk.blob[..VK_LEN],
            &circuit.hash,
            &commitment,
            &witness.public_instances,
        );

        let mut blob = Vec::with_capacity(PROOF_LEN);
        blob.extend_from_slice(&commitment);
        blob.extend_from_slice(&tag);
        Ok(Proof {
            circuit_hash: circuit.hash.clone(),
            blob,
            public_instances: witness.public_instances.clone(),
        })
    }

    async fn verify(
        &self,
        proof: &Proof,
        vk: &VerificationKey,
        instances: &[[u8; 32]],
    ) -> Result<bool> {
        if proof.blob.len() != PROOF_LEN {
            return Err(PipelineError::MalformedProof(format!(
                "expected {PROOF_LEN} bytes, got {}",
                proof.blob.len()
            )));
        }
        if vk.blob.len() != VK_LEN {
            return Err(PipelineError::MalformedProof(
                "verification key has the wrong length".into(),
            ));
        }
        let mut commitment = [0u8; 32];
        commitment.copy_from_slice(&proof.blob[..32]);
        let expected = proof_tag(&vk.blob, &vk.circuit_hash, &commitment, instances);
        Ok(proof.blob[32..] == expected)
    }

    async fn export_verifier_contract(
        &self,
        vk: &VerificationKey,
        settings: &Settings,
    ) -> Result<String> {
        Ok(format!(
            "// SPDX-License-Identifier: MIT\n\
             // Simulated verifier — NOT cryptographically sound. Test use only.\n\
             pragma solidity ^0.8.20;\n\
             \n\
             contract SimVerifier {{\n\
             \x20   bytes32 public constant VK_HASH = 0x{};\n\
             \x20   string public constant CIRCUIT = \"{}\";\n\
             \x20   uint32 public constant SCALE = {};\n\
             \x20   uint32 public constant LOGROWS = {};\n\
             }}\n",
            content_hash(&vk.blob),
            vk.circuit_hash,
            settings.scale,
            settings.logrows,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use zkpipe_core::config::PipelineConfig;
    use zkpipe_core::pipeline::PipelineOrchestrator;
    use zkpipe_core::setup::CircuitSetupStage;

    const MODEL: &str =
        r#"{"name": "market-signal", "weights": [[0.5, -0.25, 1.0]], "bias": [0.125]}"#;

    fn orchestrator(dir: &std::path::Path) -> PipelineOrchestrator {
        let config = PipelineConfig {
            store_dir: dir.to_path_buf(),
            ..PipelineConfig::default()
        };
        PipelineOrchestrator::new(Arc::new(SimBackend::new()), config).unwrap()
    }

    /// Drive the backend directly through all stages at a fixed scale.
    async fn proved() -> (CompiledCircuit, VerificationKey, Proof) {
        let backend = SimBackend::new();
        let circuit = CircuitDescription::new(MODEL.as_bytes().to_vec());
        let mut settings = backend
            .gen_settings(&circuit, &RunArgs::default())
            .await
            .unwrap();
        settings.scale = 7;
        let compiled = backend.compile_circuit(&circuit, &settings).await.unwrap();
        let srs = backend.generate_srs(settings.logrows).await.unwrap();
        let (pk, vk) = backend.setup_keys(&compiled, &srs).await.unwrap();
        let input = InputAssignment::new(vec![0.45, 24.0, 1.2]);
        let witness = backend.gen_witness(&input, &compiled).await.unwrap();
        let proof = backend.prove(&witness, &pk, &compiled).await.unwrap();
        (compiled, vk, proof)
    }

    #[tokio::test]
    async fn test_pipeline_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());

        let circuit = CircuitDescription::new(MODEL.as_bytes().to_vec());
        let input = InputAssignment::new(vec![0.45, 24.0, 1.2]);
        let bundle = orch.run(&circuit, &input).await.unwrap();

        // Public inputs and the public output land in the instances.
        assert_eq!(bundle.proof.public_instances.len(), 4);
        assert!(bundle.verifier_contract.is_some());
        assert!(orch.verify_proof(&bundle.proof).await.unwrap());
    }

    #[tokio::test]
    async fn test_pipeline_deterministic_across_stores() {
        let circuit = CircuitDescription::new(MODEL.as_bytes().to_vec());
        let input = InputAssignment::new(vec![0.45, 24.0, 1.2]);

        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let first = orchestrator(a.path()).run(&circuit, &input).await.unwrap();
        let second = orchestrator(b.path()).run(&circuit, &input).await.unwrap();

        assert_eq!(first.proof.circuit_hash, second.proof.circuit_hash);
        assert_eq!(first.proof.blob, second.proof.blob);
        assert_eq!(first.settings.scale, second.settings.scale);
    }

    #[tokio::test]
    async fn test_any_byte_flip_fails_verification() {
        let backend = SimBackend::new();
        let (_, vk, proof) = proved().await;

        assert!(backend
            .verify(&proof, &vk, &proof.public_instances)
            .await
            .unwrap());

        for i in 0..proof.blob.len() {
            let mut tampered = proof.clone();
            tampered.blob[i] ^= 0x01;
            let valid = backend
                .verify(&tampered, &vk, &tampered.public_instances)
                .await
                .unwrap();
            assert!(!valid, "flip at byte {i} still verified");
        }
    }

    #[tokio::test]
    async fn test_truncated_proof_is_malformed() {
        let backend = SimBackend::new();
        let (_, vk, mut proof) = proved().await;
        proof.blob.truncate(40);

        match backend.verify(&proof, &vk, &proof.public_instances).await {
            Err(PipelineError::MalformedProof(_)) => {}
            other => panic!("expected MalformedProof, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_instances_fail_verification() {
        let backend = SimBackend::new();
        let (_, vk, proof) = proved().await;

        let mut instances = proof.public_instances.clone();
        instances[0][31] ^= 0x01;
        assert!(!backend.verify(&proof, &vk, &instances).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_model_rejected_at_compile() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());

        let circuit = CircuitDescription::new(b"not a model".to_vec());
        let input = InputAssignment::new(vec![0.45, 24.0, 1.2]);
        match orch.run(&circuit, &input).await {
            Err(PipelineError::InvalidCircuit(_)) => {}
            other => panic!("expected InvalidCircuit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unrepresentable_input_fails_calibration() {
        let config = PipelineConfig {
            scale_search_max: 4,
            calibration_tolerance: 1e-9,
            ..PipelineConfig::default()
        };
        let stage = CircuitSetupStage::new(Arc::new(SimBackend::new()), &config);
        let circuit = CircuitDescription::new(MODEL.as_bytes().to_vec());
        let inputs = [InputAssignment::new(vec![1.0 / 3.0, 0.1, 0.2])];

        match stage
            .compile(&circuit, &RunArgs::default(), &inputs)
            .await
        {
            Err(PipelineError::CalibrationFailed { max, .. }) => assert_eq!(max, 4),
            other => panic!("expected CalibrationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_keys_reject_undersized_srs() {
        let backend = SimBackend::new();
        let circuit = CircuitDescription::new(MODEL.as_bytes().to_vec());
        let mut settings = backend
            .gen_settings(&circuit, &RunArgs::default())
            .await
            .unwrap();
        settings.scale = 7;
        let compiled = backend.compile_circuit(&circuit, &settings).await.unwrap();
        let small = backend
            .generate_srs(settings.logrows - 1)
            .await
            .unwrap();

        match backend.setup_keys(&compiled, &small).await {
            Err(PipelineError::SrsSizeMismatch { required, provided }) => {
                assert_eq!(required, settings.logrows);
                assert_eq!(provided, settings.logrows - 1);
            }
            other => panic!("expected SrsSizeMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_verifier_contract_mentions_simulation() {
        let backend = SimBackend::new();
        let (compiled, vk, _) = proved().await;
        let text = backend
            .export_verifier_contract(&vk, &compiled.settings)
            .await
            .unwrap();
        assert!(text.contains("NOT cryptographically sound"));
        assert!(text.contains(&compiled.hash));
    }
}
