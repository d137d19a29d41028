//! Witness computation, proof generation, and verification.

use std::sync::Arc;

use crate::artifacts::{ArtifactKey, ArtifactRef, ArtifactStore};
use crate::backend::{
    CompiledCircuit, InputAssignment, Proof, ProvingBackend, ProvingKey, VerificationKey, Witness,
};
use crate::error::{PipelineError, Result};

/// Runs the proving side of the pipeline against a compiled circuit.
pub struct ProvingStage {
    backend: Arc<dyn ProvingBackend>,
    store: Arc<ArtifactStore>,
}

impl ProvingStage {
    pub fn new(backend: Arc<dyn ProvingBackend>, store: Arc<ArtifactStore>) -> Self {
        Self { backend, store }
    }

    /// Evaluate the circuit over the input and persist the witness.
    pub async fn witness(
        &self,
        input: &InputAssignment,
        compiled: &CompiledCircuit,
    ) -> Result<(Witness, ArtifactRef)> {
        let witness = self.backend.gen_witness(input, compiled).await?;
        let key = ArtifactKey::Witness {
            circuit_hash: compiled.hash.clone(),
            input_hash: input.content_hash(),
        };
        let witness_ref = self.store.put_json(&key, &witness)?;
        tracing::info!(
            circuit = %compiled.hash,
            wires = witness.assignments.len(),
            instances = witness.public_instances.len(),
            "witness computed"
        );
        Ok((witness, witness_ref))
    }

    /// Produce and persist a proof for a previously computed witness.
    pub async fn prove(
        &self,
        witness: &Witness,
        pk: &ProvingKey,
        compiled: &CompiledCircuit,
        input_hash: &str,
    ) -> Result<(Proof, ArtifactRef)> {
        if witness.circuit_hash != compiled.hash {
            return Err(PipelineError::ProvingFailed(format!(
                "witness belongs to circuit {}, not {}",
                witness.circuit_hash, compiled.hash
            )));
        }
        let proof = self.backend.prove(witness, pk, compiled).await?;
        let key = ArtifactKey::Proof {
            circuit_hash: compiled.hash.clone(),
            input_hash: input_hash.to_string(),
        };
        let proof_ref = self.store.put_json(&key, &proof)?;
        tracing::info!(
            circuit = %compiled.hash,
            bytes = proof.blob.len(),
            "proof generated"
        );
        Ok((proof, proof_ref))
    }

    /// Check a proof against a verification key and public instances.
    pub async fn verify(
        &self,
        proof: &Proof,
        vk: &VerificationKey,
        instances: &[[u8; 32]],
    ) -> Result<bool> {
        self.backend.verify(proof, vk, instances).await
    }
}
