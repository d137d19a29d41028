//! The pipeline orchestrator: stage sequencing, dependency ordering, and
//! resume.
//!
//! The state machine is `NotStarted → CircuitCompiled → SrsReady → KeysReady
//! → WitnessReady → ProofReady`. Each transition requires the prior stage's
//! artifact to exist and verify in the store. A completed stage whose
//! artifacts still verify is never re-executed; a failed stage is recorded
//! with its cause and terminates the run.

use std::future::Future;
use std::sync::Arc;

use crate::artifacts::{ArtifactKey, ArtifactRef, ArtifactStore};
use crate::backend::{
    BackendCapabilities, CircuitDescription, CompiledCircuit, InputAssignment, Proof,
    ProvingBackend, ProvingKey, Settings, Srs, VerificationKey, Witness,
};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::keys::KeySetupStage;
use crate::prover::ProvingStage;
use crate::setup::CircuitSetupStage;
use crate::srs::{SrsProvider, SrsRetryPolicy};
use crate::state::{self, ArtifactPointer, PipelineState, Stage, StageStatus};

/// Everything a caller gets back from a completed run.
#[derive(Debug, Clone)]
pub struct ProofBundle {
    pub proof: Proof,
    pub proof_ref: ArtifactRef,
    pub settings: Settings,
    /// Exported on-chain verifier contract, when the backend supports it.
    pub verifier_contract: Option<ArtifactRef>,
}

/// Sequences the pipeline stages over a single backend and artifact store.
pub struct PipelineOrchestrator {
    store: Arc<ArtifactStore>,
    backend: Arc<dyn ProvingBackend>,
    srs: SrsProvider,
    circuit_setup: CircuitSetupStage,
    key_setup: KeySetupStage,
    proving: ProvingStage,
    config: PipelineConfig,
    capabilities: BackendCapabilities,
    scheme: &'static str,
}

impl PipelineOrchestrator {
    pub fn new(backend: Arc<dyn ProvingBackend>, config: PipelineConfig) -> Result<Self> {
        let store = Arc::new(ArtifactStore::open(&config.store_dir)?);
        // Capabilities are negotiated once, here, not probed per call.
        let capabilities = backend.capabilities();
        let scheme = backend.scheme();
        tracing::debug!(
            backend = backend.display_name(),
            api_version = capabilities.api_version,
            max_logrows = capabilities.max_logrows,
            "backend capabilities negotiated"
        );

        let srs = SrsProvider::new(Arc::clone(&store), Arc::clone(&backend))
            .with_retry_policy(SrsRetryPolicy {
                max_attempts: config.srs_max_attempts,
                backoff: config.srs_backoff(),
            })
            .with_timeout(config.stage_timeout());
        let circuit_setup = CircuitSetupStage::new(Arc::clone(&backend), &config);
        let key_setup = KeySetupStage::new(Arc::clone(&backend), Arc::clone(&store));
        let proving = ProvingStage::new(Arc::clone(&backend), Arc::clone(&store));

        Ok(Self {
            store,
            backend,
            srs,
            circuit_setup,
            key_setup,
            proving,
            config,
            capabilities,
            scheme,
        })
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Read the persisted pipeline state, if any.
    pub fn load_state(&self) -> Result<PipelineState> {
        state::load(self.store.root())
    }

    /// Run the pipeline end to end, resuming from persisted state.
    pub async fn run(
        &self,
        circuit: &CircuitDescription,
        input: &InputAssignment,
    ) -> Result<ProofBundle> {
        let circuit_hash = circuit.hash().to_string();
        let input_hash = input.content_hash();
        let mut state = self.load_or_reset_state(&circuit_hash, &input_hash)?;
        if let Some(stage) = state.first_incomplete() {
            tracing::info!(from = %stage, "starting pipeline");
        } else {
            tracing::info!("pipeline already complete, returning stored proof");
        }

        // --- CircuitCompiled ---
        let settings_key = ArtifactKey::Settings {
            circuit_hash: circuit_hash.clone(),
        };
        let compiled_key = ArtifactKey::CompiledCircuit {
            circuit_hash: circuit_hash.clone(),
        };
        let compiled: CompiledCircuit = if self.stage_verified(
            &state,
            Stage::CircuitCompiled,
            &[settings_key.clone(), compiled_key.clone()],
        ) {
            tracing::debug!("resume: circuit already compiled");
            self.store.get_json(&compiled_key)?
        } else {
            self.enter(&mut state, Stage::CircuitCompiled)?;
            match self
                .do_compile(circuit, input, &settings_key, &compiled_key)
                .await
            {
                Ok((compiled, pointers)) => {
                    self.complete(&mut state, Stage::CircuitCompiled, pointers)?;
                    compiled
                }
                Err(e) => return self.fail(&mut state, Stage::CircuitCompiled, e),
            }
        };

        // --- SrsReady ---
        let logrows = compiled.settings.logrows;
        let srs_key = ArtifactKey::Srs {
            scheme: self.srs_scheme().to_string(),
            logrows,
        };
        let srs: Srs = if self.stage_verified(&state, Stage::SrsReady, &[srs_key.clone()]) {
            tracing::debug!(logrows, "resume: SRS already acquired");
            // The provider's cached read path re-verifies integrity.
            self.srs.acquire(logrows).await?
        } else {
            self.enter(&mut state, Stage::SrsReady)?;
            match self.do_srs(logrows, &srs_key).await {
                Ok((srs, pointers)) => {
                    self.complete(&mut state, Stage::SrsReady, pointers)?;
                    srs
                }
                Err(e) => return self.fail(&mut state, Stage::SrsReady, e),
            }
        };

        // --- KeysReady ---
        let pk_key = ArtifactKey::ProvingKey {
            circuit_hash: compiled.hash.clone(),
        };
        let vk_key = ArtifactKey::VerificationKey {
            circuit_hash: compiled.hash.clone(),
        };
        let (pk, vk) = if self.stage_verified(
            &state,
            Stage::KeysReady,
            &[vk_key.clone(), pk_key.clone()],
        ) {
            tracing::debug!("resume: keys already derived");
            (
                ProvingKey {
                    circuit_hash: compiled.hash.clone(),
                    blob: self.store.get(&pk_key)?,
                },
                VerificationKey {
                    circuit_hash: compiled.hash.clone(),
                    blob: self.store.get(&vk_key)?,
                },
            )
        } else {
            self.enter(&mut state, Stage::KeysReady)?;
            match self.do_keys(&compiled, &srs).await {
                Ok((pk, vk, pointers)) => {
                    self.complete(&mut state, Stage::KeysReady, pointers)?;
                    (pk, vk)
                }
                Err(e) => return self.fail(&mut state, Stage::KeysReady, e),
            }
        };

        // --- WitnessReady ---
        let witness_key = ArtifactKey::Witness {
            circuit_hash: compiled.hash.clone(),
            input_hash: input_hash.clone(),
        };
        let witness: Witness =
            if self.stage_verified(&state, Stage::WitnessReady, &[witness_key.clone()]) {
                tracing::debug!("resume: witness already computed");
                self.store.get_json(&witness_key)?
            } else {
                self.enter(&mut state, Stage::WitnessReady)?;
                match self.do_witness(input, &compiled).await {
                    Ok((witness, pointers)) => {
                        self.complete(&mut state, Stage::WitnessReady, pointers)?;
                        witness
                    }
                    Err(e) => return self.fail(&mut state, Stage::WitnessReady, e),
                }
            };

        // --- ProofReady ---
        let proof_key = ArtifactKey::Proof {
            circuit_hash: compiled.hash.clone(),
            input_hash: input_hash.clone(),
        };
        let contract_key = ArtifactKey::VerifierContract {
            circuit_hash: compiled.hash.clone(),
        };
        let (proof, proof_ref, verifier_contract) =
            if self.stage_verified(&state, Stage::ProofReady, &[proof_key.clone()]) {
                tracing::debug!("resume: proof already generated");
                let proof = self.store.get_json(&proof_key)?;
                let proof_ref = self.store.reference(&proof_key)?;
                let contract = self.store.reference(&contract_key).ok();
                (proof, proof_ref, contract)
            } else {
                self.enter(&mut state, Stage::ProofReady)?;
                match self
                    .do_proof(&witness, &pk, &vk, &compiled, &input_hash, &contract_key)
                    .await
                {
                    Ok((proof, proof_ref, contract, pointers)) => {
                        self.complete(&mut state, Stage::ProofReady, pointers)?;
                        (proof, proof_ref, contract)
                    }
                    Err(e) => return self.fail(&mut state, Stage::ProofReady, e),
                }
            };

        Ok(ProofBundle {
            proof,
            proof_ref,
            settings: compiled.settings,
            verifier_contract,
        })
    }

    /// Check a proof against the stored verification key for its circuit.
    pub async fn verify_proof(&self, proof: &Proof) -> Result<bool> {
        let vk_key = ArtifactKey::VerificationKey {
            circuit_hash: proof.circuit_hash.clone(),
        };
        let blob = match self.store.get(&vk_key) {
            Ok(blob) => blob,
            Err(PipelineError::ArtifactNotFound { key }) => {
                return Err(PipelineError::StageIncomplete {
                    stage: Stage::ProofReady.name().into(),
                    missing: key,
                })
            }
            Err(e) => return Err(e),
        };
        let vk = VerificationKey {
            circuit_hash: proof.circuit_hash.clone(),
            blob,
        };
        self.proving
            .verify(proof, &vk, &proof.public_instances)
            .await
    }

    // --- stage bodies ---

    async fn do_compile(
        &self,
        circuit: &CircuitDescription,
        input: &InputAssignment,
        settings_key: &ArtifactKey,
        compiled_key: &ArtifactKey,
    ) -> Result<(CompiledCircuit, Vec<ArtifactPointer>)> {
        let calibration_inputs = std::slice::from_ref(input);
        let (compiled, settings) = self
            .bounded(
                Stage::CircuitCompiled,
                self.circuit_setup
                    .compile(circuit, &self.config.run_args, calibration_inputs),
            )
            .await?;
        let settings_ref = self.store.put_json(settings_key, &settings)?;
        let compiled_ref = self.store.put_json(compiled_key, &compiled)?;
        Ok((compiled, pointers(&[&settings_ref, &compiled_ref])))
    }

    async fn do_srs(
        &self,
        logrows: u32,
        srs_key: &ArtifactKey,
    ) -> Result<(Srs, Vec<ArtifactPointer>)> {
        if logrows > self.capabilities.max_logrows {
            return Err(PipelineError::SrsUnavailable {
                logrows,
                attempts: 0,
                reason: format!(
                    "backend supports at most logrows={}",
                    self.capabilities.max_logrows
                ),
            });
        }
        // The provider applies its own retry policy and deadline.
        let srs = self.srs.acquire(logrows).await?;
        let pointer = ArtifactPointer {
            key: srs_key.to_string(),
            sha256: srs.content_hash(),
        };
        Ok((srs, vec![pointer]))
    }

    async fn do_keys(
        &self,
        compiled: &CompiledCircuit,
        srs: &Srs,
    ) -> Result<(ProvingKey, VerificationKey, Vec<ArtifactPointer>)> {
        let (pk, vk, vk_ref, pk_ref) = self
            .bounded(Stage::KeysReady, self.key_setup.setup(compiled, srs))
            .await?;
        Ok((pk, vk, pointers(&[&vk_ref, &pk_ref])))
    }

    async fn do_witness(
        &self,
        input: &InputAssignment,
        compiled: &CompiledCircuit,
    ) -> Result<(Witness, Vec<ArtifactPointer>)> {
        let (witness, witness_ref) = self
            .bounded(Stage::WitnessReady, self.proving.witness(input, compiled))
            .await?;
        Ok((witness, pointers(&[&witness_ref])))
    }

    async fn do_proof(
        &self,
        witness: &Witness,
        pk: &ProvingKey,
        vk: &VerificationKey,
        compiled: &CompiledCircuit,
        input_hash: &str,
        contract_key: &ArtifactKey,
    ) -> Result<(Proof, ArtifactRef, Option<ArtifactRef>, Vec<ArtifactPointer>)> {
        let (proof, proof_ref) = self
            .bounded(
                Stage::ProofReady,
                self.proving.prove(witness, pk, compiled, input_hash),
            )
            .await?;

        // A proof that does not verify is a proving failure, not a product.
        let valid = self
            .proving
            .verify(&proof, vk, &proof.public_instances)
            .await?;
        if !valid {
            return Err(PipelineError::ProvingFailed(
                "generated proof failed verification".into(),
            ));
        }

        let mut ptrs = pointers(&[&proof_ref]);
        let contract = if self.capabilities.supports_verifier_export {
            let text = self
                .backend
                .export_verifier_contract(vk, &compiled.settings)
                .await?;
            let contract_ref = self.store.put(contract_key, text.as_bytes())?;
            ptrs.push(pointer(&contract_ref));
            Some(contract_ref)
        } else {
            None
        };

        Ok((proof, proof_ref, contract, ptrs))
    }

    // --- state bookkeeping ---

    fn load_or_reset_state(&self, circuit_hash: &str, input_hash: &str) -> Result<PipelineState> {
        match state::load(self.store.root()) {
            Ok(s) if s.circuit_hash == circuit_hash && s.input_hash == input_hash => Ok(s),
            Ok(_) => {
                tracing::info!("pipeline state belongs to a different (circuit, input); restarting");
                Ok(PipelineState::new(circuit_hash, input_hash))
            }
            Err(PipelineError::ConfigNotFound { .. }) => {
                Ok(PipelineState::new(circuit_hash, input_hash))
            }
            Err(e) => Err(e),
        }
    }

    /// A stage counts as done only if its status is `Complete` and every
    /// artifact it points to still verifies in the store.
    fn stage_verified(&self, state: &PipelineState, stage: Stage, keys: &[ArtifactKey]) -> bool {
        let Some(record) = state.record(stage) else {
            return false;
        };
        if record.status != StageStatus::Complete {
            return false;
        }
        keys.iter().all(|key| {
            record
                .artifacts
                .iter()
                .find(|p| p.key == key.to_string())
                .is_some_and(|p| self.store.verify(key, &p.sha256))
        })
    }

    fn persist(&self, state: &PipelineState) -> Result<()> {
        state::save(state, self.store.root())
    }

    fn enter(&self, state: &mut PipelineState, stage: Stage) -> Result<()> {
        state.mark_in_progress(stage);
        self.persist(state)
    }

    fn complete(
        &self,
        state: &mut PipelineState,
        stage: Stage,
        artifacts: Vec<ArtifactPointer>,
    ) -> Result<()> {
        state.mark_complete(stage, artifacts);
        self.persist(state)?;
        tracing::info!(stage = %stage, "stage complete");
        Ok(())
    }

    fn fail<T>(
        &self,
        state: &mut PipelineState,
        stage: Stage,
        error: PipelineError,
    ) -> Result<T> {
        state.mark_failed(stage, &error.to_string());
        if let Err(save_error) = self.persist(state) {
            tracing::error!(stage = %stage, error = %save_error, "failed to persist failure state");
        }
        tracing::error!(stage = %stage, error = %error, "stage failed");
        Err(error)
    }

    async fn bounded<T>(
        &self,
        stage: Stage,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match self.config.stage_timeout() {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| PipelineError::Timeout {
                    stage: stage.name().into(),
                    elapsed: limit,
                })?,
            None => fut.await,
        }
    }

    fn srs_scheme(&self) -> &'static str {
        self.scheme
    }
}

fn pointer(r: &ArtifactRef) -> ArtifactPointer {
    ArtifactPointer {
        key: r.key.to_string(),
        sha256: r.sha256.clone(),
    }
}

fn pointers(refs: &[&ArtifactRef]) -> Vec<ArtifactPointer> {
    refs.iter().map(|r| pointer(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StageRecord;
    use crate::testutil::StubBackend;
    use std::sync::atomic::Ordering;

    fn config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            store_dir: dir.to_path_buf(),
            srs_backoff_ms: 1,
            ..PipelineConfig::default()
        }
    }

    fn orchestrator(
        backend: &Arc<StubBackend>,
        dir: &std::path::Path,
    ) -> PipelineOrchestrator {
        let backend: Arc<dyn ProvingBackend> = backend.clone();
        PipelineOrchestrator::new(backend, config(dir)).unwrap()
    }

    #[tokio::test]
    async fn test_full_run_produces_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new());
        let orch = orchestrator(&backend, dir.path());

        let circuit = CircuitDescription::new(b"model graph".to_vec());
        let input = InputAssignment::new(vec![0.45, 24.0, 1.2]);
        let bundle = orch.run(&circuit, &input).await.unwrap();

        assert_eq!(bundle.proof.circuit_hash.len(), 64);
        assert!(bundle.verifier_contract.is_some());
        let state = orch.load_state().unwrap();
        assert_eq!(state.first_incomplete(), None);
    }

    #[tokio::test]
    async fn test_rerun_never_reexecutes_verified_stages() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new());

        let first = orchestrator(&backend, dir.path())
            .run(
                &CircuitDescription::new(b"model graph".to_vec()),
                &InputAssignment::new(vec![0.45, 24.0, 1.2]),
            )
            .await
            .unwrap();
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.srs_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.key_calls.load(Ordering::SeqCst), 1);

        // A fresh orchestrator over the same store resumes, not recomputes.
        let second = orchestrator(&backend, dir.path())
            .run(
                &CircuitDescription::new(b"model graph".to_vec()),
                &InputAssignment::new(vec![0.45, 24.0, 1.2]),
            )
            .await
            .unwrap();
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.srs_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.key_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.proof.blob, second.proof.blob);
    }

    #[tokio::test]
    async fn test_restart_after_keys_ready_resumes_at_witness() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new());
        let circuit = CircuitDescription::new(b"model graph".to_vec());
        let input = InputAssignment::new(vec![0.45, 24.0, 1.2]);

        orchestrator(&backend, dir.path())
            .run(&circuit, &input)
            .await
            .unwrap();

        // Simulate a process killed right after KeysReady: the last two
        // stages were never recorded.
        let mut state = state::load(dir.path()).unwrap();
        state
            .stages
            .insert(Stage::WitnessReady, StageRecord::default());
        state.stages.insert(Stage::ProofReady, StageRecord::default());
        state::save(&state, dir.path()).unwrap();

        let bundle = orchestrator(&backend, dir.path())
            .run(&circuit, &input)
            .await
            .unwrap();

        // No recompilation, no SRS regeneration, no key rederivation.
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.srs_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.key_calls.load(Ordering::SeqCst), 1);
        assert!(orch_state_complete(dir.path()));
        assert!(!bundle.proof.blob.is_empty());
    }

    fn orch_state_complete(dir: &std::path::Path) -> bool {
        state::load(dir)
            .map(|s| s.first_incomplete().is_none())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_stage_failure_recorded_and_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new().with_failing_srs());
        let orch = orchestrator(&backend, dir.path());

        let circuit = CircuitDescription::new(b"model graph".to_vec());
        let input = InputAssignment::new(vec![0.45, 24.0, 1.2]);
        match orch.run(&circuit, &input).await {
            Err(PipelineError::SrsUnavailable { .. }) => {}
            other => panic!("expected SrsUnavailable, got {other:?}"),
        }

        let state = orch.load_state().unwrap();
        assert_eq!(state.status(Stage::CircuitCompiled), StageStatus::Complete);
        assert_eq!(state.status(Stage::SrsReady), StageStatus::Failed);
        assert!(state
            .record(Stage::SrsReady)
            .and_then(|r| r.error.as_deref())
            .is_some());

        // A new run retries the failed stage but keeps completed work.
        let _ = orch.run(&circuit, &input).await;
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_verify_without_keys_is_stage_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new());
        let orch = orchestrator(&backend, dir.path());

        let proof = Proof {
            circuit_hash: "deadbeef".into(),
            blob: vec![1; 64],
            public_instances: vec![],
        };
        match orch.verify_proof(&proof).await {
            Err(PipelineError::StageIncomplete { .. }) => {}
            other => panic!("expected StageIncomplete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_state_for_other_input_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::new());
        let circuit = CircuitDescription::new(b"model graph".to_vec());

        orchestrator(&backend, dir.path())
            .run(&circuit, &InputAssignment::new(vec![0.45, 24.0, 1.2]))
            .await
            .unwrap();

        // Different input: witness/proof recomputed, circuit and keys reused
        // via the content-addressed store.
        orchestrator(&backend, dir.path())
            .run(&circuit, &InputAssignment::new(vec![0.5, 25.0, 1.3]))
            .await
            .unwrap();
        assert_eq!(backend.compile_calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.srs_calls.load(Ordering::SeqCst), 1);
    }
}
