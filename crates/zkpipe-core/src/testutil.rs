//! Configurable stub backend shared by the crate's unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{
    content_hash, BackendCapabilities, CalibrationReport, CircuitDescription, CompiledCircuit,
    InputAssignment, Proof, ProvingBackend, ProvingKey, RunArgs, Settings, Srs, VerificationKey,
    Visibility, Witness,
};
use crate::error::{PipelineError, Result};

pub(crate) struct StubBackend {
    pub srs_calls: AtomicU32,
    pub compile_calls: AtomicU32,
    pub key_calls: AtomicU32,
    srs_delay: Duration,
    srs_fails: bool,
    srs_logrows_cap: Option<u32>,
    key_hash_override: Option<String>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            srs_calls: AtomicU32::new(0),
            compile_calls: AtomicU32::new(0),
            key_calls: AtomicU32::new(0),
            srs_delay: Duration::ZERO,
            srs_fails: false,
            srs_logrows_cap: None,
            key_hash_override: None,
        }
    }

    pub fn with_srs_delay(mut self, delay: Duration) -> Self {
        self.srs_delay = delay;
        self
    }

    pub fn with_failing_srs(mut self) -> Self {
        self.srs_fails = true;
        self
    }

    pub fn with_srs_logrows_cap(mut self, cap: u32) -> Self {
        self.srs_logrows_cap = Some(cap);
        self
    }

    pub fn with_key_hash_override(mut self, hash: &str) -> Self {
        self.key_hash_override = Some(hash.to_string());
        self
    }
}

#[async_trait]
impl ProvingBackend for StubBackend {
    fn scheme(&self) -> &'static str {
        "test-kzg"
    }

    fn display_name(&self) -> &'static str {
        "stub backend"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            api_version: 1,
            supports_srs_generation: true,
            supports_verifier_export: true,
            max_logrows: 24,
        }
    }

    async fn gen_settings(
        &self,
        _circuit: &CircuitDescription,
        run_args: &RunArgs,
    ) -> Result<Settings> {
        Ok(Settings {
            input_visibility: run_args.input_visibility,
            output_visibility: run_args.output_visibility,
            param_visibility: run_args.param_visibility,
            scale: 0,
            logrows: 17,
        })
    }

    async fn calibrate(
        &self,
        _circuit: &CircuitDescription,
        _settings: &Settings,
        _inputs: &[InputAssignment],
        scale: u32,
    ) -> Result<CalibrationReport> {
        // Error halves per scale step; overflows past scale 20.
        Ok(CalibrationReport {
            scale,
            max_quantization_error: 2f64.powi(-(scale as i32 + 1)),
            overflow: scale > 20,
        })
    }

    async fn compile_circuit(
        &self,
        circuit: &CircuitDescription,
        settings: &Settings,
    ) -> Result<CompiledCircuit> {
        self.compile_calls.fetch_add(1, Ordering::SeqCst);
        let mut material = circuit.hash().as_bytes().to_vec();
        material.extend_from_slice(&settings.canonical_bytes()?);
        Ok(CompiledCircuit {
            hash: content_hash(&material),
            settings: settings.clone(),
            blob: circuit.bytes().to_vec(),
        })
    }

    async fn generate_srs(&self, logrows: u32) -> Result<Srs> {
        self.srs_calls.fetch_add(1, Ordering::SeqCst);
        if self.srs_delay > Duration::ZERO {
            tokio::time::sleep(self.srs_delay).await;
        }
        if self.srs_fails {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "stub SRS generation failure"
            )));
        }
        let logrows = self.srs_logrows_cap.map_or(logrows, |cap| cap.min(logrows));
        Ok(Srs {
            logrows,
            scheme: "test-kzg".into(),
            blob: vec![0xAB; 256],
        })
    }

    async fn setup_keys(
        &self,
        circuit: &CompiledCircuit,
        _srs: &Srs,
    ) -> Result<(ProvingKey, VerificationKey)> {
        self.key_calls.fetch_add(1, Ordering::SeqCst);
        let circuit_hash = self
            .key_hash_override
            .clone()
            .unwrap_or_else(|| circuit.hash.clone());
        Ok((
            ProvingKey {
                circuit_hash: circuit_hash.clone(),
                blob: format!("pk:{circuit_hash}").into_bytes(),
            },
            VerificationKey {
                circuit_hash: circuit_hash.clone(),
                blob: format!("vk:{circuit_hash}").into_bytes(),
            },
        ))
    }

    async fn gen_witness(
        &self,
        input: &InputAssignment,
        circuit: &CompiledCircuit,
    ) -> Result<Witness> {
        let scale = circuit.settings.scale;
        let assignments: Vec<i64> = input
            .values()
            .iter()
            .map(|v| (v * 2f64.powi(scale as i32)).round() as i64)
            .collect();
        Ok(Witness {
            circuit_hash: circuit.hash.clone(),
            assignments,
            public_instances: vec![[0u8; 32]],
        })
    }

    async fn prove(
        &self,
        witness: &Witness,
        _pk: &ProvingKey,
        circuit: &CompiledCircuit,
    ) -> Result<Proof> {
        Ok(Proof {
            circuit_hash: circuit.hash.clone(),
            blob: vec![1u8; 64],
            public_instances: witness.public_instances.clone(),
        })
    }

    async fn verify(
        &self,
        _proof: &Proof,
        _vk: &VerificationKey,
        _instances: &[[u8; 32]],
    ) -> Result<bool> {
        Ok(true)
    }

    async fn export_verifier_contract(
        &self,
        vk: &VerificationKey,
        _settings: &Settings,
    ) -> Result<String> {
        Ok(format!("// stub verifier for {}", vk.circuit_hash))
    }
}

/// Visibility triple used by most tests.
pub(crate) fn public_settings(scale: u32, logrows: u32) -> Settings {
    Settings {
        input_visibility: Visibility::Public,
        output_visibility: Visibility::Public,
        param_visibility: Visibility::Fixed,
        scale,
        logrows,
    }
}
