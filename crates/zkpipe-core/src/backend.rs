//! The proving backend trait and the data model shared by all stages.
//!
//! A [`ProvingBackend`] owns the actual cryptography (constraint systems,
//! polynomial commitments, curve arithmetic). The pipeline depends only on
//! the capabilities declared here, never on a particular backend's binary
//! formats. Capabilities are negotiated once at orchestrator construction via
//! [`ProvingBackend::capabilities`] rather than probed per call.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};

/// Hex-encoded sha256 of a byte slice. Used for all content addressing.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Visibility of a circuit input, output, or parameter group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
    Fixed,
    Hashed,
}

/// Requested visibility configuration for settings generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArgs {
    pub input_visibility: Visibility,
    pub output_visibility: Visibility,
    pub param_visibility: Visibility,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            input_visibility: Visibility::Public,
            output_visibility: Visibility::Public,
            param_visibility: Visibility::Fixed,
        }
    }
}

/// Opaque computational-graph description plus its content hash.
///
/// Immutable once loaded; every derived artifact is keyed off [`Self::hash`].
#[derive(Debug, Clone)]
pub struct CircuitDescription {
    bytes: Vec<u8>,
    hash: String,
}

impl CircuitDescription {
    pub fn new(bytes: Vec<u8>) -> Self {
        let hash = content_hash(&bytes);
        Self { bytes, hash }
    }

    /// Load a model/circuit description from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::new(bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Calibrated circuit settings.
///
/// `logrows` determines the minimum SRS size; this is the invariant that
/// binds SRS acquisition to key setup. Immutable once calibration picks a
/// scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub input_visibility: Visibility,
    pub output_visibility: Visibility,
    pub param_visibility: Visibility,
    /// Fixed-point scale: inputs are quantized as `round(x * 2^scale)`.
    pub scale: u32,
    /// log2 of the circuit's row count.
    pub logrows: u32,
}

impl Settings {
    /// Canonical encoding used for content addressing. Field order is fixed
    /// by the struct definition, so identical settings always produce
    /// identical bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PipelineError::Other(e.into()))
    }
}

/// Structured reference string sized by `logrows`.
///
/// Shared read-only by every stage that needs it; never mutated after
/// creation.
#[derive(Debug, Clone)]
pub struct Srs {
    pub logrows: u32,
    pub scheme: String,
    pub blob: Vec<u8>,
}

impl Srs {
    pub fn content_hash(&self) -> String {
        content_hash(&self.blob)
    }
}

/// A circuit compiled against calibrated settings.
///
/// `hash` is a pure function of (circuit hash, canonical settings), so two
/// compilations of identical inputs address the same artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledCircuit {
    pub hash: String,
    pub settings: Settings,
    pub blob: Vec<u8>,
}

/// Proving key. Always derived together with its [`VerificationKey`].
#[derive(Debug, Clone)]
pub struct ProvingKey {
    pub circuit_hash: String,
    pub blob: Vec<u8>,
}

/// Verification key matching a [`ProvingKey`].
#[derive(Debug, Clone)]
pub struct VerificationKey {
    pub circuit_hash: String,
    pub blob: Vec<u8>,
}

/// Ordered numeric input vector, fixed arity per deployed circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputAssignment {
    values: Vec<f64>,
}

impl InputAssignment {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    /// Content hash over the exact bit patterns of the values.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for v in &self.values {
            hasher.update(v.to_bits().to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Read an input vector from the on-disk JSON format
    /// `{"input_data": [[...]]}`. The first row is used.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| PipelineError::InputNotFound {
                path: path.to_path_buf(),
                source: e,
            })?;
        let file: InputFile =
            serde_json::from_str(&contents).map_err(|e| PipelineError::ConfigParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        let row = file
            .input_data
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::WitnessEvaluation("input_data is empty".into()))?;
        Ok(Self::new(row))
    }
}

#[derive(Debug, Deserialize)]
struct InputFile {
    input_data: Vec<Vec<f64>>,
}

/// Full wire assignment plus the public instance vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Witness {
    pub circuit_hash: String,
    /// Fixed-point representations of every wire value, inputs first.
    pub assignments: Vec<i64>,
    /// Public instances as 32-byte big-endian field elements.
    pub public_instances: Vec<[u8; 32]>,
}

/// An opaque proof blob plus its public instance vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    pub circuit_hash: String,
    pub blob: Vec<u8>,
    pub public_instances: Vec<[u8; 32]>,
}

/// Result of checking one candidate scale against calibration inputs.
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub scale: u32,
    /// Worst-case |x - dequantize(quantize(x))| over the calibration inputs.
    pub max_quantization_error: f64,
    /// Whether any intermediate value left the representable range.
    pub overflow: bool,
}

/// Capability descriptor, negotiated once when the orchestrator is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCapabilities {
    pub api_version: u32,
    pub supports_srs_generation: bool,
    pub supports_verifier_export: bool,
    /// Largest SRS the backend can produce.
    pub max_logrows: u32,
}

/// Every proving backend must implement this trait.
///
/// All operations are deterministic for identical inputs unless the backend
/// documents otherwise.
#[async_trait]
pub trait ProvingBackend: Send + Sync {
    /// Scheme identifier, e.g. "kzg". Part of SRS artifact identity.
    fn scheme(&self) -> &'static str;

    /// Display name for user-facing output.
    fn display_name(&self) -> &'static str;

    /// Declare what this backend version supports.
    fn capabilities(&self) -> BackendCapabilities;

    /// Derive uncalibrated settings from a circuit description.
    async fn gen_settings(
        &self,
        circuit: &CircuitDescription,
        run_args: &RunArgs,
    ) -> Result<Settings>;

    /// Check one candidate scale against the calibration inputs.
    async fn calibrate(
        &self,
        circuit: &CircuitDescription,
        settings: &Settings,
        inputs: &[InputAssignment],
        scale: u32,
    ) -> Result<CalibrationReport>;

    /// Compile the circuit against calibrated settings.
    async fn compile_circuit(
        &self,
        circuit: &CircuitDescription,
        settings: &Settings,
    ) -> Result<CompiledCircuit>;

    /// Generate (or fetch) an SRS of at least the given size.
    async fn generate_srs(&self, logrows: u32) -> Result<Srs>;

    /// Derive the proving/verification key pair. Both keys or an error —
    /// a backend must never return one without the other.
    async fn setup_keys(
        &self,
        circuit: &CompiledCircuit,
        srs: &Srs,
    ) -> Result<(ProvingKey, VerificationKey)>;

    /// Evaluate the circuit over the input, producing the full assignment.
    async fn gen_witness(
        &self,
        input: &InputAssignment,
        circuit: &CompiledCircuit,
    ) -> Result<Witness>;

    /// Produce a proof from a witness and proving key.
    async fn prove(
        &self,
        witness: &Witness,
        pk: &ProvingKey,
        circuit: &CompiledCircuit,
    ) -> Result<Proof>;

    /// Check a proof against a verification key and public instances.
    ///
    /// Returns `Ok(false)` for any well-formed but cryptographically invalid
    /// proof; structurally invalid bytes are a [`PipelineError::MalformedProof`]
    /// error, never `false`.
    async fn verify(
        &self,
        proof: &Proof,
        vk: &VerificationKey,
        instances: &[[u8; 32]],
    ) -> Result<bool>;

    /// Render an on-chain verifier contract for the given verification key.
    async fn export_verifier_contract(
        &self,
        vk: &VerificationKey,
        settings: &Settings,
    ) -> Result<String>;
}
