//! Unified error types for the zkpipe pipeline.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All errors that can occur while driving the proving pipeline.
///
/// Setup failures are terminal by design: no variant here is ever recovered
/// from by substituting synthetic proof data.
#[derive(Error, Debug)]
pub enum PipelineError {
    // --- Configuration ---

    /// The pipeline config file was not found.
    #[error("config file not found at {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config or state file exists but contains invalid JSON.
    #[error("failed to parse {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // --- Artifact store ---

    /// No artifact exists under the given key.
    #[error("artifact not found: {key}")]
    ArtifactNotFound { key: String },

    /// The artifact exists but failed its integrity check.
    #[error("artifact corrupt: {key} (expected sha256 {expected}, found {actual})")]
    ArtifactCorrupt {
        key: String,
        expected: String,
        actual: String,
    },

    /// An artifact could not be encoded for persistence.
    #[error("failed to encode artifact {key}")]
    ArtifactEncode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    // --- Inputs ---

    /// The input vector file was not found.
    #[error("input file not found at {path}")]
    InputNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // --- Circuit setup ---

    /// The circuit description could not be interpreted by the backend.
    #[error("invalid circuit description: {0}")]
    InvalidCircuit(String),

    /// No scale in the configured search range satisfies the calibration
    /// constraint over the calibration inputs.
    #[error("calibration failed: no scale in {min}..={max} within tolerance {tolerance}")]
    CalibrationFailed { min: u32, max: u32, tolerance: f64 },

    // --- SRS ---

    /// SRS generation/fetch exhausted its retries or failed integrity checks.
    #[error("SRS for logrows={logrows} unavailable after {attempts} attempt(s): {reason}")]
    SrsUnavailable {
        logrows: u32,
        attempts: u32,
        reason: String,
    },

    /// The provided SRS is smaller than the circuit requires.
    #[error("SRS too small: circuit requires logrows={required}, SRS has logrows={provided}")]
    SrsSizeMismatch { required: u32, provided: u32 },

    // --- Keys ---

    /// Proving/verification key derivation failed.
    #[error("key setup failed: {0}")]
    KeySetupFailed(String),

    // --- Proving ---

    /// Witness computation failed (shape mismatch, constraint violation).
    #[error("witness evaluation failed: {0}")]
    WitnessEvaluation(String),

    /// Proof generation failed (witness inconsistent with the circuit).
    #[error("proof generation failed: {0}")]
    ProvingFailed(String),

    /// The proof bytes are structurally invalid and cannot be checked.
    ///
    /// Distinct from a verification result of `false`, which means the proof
    /// is well-formed but cryptographically invalid.
    #[error("malformed proof: {0}")]
    MalformedProof(String),

    // --- Pipeline ---

    /// A stage exceeded its caller-configured deadline.
    #[error("stage '{stage}' timed out after {elapsed:?}")]
    Timeout { stage: String, elapsed: Duration },

    /// A stage was entered before a prior stage's artifact was available.
    #[error("stage '{stage}' requires '{missing}' from an earlier stage")]
    StageIncomplete { stage: String, missing: String },

    // --- General ---

    /// A filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A catch-all for errors from dependencies.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;
