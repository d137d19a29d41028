//! Persisted pipeline progress.
//!
//! The orchestrator writes `pipeline_state.json` after every stage
//! transition (atomically, like any artifact) and reads it on startup to
//! resume from the first incomplete stage.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};

const STATE_FILE: &str = "pipeline_state.json";

/// Pipeline stages in dependency order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CircuitCompiled,
    SrsReady,
    KeysReady,
    WitnessReady,
    ProofReady,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::CircuitCompiled,
        Stage::SrsReady,
        Stage::KeysReady,
        Stage::WitnessReady,
        Stage::ProofReady,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::CircuitCompiled => "circuit-compiled",
            Stage::SrsReady => "srs-ready",
            Stage::KeysReady => "keys-ready",
            Stage::WitnessReady => "witness-ready",
            Stage::ProofReady => "proof-ready",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    NotStarted,
    InProgress,
    Complete,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::NotStarted => "not_started",
            StageStatus::InProgress => "in_progress",
            StageStatus::Complete => "complete",
            StageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Pointer to a completed stage's artifact, enough to re-verify it on
/// resume without trusting the state file alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPointer {
    /// Display form of the artifact key.
    pub key: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactPointer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted record of pipeline progress for one (circuit, input) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub circuit_hash: String,
    pub input_hash: String,
    pub stages: BTreeMap<Stage, StageRecord>,
}

impl PipelineState {
    pub fn new(circuit_hash: &str, input_hash: &str) -> Self {
        let stages = Stage::ALL
            .iter()
            .map(|s| (*s, StageRecord::default()))
            .collect();
        Self {
            circuit_hash: circuit_hash.to_string(),
            input_hash: input_hash.to_string(),
            stages,
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.stages
            .get(&stage)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn record(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }

    pub fn mark_in_progress(&mut self, stage: Stage) {
        let record = self.stages.entry(stage).or_default();
        record.status = StageStatus::InProgress;
        record.error = None;
    }

    pub fn mark_complete(&mut self, stage: Stage, artifacts: Vec<ArtifactPointer>) {
        let record = self.stages.entry(stage).or_default();
        record.status = StageStatus::Complete;
        record.artifacts = artifacts;
        record.error = None;
    }

    pub fn mark_failed(&mut self, stage: Stage, error: &str) {
        let record = self.stages.entry(stage).or_default();
        record.status = StageStatus::Failed;
        record.error = Some(error.to_string());
    }

    /// First stage that is not verified-complete, in dependency order.
    pub fn first_incomplete(&self) -> Option<Stage> {
        Stage::ALL
            .iter()
            .copied()
            .find(|s| self.status(*s) != StageStatus::Complete)
    }
}

/// Save pipeline state to `<dir>/pipeline_state.json` atomically.
pub fn save(state: &PipelineState, dir: &Path) -> Result<()> {
    let path = dir.join(STATE_FILE);
    let json = serde_json::to_string_pretty(state).map_err(|e| PipelineError::ConfigParse {
        path: path.clone(),
        source: e,
    })?;
    let mut tmp = NamedTempFile::with_prefix_in(".tmp", dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| e.error)?;
    Ok(())
}

/// Load pipeline state from `<dir>/pipeline_state.json`.
pub fn load(dir: &Path) -> Result<PipelineState> {
    let path = dir.join(STATE_FILE);
    let contents = std::fs::read_to_string(&path).map_err(|e| PipelineError::ConfigNotFound {
        path: path.clone(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| PipelineError::ConfigParse {
        path,
        source: e,
    })
}
