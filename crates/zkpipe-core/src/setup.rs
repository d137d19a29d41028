//! Circuit setup: settings generation, calibration, compilation.

use std::ops::RangeInclusive;
use std::sync::Arc;

use crate::backend::{
    CircuitDescription, CompiledCircuit, InputAssignment, ProvingBackend, RunArgs, Settings,
};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Compiles a circuit description into its canonical compiled form,
/// calibrating a fixed-point scale along the way.
///
/// Deterministic: identical (circuit, calibration inputs, config) always
/// yields identical settings and compiled-circuit hash. The scale search is
/// ascending and first-match, so there is no dependence on iteration
/// ordering elsewhere.
pub struct CircuitSetupStage {
    backend: Arc<dyn ProvingBackend>,
    scale_search: RangeInclusive<u32>,
    tolerance: f64,
}

impl CircuitSetupStage {
    pub fn new(backend: Arc<dyn ProvingBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            scale_search: config.scale_search_min..=config.scale_search_max,
            tolerance: config.calibration_tolerance,
        }
    }

    /// Generate settings, calibrate a scale, and compile the circuit.
    pub async fn compile(
        &self,
        circuit: &CircuitDescription,
        run_args: &RunArgs,
        calibration_inputs: &[InputAssignment],
    ) -> Result<(CompiledCircuit, Settings)> {
        let base = self.backend.gen_settings(circuit, run_args).await?;
        let settings = self.calibrate(circuit, &base, calibration_inputs).await?;
        let compiled = self.backend.compile_circuit(circuit, &settings).await?;
        tracing::info!(
            circuit = %circuit.hash(),
            compiled = %compiled.hash,
            scale = settings.scale,
            logrows = settings.logrows,
            "circuit compiled"
        );
        Ok((compiled, settings))
    }

    /// Ascending scale search; the first scale within tolerance and without
    /// overflow wins.
    async fn calibrate(
        &self,
        circuit: &CircuitDescription,
        base: &Settings,
        inputs: &[InputAssignment],
    ) -> Result<Settings> {
        for scale in self.scale_search.clone() {
            let report = self
                .backend
                .calibrate(circuit, base, inputs, scale)
                .await?;
            if report.overflow {
                tracing::debug!(scale, "calibration rejected scale: overflow");
                continue;
            }
            if report.max_quantization_error <= self.tolerance {
                tracing::info!(
                    scale,
                    error = report.max_quantization_error,
                    "calibration accepted scale"
                );
                let mut settings = base.clone();
                settings.scale = scale;
                return Ok(settings);
            }
            tracing::debug!(
                scale,
                error = report.max_quantization_error,
                tolerance = self.tolerance,
                "calibration rejected scale: error above tolerance"
            );
        }
        Err(PipelineError::CalibrationFailed {
            min: *self.scale_search.start(),
            max: *self.scale_search.end(),
            tolerance: self.tolerance,
        })
    }
}
