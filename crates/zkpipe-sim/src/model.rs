//! The simulated backend's circuit format: a single linear layer.
//!
//! A circuit description is a JSON document
//! `{"name": ..., "weights": [[...]], "bias": [...]}` where `weights` has
//! one row per output. Evaluation is fixed-point at the calibrated scale,
//! mirroring how a quantized model circuit consumes its inputs.

use serde::{Deserialize, Serialize};

use zkpipe_core::error::{PipelineError, Result};

/// Largest fixed-point magnitude any wire may reach before the simulation
/// declares overflow. Stand-in for a real circuit's field capacity headroom.
pub const MAX_MAGNITUDE: i128 = 1 << 40;

/// Rows a single constraint occupies in the simulated layout.
const ROWS_PER_CONSTRAINT: u64 = 8;

/// Smallest circuit size the simulation will report.
const MIN_LOGROWS: u32 = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub name: String,
    /// One row of input weights per output.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl LinearModel {
    /// Decode a model from circuit description bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let model: LinearModel = serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::InvalidCircuit(e.to_string()))?;
        if model.weights.is_empty() || model.weights.len() != model.bias.len() {
            return Err(PipelineError::InvalidCircuit(format!(
                "model '{}' has {} weight rows but {} bias terms",
                model.name,
                model.weights.len(),
                model.bias.len()
            )));
        }
        let arity = model.weights[0].len();
        if arity == 0 || model.weights.iter().any(|row| row.len() != arity) {
            return Err(PipelineError::InvalidCircuit(format!(
                "model '{}' has ragged or empty weight rows",
                model.name
            )));
        }
        Ok(model)
    }

    pub fn inputs(&self) -> usize {
        self.weights[0].len()
    }

    pub fn outputs(&self) -> usize {
        self.weights.len()
    }

    /// One multiply per weight plus one add per bias term.
    pub fn constraint_count(&self) -> usize {
        self.inputs() * self.outputs() + self.outputs()
    }

    /// log2 row count the compiled circuit would occupy.
    pub fn logrows(&self) -> u32 {
        let rows = (self.constraint_count() as u64).max(1) * ROWS_PER_CONSTRAINT;
        let ceil_log2 = 64 - (rows - 1).leading_zeros();
        ceil_log2.max(MIN_LOGROWS)
    }

    /// Evaluate in fixed point. `inputs_q` are quantized at `scale`;
    /// outputs come back at the same scale.
    pub fn eval_fixed(&self, inputs_q: &[i64], scale: u32) -> Result<Vec<i64>> {
        if inputs_q.len() != self.inputs() {
            return Err(PipelineError::WitnessEvaluation(format!(
                "model '{}' expects {} inputs, got {}",
                self.name,
                self.inputs(),
                inputs_q.len()
            )));
        }
        let mut outputs = Vec::with_capacity(self.outputs());
        for (row, bias) in self.weights.iter().zip(&self.bias) {
            // Weights and bias are quantized at the same scale; products
            // carry scale 2s and are shifted back down.
            let mut acc: i128 = 0;
            for (w, x) in row.iter().zip(inputs_q) {
                let w_q = quantize(*w, scale).ok_or_else(|| {
                    PipelineError::WitnessEvaluation(format!(
                        "weight {w} not representable at scale {scale}"
                    ))
                })?;
                acc += i128::from(w_q) * i128::from(*x);
                if acc.unsigned_abs() > (MAX_MAGNITUDE as u128) << scale {
                    return Err(PipelineError::WitnessEvaluation(format!(
                        "accumulator overflow in model '{}'",
                        self.name
                    )));
                }
            }
            let b_q = quantize(*bias, scale).ok_or_else(|| {
                PipelineError::WitnessEvaluation(format!(
                    "bias {bias} not representable at scale {scale}"
                ))
            })?;
            let out = (acc >> scale) + i128::from(b_q);
            if out.unsigned_abs() > MAX_MAGNITUDE as u128 {
                return Err(PipelineError::WitnessEvaluation(format!(
                    "output overflow in model '{}'",
                    self.name
                )));
            }
            outputs.push(out as i64);
        }
        Ok(outputs)
    }
}

/// Fixed-point quantization: `round(x * 2^scale)`.
///
/// `None` when the value is non-finite or the result leaves the simulated
/// field's representable range.
pub fn quantize(x: f64, scale: u32) -> Option<i64> {
    let scaled = (x * 2f64.powi(scale as i32)).round();
    if !scaled.is_finite() || scaled.abs() > MAX_MAGNITUDE as f64 {
        return None;
    }
    Some(scaled as i64)
}

/// Quantization round-trip error at a given scale.
pub fn quantization_error(x: f64, scale: u32) -> Option<f64> {
    let q = quantize(x, scale)?;
    Some((x - q as f64 / 2f64.powi(scale as i32)).abs())
}

/// Encode a fixed-point value as a 32-byte big-endian field element.
/// Negative values are sign-extended (two's complement over 256 bits).
pub fn encode_instance(v: i64) -> [u8; 32] {
    let wide = i128::from(v);
    let fill = if wide < 0 { 0xFF } else { 0x00 };
    let mut out = [fill; 32];
    out[16..].copy_from_slice(&wide.to_be_bytes());
    out
}
