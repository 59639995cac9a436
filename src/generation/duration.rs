//! Duration policy: logits → integer frame counts per token
//!
//! `duration = Σ sigmoid(logits) / speed`, rounded half-to-even and clamped
//! to at least one frame. Half-to-even is what both `torch.round` and the
//! ONNX `Round` operator implement, so the direct and exported paths agree.

use crate::error::{Error, Result};
use candle_core::{DType, Tensor, D};

/// Per-token frame counts, boundary markers included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Durations(Vec<u32>);

impl Durations {
    pub fn new(frames: Vec<u32>) -> Self {
        Self(frames)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of frames `F`.
    pub fn total(&self) -> usize {
        self.0.iter().map(|&d| d as usize).sum()
    }

    /// Exclusive end offset of every token (`cumsum`).
    pub fn end_offsets(&self) -> Vec<usize> {
        self.0
            .iter()
            .scan(0usize, |acc, &d| {
                *acc += d as usize;
                Some(*acc)
            })
            .collect()
    }
}

/// Check a direct-path speed factor.
pub fn validate_speed(speed: f32) -> Result<()> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(Error::config(format!(
            "speed must be a positive finite number, got {}",
            speed
        )));
    }
    Ok(())
}

/// Round continuous durations to frame counts.
pub fn round_durations(durations: &[f32]) -> Durations {
    Durations(
        durations
            .iter()
            .map(|&d| d.round_ties_even().max(1.0) as u32)
            .collect(),
    )
}

/// Apply the duration policy to raw logits of shape `[1, L, max_dur]`.
pub fn durations_from_logits(logits: &Tensor, speed: f32) -> Result<Durations> {
    validate_speed(speed)?;
    let summed = candle_nn::ops::sigmoid(&logits.to_dtype(DType::F32)?)?.sum(D::Minus1)?;
    // Divide on the host so the result matches the graph's f32 `Div` exactly.
    let values: Vec<f32> = summed
        .flatten_all()?
        .to_vec1::<f32>()?
        .into_iter()
        .map(|d| d / speed)
        .collect();
    let durations = round_durations(&values);
    tracing::debug!("pred_dur: {:?}", durations.as_slice());
    Ok(durations)
}
