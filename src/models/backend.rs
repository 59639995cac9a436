//! Compute backend seam for the synthesis pipeline.

use super::config::KokoroConfig;
use super::prosody::DurationOutput;
use crate::error::Result;
use candle_core::{Device, Tensor};

/// Both feature streams produced from one token sequence.
pub struct EncodedText {
    /// ALBERT context projected to the hidden width, `[1, L, H]`.
    pub prosody: Tensor,
    /// Acoustic text-encoder output, `[1, H, L]`.
    pub acoustic: Tensor,
}

/// The four neural stages the pipeline drives.
///
/// Implementors must be deterministic: the same inputs give the same
/// outputs, with no dropout or sampling.
pub trait ComputeBackend: Send + Sync {
    fn device(&self) -> &Device;

    fn config(&self) -> &KokoroConfig;

    /// Token ids `[1, L]` (i64) → prosody and acoustic features.
    fn encode(&self, ids: &Tensor) -> Result<EncodedText>;

    /// Prosody features and prosody style `[1, S]` → duration features and logits.
    fn predict_durations(&self, prosody: &Tensor, style: &Tensor) -> Result<DurationOutput>;

    /// Expanded duration features `[1, H + S, F]` → `(F0, N)`, each `[1, 1, F]`.
    fn predict_prosody(&self, expanded: &Tensor, style: &Tensor) -> Result<(Tensor, Tensor)>;

    /// Expanded acoustic features, curves and timbre style → waveform `[1, samples]`.
    fn decode(&self, asr: &Tensor, f0: &Tensor, n: &Tensor, timbre: &Tensor) -> Result<Tensor>;
}
