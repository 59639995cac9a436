//! Token → frame alignment
//!
//! Token `i` occupies frames `[end[i-1], end[i])` where `end` is the running
//! sum of durations. Per-token features `[1, C, L]` become per-frame features
//! `[1, C, F]` by multiplying with the `L × F` indicator matrix.

use super::duration::Durations;
use crate::error::Result;
use candle_core::{Device, Tensor};

/// Dense row-major `L × F` indicator matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentMatrix {
    tokens: usize,
    frames: usize,
    data: Vec<f32>,
}

impl AlignmentMatrix {
    /// Repeat-interleave token indices, then scatter a one into each column.
    pub fn from_durations_scatter(durations: &Durations) -> Self {
        let tokens = durations.len();
        let frames = durations.total();

        let indices: Vec<usize> = durations
            .as_slice()
            .iter()
            .enumerate()
            .flat_map(|(i, &d)| std::iter::repeat(i).take(d as usize))
            .collect();

        let mut data = vec![0.0f32; tokens * frames];
        for (frame, &token) in indices.iter().enumerate() {
            data[token * frames + frame] = 1.0;
        }
        Self {
            tokens,
            frames,
            data,
        }
    }

    /// Compare a frame index ramp against every token's start and end offset.
    ///
    /// This is the formulation the exported graph uses.
    pub fn from_durations_boundaries(durations: &Durations) -> Self {
        let tokens = durations.len();
        let frames = durations.total();
        let ends = durations.end_offsets();

        let mut data = Vec::with_capacity(tokens * frames);
        for (i, &end) in ends.iter().enumerate() {
            let start = end - durations.as_slice()[i] as usize;
            data.extend((0..frames).map(|f| if f >= start && f < end { 1.0 } else { 0.0 }));
        }
        Self {
            tokens,
            frames,
            data,
        }
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Value at (`token`, `frame`).
    pub fn get(&self, token: usize, frame: usize) -> f32 {
        self.data[token * self.frames + frame]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Token owning each frame.
    pub fn frame_owners(&self) -> Vec<Option<usize>> {
        (0..self.frames)
            .map(|f| (0..self.tokens).find(|&t| self.get(t, f) != 0.0))
            .collect()
    }

    /// `[1, L, F]` tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(
            &self.data,
            (1, self.tokens, self.frames),
            device,
        )?)
    }

    /// Expand `[1, C, L]` per-token features to `[1, C, F]`.
    pub fn expand(&self, features: &Tensor) -> Result<Tensor> {
        let aln = self.to_tensor(features.device())?;
        Ok(features.contiguous()?.matmul(&aln)?)
    }
}
