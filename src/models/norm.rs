//! Style-conditioned normalization
//!
//! Both layers project a style vector to per-channel `(gamma, beta)` and
//! apply `(1 + gamma) * norm(x) + beta` to an un-affined normalization.

use super::layers::{emit_layer_norm, normalize_last, Linear};
use crate::error::Result;
use crate::onnx::builder::{attr_float, GraphBuilder};
use candle_core::{Tensor, D};
use candle_nn::VarBuilder;

const NORM_EPS: f64 = 1e-5;

/// Split `[B, 2C]` into `(1 + gamma, beta)` on the host.
fn modulation(fc: &Linear, style: &Tensor, channels: usize) -> Result<(Tensor, Tensor)> {
    let h = fc.forward(style)?;
    let gamma = h.narrow(D::Minus1, 0, channels)?;
    let beta = h.narrow(D::Minus1, channels, channels)?;
    Ok(((gamma + 1.0)?, beta))
}

/// Emit the same split; returns `(1 + gamma, beta)` value names of shape `[B, C]`.
fn emit_modulation(
    g: &mut GraphBuilder,
    fc: &Linear,
    style: &str,
    channels: usize,
) -> Result<(String, String)> {
    let h = fc.emit(g, style)?;
    let c = channels as i64;
    let gamma = g.slice(&h, &[0], &[c], &[-1]);
    let beta = g.slice(&h, &[c], &[2 * c], &[-1]);
    let one = g.scalar_f32(1.0);
    Ok((g.add(&gamma, &one), beta))
}

/// Adaptive layer norm over channel-last input `[B, L, C]`.
pub struct AdaLayerNorm {
    fc: Linear,
    channels: usize,
}

impl AdaLayerNorm {
    pub fn new(style_dim: usize, channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc: Linear::new(style_dim, 2 * channels, vb.pp("fc"))?,
            channels,
        })
    }

    pub fn forward(&self, x: &Tensor, style: &Tensor) -> Result<Tensor> {
        let (scale, beta) = modulation(&self.fc, style, self.channels)?;
        // [B, C] -> [B, 1, C]
        let scale = scale.unsqueeze(1)?;
        let beta = beta.unsqueeze(1)?;
        let normed = normalize_last(x, NORM_EPS)?;
        Ok(normed.broadcast_mul(&scale)?.broadcast_add(&beta)?)
    }

    pub fn emit(&self, g: &mut GraphBuilder, x: &str, style: &str) -> Result<String> {
        let (scale, beta) = emit_modulation(g, &self.fc, style, self.channels)?;
        let scale = g.unsqueeze(&scale, &[1]);
        let beta = g.unsqueeze(&beta, &[1]);
        let ones = g.const_f32(&vec![1.0; self.channels], &[self.channels as i64]);
        let zeros = g.const_f32(&vec![0.0; self.channels], &[self.channels as i64]);
        let normed = emit_layer_norm(g, x, &ones, &zeros, NORM_EPS);
        let scaled = g.mul(&normed, &scale);
        Ok(g.add(&scaled, &beta))
    }
}

/// Adaptive instance norm over channel-first input `[B, C, T]`.
pub struct AdaIN1d {
    fc: Linear,
    channels: usize,
}

impl AdaIN1d {
    pub fn new(style_dim: usize, channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc: Linear::new(style_dim, 2 * channels, vb.pp("fc"))?,
            channels,
        })
    }

    pub fn forward(&self, x: &Tensor, style: &Tensor) -> Result<Tensor> {
        let (scale, beta) = modulation(&self.fc, style, self.channels)?;
        // [B, C] -> [B, C, 1]
        let scale = scale.unsqueeze(2)?;
        let beta = beta.unsqueeze(2)?;
        let normed = normalize_last(x, NORM_EPS)?;
        Ok(normed.broadcast_mul(&scale)?.broadcast_add(&beta)?)
    }

    pub fn emit(&self, g: &mut GraphBuilder, x: &str, style: &str) -> Result<String> {
        let (scale, beta) = emit_modulation(g, &self.fc, style, self.channels)?;
        let scale = g.unsqueeze(&scale, &[2]);
        let beta = g.unsqueeze(&beta, &[2]);
        let ones = g.const_f32(&vec![1.0; self.channels], &[self.channels as i64]);
        let zeros = g.const_f32(&vec![0.0; self.channels], &[self.channels as i64]);
        let normed = g.node(
            "InstanceNormalization",
            &[x, &ones, &zeros],
            vec![attr_float("epsilon", NORM_EPS as f32)],
        );
        let scaled = g.mul(&normed, &scale);
        Ok(g.add(&scaled, &beta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_adain_zero_style_keeps_unit_statistics() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = AdaIN1d::new(8, 4, vb.pp("norm")).unwrap();
        let x = Tensor::randn(2f32, 3.0, (1, 4, 32), &Device::Cpu).unwrap();
        let style = Tensor::zeros((1, 8), DType::F32, &Device::Cpu).unwrap();
        let y = norm.forward(&x, &style).unwrap();
        assert_eq!(y.dims(), &[1, 4, 32]);

        // Zero style: scale = 1 + fc.bias, shift = fc.bias
        let per_channel: Vec<f32> = y.mean(D::Minus1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let bias: Vec<f32> = norm.fc.forward(&style).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        for (c, m) in per_channel.iter().enumerate() {
            assert!((m - bias[4 + c]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_ada_layer_norm_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = AdaLayerNorm::new(8, 6, vb.pp("norm")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 5, 6), &Device::Cpu).unwrap();
        let style = Tensor::randn(0f32, 1.0, (1, 8), &Device::Cpu).unwrap();
        assert_eq!(norm.forward(&x, &style).unwrap().dims(), &[1, 5, 6]);
    }
}
