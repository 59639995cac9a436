//! Prosody predictor: durations per token, then F0 and energy per frame.
//!
//! Convolutional, with AdaLN/AdaIN style conditioning. The tensor contract
//! matches Kokoro's predictor; the parameter layout does not (Kokoro uses
//! LSTMs and AdaIN residual stacks here).

use super::layers::{Conv1d, Linear};
use super::norm::{AdaIN1d, AdaLayerNorm};
use crate::error::Result;
use crate::onnx::builder::GraphBuilder;
use candle_core::{Tensor, D};
use candle_nn::VarBuilder;

const LEAKY_SLOPE: f64 = 0.2;

/// Concatenate a `[1, S]` style onto every position of `[1, L, C]`.
fn append_style(x: &Tensor, style: &Tensor) -> Result<Tensor> {
    let (b, l, _) = x.dims3()?;
    let s = style.unsqueeze(1)?.broadcast_as((b, l, style.dim(D::Minus1)?))?;
    Ok(Tensor::cat(&[x, &s.contiguous()?], D::Minus1)?)
}

/// Graph twin of [`append_style`]: tile the style along the length of `x`.
fn emit_append_style(g: &mut GraphBuilder, x: &str, style: &str) -> String {
    let s = g.unsqueeze(style, &[1]);
    // Expand [1, 1, S] to [1, L, S] using L from x
    let shape = g.unary("Shape", x);
    let len = g.slice(&shape, &[1], &[2], &[0]);
    let one = g.const_i64(&[1]);
    let tile_shape = g.concat(&[&one, &len, &one], 0);
    let tiled = g.node("Tile", &[&s, &tile_shape], vec![]);
    g.concat(&[x, &tiled], -1)
}

/// F0 or energy branch.
struct CurveBranch {
    conv: Conv1d,
    norm: AdaIN1d,
    proj: Conv1d,
}

impl CurveBranch {
    fn new(hidden: usize, style_dim: usize, vb: VarBuilder, proj_vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv: Conv1d::new(hidden, hidden, 3, 1, vb.pp("conv"))?,
            norm: AdaIN1d::new(style_dim, hidden, vb.pp("norm"))?,
            proj: Conv1d::new(hidden, 1, 1, 1, proj_vb)?,
        })
    }

    fn forward(&self, x: &Tensor, style: &Tensor) -> Result<Tensor> {
        let y = self.norm.forward(&self.conv.forward(x)?, style)?;
        let y = candle_nn::ops::leaky_relu(&y, LEAKY_SLOPE)?;
        self.proj.forward(&y)
    }

    fn emit(&self, g: &mut GraphBuilder, x: &str, style: &str) -> Result<String> {
        let y = self.conv.emit(g, x)?;
        let y = self.norm.emit(g, &y, style)?;
        let y = g.leaky_relu(&y, LEAKY_SLOPE as f32);
        self.proj.emit(g, &y)
    }
}

/// Duration features plus raw logits for one sequence.
pub struct DurationOutput {
    /// `[1, L, H + S]`
    pub features: Tensor,
    /// `[1, L, max_dur]`
    pub logits: Tensor,
}

pub struct ProsodyPredictor {
    proj: Linear,
    norm: AdaLayerNorm,
    duration_hidden: Linear,
    duration_proj: Linear,
    shared: Conv1d,
    shared_norm: AdaIN1d,
    f0: CurveBranch,
    n: CurveBranch,
}

impl ProsodyPredictor {
    pub fn new(hidden: usize, style_dim: usize, max_dur: usize, vb: VarBuilder) -> Result<Self> {
        let enc = vb.pp("text_encoder");
        Ok(Self {
            proj: Linear::new(hidden + style_dim, hidden, enc.pp("proj"))?,
            norm: AdaLayerNorm::new(style_dim, hidden, enc.pp("norm"))?,
            duration_hidden: Linear::new(hidden + style_dim, hidden, vb.pp("duration_hidden"))?,
            duration_proj: Linear::new(hidden, max_dur, vb.pp("duration_proj"))?,
            shared: Conv1d::new(hidden + style_dim, hidden, 3, 1, vb.pp("shared"))?,
            shared_norm: AdaIN1d::new(style_dim, hidden, vb.pp("shared_norm"))?,
            f0: CurveBranch::new(hidden, style_dim, vb.pp("F0"), vb.pp("F0_proj"))?,
            n: CurveBranch::new(hidden, style_dim, vb.pp("N"), vb.pp("N_proj"))?,
        })
    }

    /// `prosody` `[1, L, H]`, `style` `[1, S]` → duration features and logits.
    pub fn predict_durations(&self, prosody: &Tensor, style: &Tensor) -> Result<DurationOutput> {
        let x = self.proj.forward(&append_style(prosody, style)?)?;
        let x = self.norm.forward(&x, style)?;
        let x = candle_nn::ops::leaky_relu(&x, LEAKY_SLOPE)?;
        let features = append_style(&x, style)?;

        let hidden = self.duration_hidden.forward(&features)?.tanh()?;
        let logits = self.duration_proj.forward(&hidden)?;
        Ok(DurationOutput { features, logits })
    }

    pub fn emit_durations(
        &self,
        g: &mut GraphBuilder,
        prosody: &str,
        style: &str,
    ) -> Result<(String, String)> {
        let x = emit_append_style(g, prosody, style);
        let x = self.proj.emit(g, &x)?;
        let x = self.norm.emit(g, &x, style)?;
        let x = g.leaky_relu(&x, LEAKY_SLOPE as f32);
        let features = emit_append_style(g, &x, style);

        let hidden = self.duration_hidden.emit(g, &features)?;
        let hidden = g.unary("Tanh", &hidden);
        let logits = self.duration_proj.emit(g, &hidden)?;
        Ok((features, logits))
    }

    /// Expanded features `[1, H + S, F]` → `(F0, N)`, each `[1, 1, F]`.
    pub fn predict_curves(&self, expanded: &Tensor, style: &Tensor) -> Result<(Tensor, Tensor)> {
        let x = self.shared_norm.forward(&self.shared.forward(expanded)?, style)?;
        let x = candle_nn::ops::leaky_relu(&x, LEAKY_SLOPE)?;
        Ok((self.f0.forward(&x, style)?, self.n.forward(&x, style)?))
    }

    pub fn emit_curves(
        &self,
        g: &mut GraphBuilder,
        expanded: &str,
        style: &str,
    ) -> Result<(String, String)> {
        let x = self.shared.emit(g, expanded)?;
        let x = self.shared_norm.emit(g, &x, style)?;
        let x = g.leaky_relu(&x, LEAKY_SLOPE as f32);
        let f0 = self.f0.emit(g, &x, style)?;
        let n = self.n.emit(g, &x, style)?;
        Ok((f0, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_predictor_shapes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let predictor = ProsodyPredictor::new(8, 4, 6, vb.pp("predictor")).unwrap();
        let prosody = Tensor::randn(0f32, 1.0, (1, 5, 8), &Device::Cpu).unwrap();
        let style = Tensor::randn(0f32, 1.0, (1, 4), &Device::Cpu).unwrap();

        let out = predictor.predict_durations(&prosody, &style).unwrap();
        assert_eq!(out.features.dims(), &[1, 5, 12]);
        assert_eq!(out.logits.dims(), &[1, 5, 6]);

        let expanded = Tensor::randn(0f32, 1.0, (1, 12, 9), &Device::Cpu).unwrap();
        let (f0, n) = predictor.predict_curves(&expanded, &style).unwrap();
        assert_eq!(f0.dims(), &[1, 1, 9]);
        assert_eq!(n.dims(), &[1, 1, 9]);
    }

    #[test]
    fn test_append_style_tiles() {
        let x = Tensor::zeros((1, 3, 2), DType::F32, &Device::Cpu).unwrap();
        let s = Tensor::new(&[[7f32, 8.0]], &Device::Cpu).unwrap();
        let y = append_style(&x, &s).unwrap();
        let rows: Vec<Vec<f32>> = y.squeeze(0).unwrap().to_vec2().unwrap();
        assert!(rows.iter().all(|r| r == &[0.0, 0.0, 7.0, 8.0]));
    }
}
