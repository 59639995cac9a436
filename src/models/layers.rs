//! Parameterised layers that can run on candle and emit themselves to ONNX
//!
//! Each wrapper remembers the `VarBuilder` prefix it was loaded from and uses
//! it to name its initializers, so exported graphs keep checkpoint names.

use crate::error::Result;
use crate::onnx::builder::{attr_float, attr_int, attr_ints, GraphBuilder};
use candle_core::{DType, Module, Tensor, D};
use candle_nn::{Conv1dConfig, ConvTranspose1dConfig, VarBuilder};

/// Dense layer applied to the last axis.
pub struct Linear {
    inner: candle_nn::Linear,
    name: String,
}

impl Linear {
    pub fn new(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        let name = vb.prefix();
        Ok(Self {
            inner: candle_nn::linear(in_dim, out_dim, vb)?,
            name,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.inner.forward(x)?)
    }

    /// `MatMul` against the stored transposed weight, then `Add` bias.
    pub fn emit(&self, g: &mut GraphBuilder, x: &str) -> Result<String> {
        let weight_t = self.inner.weight().t()?.contiguous()?;
        let w = g.weight(&format!("{}.weight_t", self.name), &weight_t)?;
        let y = g.matmul(x, &w);
        match self.inner.bias() {
            Some(bias) => {
                let b = g.weight(&format!("{}.bias", self.name), bias)?;
                Ok(g.add(&y, &b))
            }
            None => Ok(y),
        }
    }
}

/// Same-length 1-D convolution over `[B, C, T]`.
pub struct Conv1d {
    inner: candle_nn::Conv1d,
    name: String,
    kernel_size: usize,
}

impl Conv1d {
    /// Padding is `dilation * (kernel_size - 1) / 2`, keeping `T` unchanged.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        dilation: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let name = vb.prefix();
        let config = Conv1dConfig {
            padding: dilation * (kernel_size - 1) / 2,
            stride: 1,
            dilation,
            groups: 1,
            ..Default::default()
        };
        Ok(Self {
            inner: candle_nn::conv1d(in_channels, out_channels, kernel_size, config, vb)?,
            name,
            kernel_size,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.inner.forward(x)?)
    }

    pub fn emit(&self, g: &mut GraphBuilder, x: &str) -> Result<String> {
        let config = self.inner.config();
        let w = g.weight(&format!("{}.weight", self.name), self.inner.weight())?;
        let mut inputs = vec![x.to_string(), w];
        if let Some(bias) = self.inner.bias() {
            inputs.push(g.weight(&format!("{}.bias", self.name), bias)?);
        }
        let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let pad = config.padding as i64;
        Ok(g.node(
            "Conv",
            &inputs,
            vec![
                attr_ints("kernel_shape", &[self.kernel_size as i64]),
                attr_ints("pads", &[pad, pad]),
                attr_ints("strides", &[config.stride as i64]),
                attr_ints("dilations", &[config.dilation as i64]),
                attr_int("group", 1),
            ],
        ))
    }
}

/// Transposed convolution upsampling `T` by exactly `stride`.
pub struct ConvTranspose1d {
    inner: candle_nn::ConvTranspose1d,
    name: String,
    kernel_size: usize,
}

impl ConvTranspose1d {
    /// Padding is `(kernel_size - stride) / 2`, so `T_out = T * stride`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let name = vb.prefix();
        let config = ConvTranspose1dConfig {
            padding: (kernel_size - stride) / 2,
            output_padding: 0,
            stride,
            dilation: 1,
            groups: 1,
        };
        Ok(Self {
            inner: candle_nn::conv_transpose1d(in_channels, out_channels, kernel_size, config, vb)?,
            name,
            kernel_size,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.inner.forward(x)?)
    }

    pub fn emit(&self, g: &mut GraphBuilder, x: &str) -> Result<String> {
        let config = self.inner.config();
        let w = g.weight(&format!("{}.weight", self.name), self.inner.weight())?;
        let mut inputs = vec![x.to_string(), w];
        if let Some(bias) = self.inner.bias() {
            inputs.push(g.weight(&format!("{}.bias", self.name), bias)?);
        }
        let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let pad = config.padding as i64;
        Ok(g.node(
            "ConvTranspose",
            &inputs,
            vec![
                attr_ints("kernel_shape", &[self.kernel_size as i64]),
                attr_ints("pads", &[pad, pad]),
                attr_ints("strides", &[config.stride as i64]),
                attr_int("group", 1),
            ],
        ))
    }
}

/// Layer normalization over the last axis.
///
/// Parameter names are configurable because checkpoints mix
/// `weight`/`bias` (ALBERT) with `gamma`/`beta` (acoustic encoder).
pub struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
    name: String,
    weight_name: &'static str,
    bias_name: &'static str,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Self::with_names(dim, eps, "weight", "bias", vb)
    }

    pub fn with_names(
        dim: usize,
        eps: f64,
        weight_name: &'static str,
        bias_name: &'static str,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(dim, weight_name, candle_nn::Init::Const(1.0))?;
        let bias = vb.get_with_hints(dim, bias_name, candle_nn::Init::Const(0.0))?;
        Ok(Self {
            weight,
            bias,
            eps,
            name: vb.prefix(),
            weight_name,
            bias_name,
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let normed = normalize_last(x, self.eps)?;
        Ok(normed
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)?)
    }

    pub fn emit(&self, g: &mut GraphBuilder, x: &str) -> Result<String> {
        let scale = g.weight(&format!("{}.{}", self.name, self.weight_name), &self.weight)?;
        let bias = g.weight(&format!("{}.{}", self.name, self.bias_name), &self.bias)?;
        Ok(emit_layer_norm(g, x, &scale, &bias, self.eps))
    }
}

/// Zero-mean, unit-variance normalization over the last axis (biased variance).
pub fn normalize_last(x: &Tensor, eps: f64) -> Result<Tensor> {
    let x = x.to_dtype(DType::F32)?;
    let mean = x.mean_keepdim(D::Minus1)?;
    let centered = x.broadcast_sub(&mean)?;
    let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
    Ok(centered.broadcast_div(&(var + eps)?.sqrt()?)?)
}

/// `LayerNormalization` over the last axis.
pub fn emit_layer_norm(g: &mut GraphBuilder, x: &str, scale: &str, bias: &str, eps: f64) -> String {
    g.node(
        "LayerNormalization",
        &[x, scale, bias],
        vec![attr_int("axis", -1), attr_float("epsilon", eps as f32)],
    )
}

/// Token embedding table.
pub struct Embedding {
    inner: candle_nn::Embedding,
    name: String,
}

impl Embedding {
    pub fn new(vocab: usize, dim: usize, vb: VarBuilder) -> Result<Self> {
        let name = vb.prefix();
        Ok(Self {
            inner: candle_nn::embedding(vocab, dim, vb)?,
            name,
        })
    }

    pub fn embeddings(&self) -> &Tensor {
        self.inner.embeddings()
    }

    /// `[B, L]` ids (any integer dtype) → `[B, L, dim]`.
    pub fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        Ok(self.inner.forward(&ids.to_dtype(DType::U32)?)?)
    }

    pub fn emit(&self, g: &mut GraphBuilder, ids: &str) -> Result<String> {
        let table = g.weight(&format!("{}.weight", self.name), self.inner.embeddings())?;
        Ok(g.node("Gather", &[&table, ids], vec![attr_int("axis", 0)]))
    }

    /// A single table row as a `[1, dim]` value.
    pub fn emit_row(&self, g: &mut GraphBuilder, row: i64) -> Result<String> {
        let table = g.weight(&format!("{}.weight", self.name), self.inner.embeddings())?;
        Ok(g.slice(&table, &[row], &[row + 1], &[0]))
    }
}

/// tanh-approximated GELU as a chain of elementary ops.
pub fn emit_gelu_tanh(g: &mut GraphBuilder, x: &str) -> String {
    let c = g.scalar_f32(0.044_715);
    let k = g.scalar_f32((2.0f32 / std::f32::consts::PI).sqrt());
    let half = g.scalar_f32(0.5);
    let one = g.scalar_f32(1.0);

    let x2 = g.mul(x, x);
    let x3 = g.mul(&x2, x);
    let cx3 = g.mul(&x3, &c);
    let inner = g.add(x, &cx3);
    let scaled = g.mul(&inner, &k);
    let t = g.unary("Tanh", &scaled);
    let one_plus = g.add(&t, &one);
    let hx = g.mul(x, &half);
    g.mul(&hx, &one_plus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn create_mock_vb(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    #[test]
    fn test_conv1d_keeps_length() {
        let varmap = VarMap::new();
        let vb = create_mock_vb(&varmap);
        let conv = Conv1d::new(4, 6, 5, 3, vb.pp("conv")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 4, 17), &Device::Cpu).unwrap();
        assert_eq!(conv.forward(&x).unwrap().dims(), &[1, 6, 17]);
    }

    #[test]
    fn test_conv_transpose_upsamples_exactly() {
        let varmap = VarMap::new();
        let vb = create_mock_vb(&varmap);
        let up = ConvTranspose1d::new(8, 4, 20, 10, vb.pp("ups.0")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 8, 7), &Device::Cpu).unwrap();
        assert_eq!(up.forward(&x).unwrap().dims(), &[1, 4, 70]);
    }

    #[test]
    fn test_layer_norm_statistics() {
        let varmap = VarMap::new();
        let vb = create_mock_vb(&varmap);
        let ln = LayerNorm::new(16, 1e-5, vb.pp("norm")).unwrap();
        let x = Tensor::randn(3f32, 2.0, (1, 5, 16), &Device::Cpu).unwrap();
        let y = ln.forward(&x).unwrap();
        let mean: Vec<f32> = y.mean(D::Minus1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert!(mean.iter().all(|m| m.abs() < 1e-4));
    }

    #[test]
    fn test_emit_uses_checkpoint_names() {
        let varmap = VarMap::new();
        let vb = create_mock_vb(&varmap);
        let linear = Linear::new(4, 3, vb.pp("bert_encoder")).unwrap();
        let mut g = GraphBuilder::new();
        let y = linear.emit(&mut g, "x").unwrap();
        let graph = g.build("t");
        assert!(graph.initializer.iter().any(|t| t.name == "bert_encoder.weight_t"));
        assert!(graph.initializer.iter().any(|t| t.name == "bert_encoder.bias"));
        assert_eq!(graph.node.last().unwrap().output[0], y);
    }
}
