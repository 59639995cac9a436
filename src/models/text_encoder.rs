//! Acoustic text encoder: embedding followed by a conv / layer-norm stack.

use super::layers::{Conv1d, Embedding, LayerNorm};
use crate::error::Result;
use crate::onnx::builder::GraphBuilder;
use candle_core::Tensor;
use candle_nn::VarBuilder;

const LEAKY_SLOPE: f64 = 0.2;
const NORM_EPS: f64 = 1e-5;

struct ConvBlock {
    conv: Conv1d,
    norm: LayerNorm,
}

/// Token ids `[1, L]` → acoustic features `[1, channels, L]`.
pub struct TextEncoder {
    embedding: Embedding,
    blocks: Vec<ConvBlock>,
}

impl TextEncoder {
    pub fn new(
        channels: usize,
        kernel_size: usize,
        depth: usize,
        n_symbols: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let embedding = Embedding::new(n_symbols, channels, vb.pp("embedding"))?;
        let blocks = (0..depth)
            .map(|i| {
                let block = vb.pp("cnn").pp(i);
                Ok(ConvBlock {
                    conv: Conv1d::new(channels, channels, kernel_size, 1, block.pp("0"))?,
                    norm: LayerNorm::with_names(channels, NORM_EPS, "gamma", "beta", block.pp("1"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { embedding, blocks })
    }

    pub fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        // [1, L, C] -> [1, C, L]
        let mut x = self.embedding.forward(ids)?.transpose(1, 2)?.contiguous()?;
        for block in &self.blocks {
            let y = block.conv.forward(&x)?;
            // channel layer norm runs on [1, L, C]
            let y = block.norm.forward(&y.transpose(1, 2)?)?.transpose(1, 2)?;
            x = candle_nn::ops::leaky_relu(&y.contiguous()?, LEAKY_SLOPE)?;
        }
        Ok(x)
    }

    pub fn emit(&self, g: &mut GraphBuilder, ids: &str) -> Result<String> {
        let x = self.embedding.emit(g, ids)?;
        let mut x = g.transpose(&x, &[0, 2, 1]);
        for block in &self.blocks {
            let y = block.conv.emit(g, &x)?;
            let y = g.transpose(&y, &[0, 2, 1]);
            let y = block.norm.emit(g, &y)?;
            let y = g.transpose(&y, &[0, 2, 1]);
            x = g.leaky_relu(&y, LEAKY_SLOPE as f32);
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_text_encoder_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let enc = TextEncoder::new(12, 5, 3, 30, vb.pp("text_encoder")).unwrap();
        let ids = Tensor::new(&[[0i64, 5, 12, 7, 0]], &Device::Cpu).unwrap();
        assert_eq!(enc.forward(&ids).unwrap().dims(), &[1, 12, 5]);
    }

    #[test]
    fn test_text_encoder_parameter_names() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        TextEncoder::new(4, 3, 2, 10, vb.pp("text_encoder")).unwrap();
        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.contains(&"text_encoder.cnn.1.0.weight".to_string()));
        assert!(names.contains(&"text_encoder.cnn.1.1.gamma".to_string()));
    }
}
