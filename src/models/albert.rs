//! ALBERT context encoder (PL-BERT)
//!
//! Factorized embeddings, then one shared transformer layer applied
//! `num_hidden_layers` times. Sequences are single and fully valid, so no
//! attention mask is applied.

use super::config::PlBertConfig;
use super::layers::{emit_gelu_tanh, Embedding, LayerNorm, Linear};
use crate::error::Result;
use crate::onnx::builder::{attr_int, GraphBuilder};
use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;

struct AlbertEmbeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    norm: LayerNorm,
}

impl AlbertEmbeddings {
    fn new(config: &PlBertConfig, n_token: usize, vb: VarBuilder) -> Result<Self> {
        let e = config.embedding_size;
        Ok(Self {
            word: Embedding::new(n_token, e, vb.pp("word_embeddings"))?,
            position: Embedding::new(
                config.max_position_embeddings,
                e,
                vb.pp("position_embeddings"),
            )?,
            token_type: Embedding::new(2, e, vb.pp("token_type_embeddings"))?,
            norm: LayerNorm::new(e, config.layer_norm_eps, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let (_, seq_len) = ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, ids.device())?.unsqueeze(0)?;
        let words = self.word.forward(ids)?;
        let pos = self.position.forward(&positions)?;
        // token_type_ids are all zero
        let token_type = self.token_type.embeddings().narrow(0, 0, 1)?;
        let x = words.broadcast_add(&pos)?.broadcast_add(&token_type)?;
        self.norm.forward(&x)
    }

    fn emit(&self, g: &mut GraphBuilder, ids: &str) -> Result<String> {
        let words = self.word.emit(g, ids)?;

        // positions = Range(0, len(ids))
        let shape = g.unary("Shape", ids);
        let axis = g.scalar_i64(1);
        let len = g.node("Gather", &[&shape, &axis], vec![attr_int("axis", 0)]);
        let zero = g.scalar_i64(0);
        let one = g.scalar_i64(1);
        let positions = g.node("Range", &[&zero, &len, &one], vec![]);
        let pos = self.position.emit(g, &positions)?;

        let token_type = self.token_type.emit_row(g, 0)?;

        let x = g.add(&words, &pos);
        let x = g.add(&x, &token_type);
        self.norm.emit(g, &x)
    }
}

struct AlbertLayer {
    query: Linear,
    key: Linear,
    value: Linear,
    dense: Linear,
    attention_norm: LayerNorm,
    ffn: Linear,
    ffn_output: Linear,
    full_layer_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl AlbertLayer {
    fn new(config: &PlBertConfig, vb: VarBuilder) -> Result<Self> {
        let h = config.hidden_size;
        let att = vb.pp("attention");
        Ok(Self {
            query: Linear::new(h, h, att.pp("query"))?,
            key: Linear::new(h, h, att.pp("key"))?,
            value: Linear::new(h, h, att.pp("value"))?,
            dense: Linear::new(h, h, att.pp("dense"))?,
            attention_norm: LayerNorm::new(h, config.layer_norm_eps, att.pp("LayerNorm"))?,
            ffn: Linear::new(h, config.intermediate_size, vb.pp("ffn"))?,
            ffn_output: Linear::new(config.intermediate_size, h, vb.pp("ffn_output"))?,
            full_layer_norm: LayerNorm::new(
                h,
                config.layer_norm_eps,
                vb.pp("full_layer_layer_norm"),
            )?,
            num_heads: config.num_attention_heads,
            head_dim: h / config.num_attention_heads,
        })
    }

    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, l, _) = x.dims3()?;
        Ok(x
            .reshape((b, l, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, l, h) = x.dims3()?;
        let q = self.split_heads(&self.query.forward(x)?)?;
        let k = self.split_heads(&self.key.forward(x)?)?;
        let v = self.split_heads(&self.value.forward(x)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, l, h))?;

        let attended = self
            .attention_norm
            .forward(&(x + self.dense.forward(&context)?)?)?;
        let hidden = self.ffn.forward(&attended)?.gelu()?;
        let out = self.ffn_output.forward(&hidden)?;
        self.full_layer_norm.forward(&(out + attended)?)
    }

    fn emit(&self, g: &mut GraphBuilder, x: &str) -> Result<String> {
        let heads = self.num_heads as i64;
        let head_dim = self.head_dim as i64;
        let hidden = heads * head_dim;

        let split = |g: &mut GraphBuilder, proj: &Linear, perm: &[i64]| -> Result<String> {
            let y = proj.emit(g, x)?;
            let y = g.reshape(&y, &[1, -1, heads, head_dim]);
            Ok(g.transpose(&y, perm))
        };
        let q = split(g, &self.query, &[0, 2, 1, 3])?;
        // keys pre-transposed to [B, heads, d, L]
        let k = split(g, &self.key, &[0, 2, 3, 1])?;
        let v = split(g, &self.value, &[0, 2, 1, 3])?;

        let scores = g.matmul(&q, &k);
        let scale = g.scalar_f32(1.0 / (self.head_dim as f32).sqrt());
        let scores = g.mul(&scores, &scale);
        let probs = g.node("Softmax", &[&scores], vec![attr_int("axis", -1)]);
        let context = g.matmul(&probs, &v);
        let context = g.transpose(&context, &[0, 2, 1, 3]);
        let context = g.reshape(&context, &[1, -1, hidden]);

        let dense = self.dense.emit(g, &context)?;
        let residual = g.add(x, &dense);
        let attended = self.attention_norm.emit(g, &residual)?;

        let ffn = self.ffn.emit(g, &attended)?;
        let ffn = emit_gelu_tanh(g, &ffn);
        let out = self.ffn_output.emit(g, &ffn)?;
        let residual = g.add(&out, &attended);
        self.full_layer_norm.emit(g, &residual)
    }
}

/// PL-BERT: token ids `[1, L]` → hidden states `[1, L, hidden_size]`.
pub struct Albert {
    embeddings: AlbertEmbeddings,
    mapping_in: Linear,
    layer: AlbertLayer,
    num_hidden_layers: usize,
}

impl Albert {
    pub fn new(config: &PlBertConfig, n_token: usize, vb: VarBuilder) -> Result<Self> {
        let encoder = vb.pp("encoder");
        Ok(Self {
            embeddings: AlbertEmbeddings::new(config, n_token, vb.pp("embeddings"))?,
            mapping_in: Linear::new(
                config.embedding_size,
                config.hidden_size,
                encoder.pp("embedding_hidden_mapping_in"),
            )?,
            layer: AlbertLayer::new(
                config,
                encoder.pp("albert_layer_groups.0.albert_layers.0"),
            )?,
            num_hidden_layers: config.num_hidden_layers,
        })
    }

    pub fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let x = self.embeddings.forward(ids)?;
        let mut x = self.mapping_in.forward(&x)?;
        for _ in 0..self.num_hidden_layers {
            x = self.layer.forward(&x)?;
        }
        Ok(x.to_dtype(DType::F32)?)
    }

    pub fn emit(&self, g: &mut GraphBuilder, ids: &str) -> Result<String> {
        let x = self.embeddings.emit(g, ids)?;
        let mut x = self.mapping_in.emit(g, &x)?;
        for _ in 0..self.num_hidden_layers {
            x = self.layer.emit(g, &x)?;
        }
        Ok(x)
    }
}
