//! Model configuration for Kokoro
//!
//! Reads the `config.json` layout published with Kokoro-82M. Unknown keys
//! (`multispeaker`, `max_conv_dim`, ...) are ignored; missing keys fall back
//! to the published values. Sharing the config file does not make the
//! published weights loadable: see the crate docs for which sub-modules
//! follow Kokoro's parameter layout.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level Kokoro configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KokoroConfig {
    /// Phoneme symbol → token id
    pub vocab: HashMap<String, u32>,

    /// Size of the token embedding tables
    #[serde(default = "default_n_token")]
    pub n_token: usize,

    /// Width of the prosody and acoustic feature streams
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,

    /// Width of each style half (prosody and timbre)
    #[serde(default = "default_style_dim")]
    pub style_dim: usize,

    /// Depth of the acoustic text encoder conv stack
    #[serde(default = "default_n_layer")]
    pub n_layer: usize,

    /// Number of duration bins summed into one frame count
    #[serde(default = "default_max_dur")]
    pub max_dur: usize,

    /// Training-time dropout; unused at inference
    #[serde(default = "default_dropout")]
    pub dropout: f64,

    #[serde(default = "default_text_encoder_kernel_size")]
    pub text_encoder_kernel_size: usize,

    #[serde(default = "default_n_mels")]
    pub n_mels: usize,

    #[serde(default)]
    pub plbert: PlBertConfig,

    #[serde(default)]
    pub istftnet: IstftNetConfig,
}

/// ALBERT context encoder configuration (`plbert` block).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlBertConfig {
    #[serde(default = "default_bert_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_bert_heads")]
    pub num_attention_heads: usize,
    #[serde(default = "default_bert_intermediate_size")]
    pub intermediate_size: usize,
    /// Maximum token sequence length, boundary markers included
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    /// Number of passes through the shared ALBERT layer
    #[serde(default = "default_bert_layers")]
    pub num_hidden_layers: usize,
    #[serde(default = "default_embedding_size")]
    pub embedding_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
}

/// Generator configuration (`istftnet` block).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IstftNetConfig {
    #[serde(default = "default_upsample_rates")]
    pub upsample_rates: Vec<usize>,
    #[serde(default = "default_upsample_kernel_sizes")]
    pub upsample_kernel_sizes: Vec<usize>,
    #[serde(default = "default_upsample_initial_channel")]
    pub upsample_initial_channel: usize,
    #[serde(default = "default_resblock_kernel_sizes")]
    pub resblock_kernel_sizes: Vec<usize>,
    #[serde(default = "default_resblock_dilation_sizes")]
    pub resblock_dilation_sizes: Vec<Vec<usize>>,
    #[serde(default = "default_gen_istft_n_fft")]
    pub gen_istft_n_fft: usize,
    #[serde(default = "default_gen_istft_hop_size")]
    pub gen_istft_hop_size: usize,
}

fn default_n_token() -> usize {
    178
}
fn default_hidden_dim() -> usize {
    512
}
fn default_style_dim() -> usize {
    128
}
fn default_n_layer() -> usize {
    3
}
fn default_max_dur() -> usize {
    50
}
fn default_dropout() -> f64 {
    0.2
}
fn default_text_encoder_kernel_size() -> usize {
    5
}
fn default_n_mels() -> usize {
    80
}
fn default_bert_hidden_size() -> usize {
    768
}
fn default_bert_heads() -> usize {
    12
}
fn default_bert_intermediate_size() -> usize {
    2048
}
fn default_max_position_embeddings() -> usize {
    512
}
fn default_bert_layers() -> usize {
    12
}
fn default_embedding_size() -> usize {
    128
}
fn default_layer_norm_eps() -> f64 {
    1e-12
}
fn default_upsample_rates() -> Vec<usize> {
    vec![10, 6]
}
fn default_upsample_kernel_sizes() -> Vec<usize> {
    vec![20, 12]
}
fn default_upsample_initial_channel() -> usize {
    512
}
fn default_resblock_kernel_sizes() -> Vec<usize> {
    vec![3, 7, 11]
}
fn default_resblock_dilation_sizes() -> Vec<Vec<usize>> {
    vec![vec![1, 3, 5], vec![1, 3, 5], vec![1, 3, 5]]
}
fn default_gen_istft_n_fft() -> usize {
    20
}
fn default_gen_istft_hop_size() -> usize {
    5
}

impl Default for PlBertConfig {
    fn default() -> Self {
        Self {
            hidden_size: default_bert_hidden_size(),
            num_attention_heads: default_bert_heads(),
            intermediate_size: default_bert_intermediate_size(),
            max_position_embeddings: default_max_position_embeddings(),
            num_hidden_layers: default_bert_layers(),
            embedding_size: default_embedding_size(),
            layer_norm_eps: default_layer_norm_eps(),
            dropout: 0.1,
        }
    }
}

impl Default for IstftNetConfig {
    fn default() -> Self {
        Self {
            upsample_rates: default_upsample_rates(),
            upsample_kernel_sizes: default_upsample_kernel_sizes(),
            upsample_initial_channel: default_upsample_initial_channel(),
            resblock_kernel_sizes: default_resblock_kernel_sizes(),
            resblock_dilation_sizes: default_resblock_dilation_sizes(),
            gen_istft_n_fft: default_gen_istft_n_fft(),
            gen_istft_hop_size: default_gen_istft_hop_size(),
        }
    }
}

impl IstftNetConfig {
    /// Product of the upsample rates: iSTFT frames per acoustic frame.
    pub fn upsample_factor(&self) -> usize {
        self.upsample_rates.iter().product()
    }

    /// Number of one-sided frequency bins produced by the generator head.
    pub fn n_bins(&self) -> usize {
        self.gen_istft_n_fft / 2 + 1
    }

    /// Waveform length for `frames` acoustic frames.
    ///
    /// The inverse STFT is centered, so `T` spectral frames yield
    /// `hop * (T - 1)` samples.
    pub fn samples_for_frames(&self, frames: usize) -> usize {
        let spectral_frames = frames * self.upsample_factor();
        self.gen_istft_hop_size * spectral_frames.saturating_sub(1)
    }
}

impl KokoroConfig {
    /// Load and validate a `config.json`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&content)?;
        tracing::debug!(
            "Loaded config from {}: {} vocab entries, context length {}",
            path.display(),
            config.vocab.len(),
            config.context_length()
        );
        Ok(config)
    }

    /// Parse and validate a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("malformed config.json: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Maximum token sequence length (boundary markers included).
    pub fn context_length(&self) -> usize {
        self.plbert.max_position_embeddings
    }

    /// Length of a full style vector: timbre half followed by prosody half.
    pub fn style_len(&self) -> usize {
        2 * self.style_dim
    }

    /// Check dimensional consistency.
    pub fn validate(&self) -> Result<()> {
        if self.vocab.is_empty() {
            return Err(Error::config("vocab is empty"));
        }
        if let Some((symbol, id)) = self
            .vocab
            .iter()
            .find(|&(_, &id)| id as usize >= self.n_token)
        {
            return Err(Error::config(format!(
                "vocab id {} for {:?} is outside n_token={}",
                id, symbol, self.n_token
            )));
        }
        if self.hidden_dim == 0 || self.style_dim == 0 || self.max_dur == 0 {
            return Err(Error::config(
                "hidden_dim, style_dim and max_dur must be positive",
            ));
        }
        if self.text_encoder_kernel_size % 2 == 0 {
            return Err(Error::config(format!(
                "text_encoder_kernel_size must be odd, got {}",
                self.text_encoder_kernel_size
            )));
        }
        if self.context_length() < 2 {
            return Err(Error::config(
                "plbert.max_position_embeddings must leave room for boundary markers",
            ));
        }
        let bert = &self.plbert;
        if bert.num_attention_heads == 0 || bert.hidden_size % bert.num_attention_heads != 0 {
            return Err(Error::config(format!(
                "plbert.hidden_size={} is not divisible by num_attention_heads={}",
                bert.hidden_size, bert.num_attention_heads
            )));
        }

        let gen = &self.istftnet;
        if gen.upsample_rates.is_empty()
            || gen.upsample_rates.len() != gen.upsample_kernel_sizes.len()
        {
            return Err(Error::config(
                "istftnet.upsample_rates and upsample_kernel_sizes must be non-empty and the same length",
            ));
        }
        for (&rate, &kernel) in gen.upsample_rates.iter().zip(&gen.upsample_kernel_sizes) {
            if rate == 0 || kernel < rate || (kernel - rate) % 2 != 0 {
                return Err(Error::config(format!(
                    "upsample kernel {} cannot upsample exactly by {}",
                    kernel, rate
                )));
            }
        }
        let stages = gen.upsample_rates.len() as u32;
        if gen.upsample_initial_channel % 2usize.pow(stages) != 0 {
            return Err(Error::config(format!(
                "upsample_initial_channel={} must halve cleanly over {} stages",
                gen.upsample_initial_channel, stages
            )));
        }
        match (
            gen.resblock_kernel_sizes.first(),
            gen.resblock_dilation_sizes.first(),
        ) {
            (Some(k), Some(d)) if k % 2 == 1 && !d.is_empty() => {}
            _ => {
                return Err(Error::config(
                    "istftnet needs an odd resblock kernel size and at least one dilation",
                ))
            }
        }
        if gen.gen_istft_n_fft < 2 || gen.gen_istft_n_fft % 2 != 0 || gen.gen_istft_hop_size == 0 {
            return Err(Error::config(format!(
                "invalid iSTFT geometry n_fft={} hop={}",
                gen.gen_istft_n_fft, gen.gen_istft_hop_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{ "vocab": { "a": 5, "b": 12, ";": 1 } }"#;

    #[test]
    fn test_defaults_match_published_config() {
        let config = KokoroConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.n_token, 178);
        assert_eq!(config.hidden_dim, 512);
        assert_eq!(config.style_dim, 128);
        assert_eq!(config.style_len(), 256);
        assert_eq!(config.max_dur, 50);
        assert_eq!(config.context_length(), 512);
        assert_eq!(config.plbert.num_hidden_layers, 12);
        assert_eq!(config.istftnet.upsample_rates, vec![10, 6]);
        assert_eq!(config.istftnet.n_bins(), 11);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let json = r#"{ "vocab": { "a": 1 }, "multispeaker": true, "max_conv_dim": 512 }"#;
        assert!(KokoroConfig::from_json(json).is_ok());
    }

    #[test]
    fn test_samples_for_frames() {
        let config = KokoroConfig::from_json(MINIMAL).unwrap();
        // 2 frames * 60 spectral frames each, hop 5, centered
        assert_eq!(config.istftnet.samples_for_frames(2), 5 * (120 - 1));
        assert_eq!(config.istftnet.samples_for_frames(0), 0);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = KokoroConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_vocab_is_config_error() {
        let err = KokoroConfig::from_json(r#"{ "hidden_dim": 16 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_vocab_outside_n_token_rejected() {
        let json = r#"{ "vocab": { "a": 500 } }"#;
        let err = KokoroConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("outside n_token"));
    }

    #[test]
    fn test_bad_upsample_geometry_rejected() {
        let json = r#"{ "vocab": { "a": 1 },
            "istftnet": { "upsample_rates": [10, 6], "upsample_kernel_sizes": [21, 12] } }"#;
        assert!(KokoroConfig::from_json(json).is_err());
    }

    #[test]
    fn test_heads_must_divide_hidden() {
        let json = r#"{ "vocab": { "a": 1 },
            "plbert": { "hidden_size": 100, "num_attention_heads": 12 } }"#;
        assert!(KokoroConfig::from_json(json).is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = KokoroConfig::from_file("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
